//! Registry of live backend clients
//!
//! One entry per backend name. The startup path, the health reporter and the
//! shutdown hooks all go through [`Registry::get_or_try_create`], so two
//! callers racing on the same name never both connect: the second waits on
//! the per-name slot and observes the first caller's handle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::backend::BackendClient;
use crate::error::BackendResult;

type Slot = Arc<AsyncMutex<Option<Arc<dyn BackendClient>>>>;

/// Outcome of a lookup that may create the handle
#[derive(Clone)]
pub enum Lookup {
    /// A handle was already registered
    Existing(Arc<dyn BackendClient>),
    /// This call created and registered the handle
    Created(Arc<dyn BackendClient>),
}

impl Lookup {
    pub fn client(&self) -> &Arc<dyn BackendClient> {
        match self {
            Lookup::Existing(client) | Lookup::Created(client) => client,
        }
    }

    pub fn into_client(self) -> Arc<dyn BackendClient> {
        match self {
            Lookup::Existing(client) | Lookup::Created(client) => client,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Lookup::Created(_))
    }
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Existing(c) => f.debug_tuple("Existing").field(&c.name()).finish(),
            Lookup::Created(c) => f.debug_tuple("Created").field(&c.name()).finish(),
        }
    }
}

/// Shared map from backend name to live client.
///
/// Cheap to clone; all clones see the same entries.
#[derive(Clone, Default)]
pub struct Registry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Slot {
        // The map lock is only held to fetch the slot, never across an await
        self.slots
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Return the handle for `name`, creating it with `create` if absent.
    ///
    /// Concurrent callers for the same name are serialised; at most one of
    /// them runs `create`. A failed `create` leaves the entry empty.
    pub async fn get_or_try_create<F, Fut>(&self, name: &str, create: F) -> BackendResult<Lookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BackendResult<Arc<dyn BackendClient>>>,
    {
        let slot = self.slot(name);
        let mut guard = slot.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Lookup::Existing(Arc::clone(client)));
        }

        let client = create().await?;
        *guard = Some(Arc::clone(&client));
        debug!(backend = %name, "Registered backend client");
        Ok(Lookup::Created(client))
    }

    /// Remove and return the handle for `name`
    pub async fn remove(&self, name: &str) -> Option<Arc<dyn BackendClient>> {
        let slot = self.slots.lock().get(name).cloned()?;
        let mut guard = slot.lock().await;
        guard.take()
    }

    /// Take every remaining handle out of the registry and close it.
    ///
    /// Close failures are logged, not returned.
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();

        let mut clients = Vec::new();
        for slot in slots {
            if let Some(client) = slot.lock().await.take() {
                clients.push(client);
            }
        }

        join_all(clients.into_iter().map(|client| async move {
            if let Err(e) = client.close().await {
                warn!(backend = %client.name(), error = %e, "Failed to close backend client");
            }
        }))
        .await;
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}
