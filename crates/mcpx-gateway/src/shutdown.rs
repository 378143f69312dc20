//! Shutdown hooks and the OS stop signal

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct Hooks {
    fired: bool,
    pending: Vec<(String, Hook)>,
    late: Vec<JoinHandle<()>>,
}

/// Teardown hooks run when the gateway starts shutting down.
///
/// Each hook runs at most once. A hook registered after [`run`](Self::run)
/// has been called is started immediately, and `run` does not return until
/// every such hook has finished too.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    inner: Arc<Mutex<Hooks>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `name` (used for logging)
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let hook: Hook = Box::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) });

        let mut inner = self.inner.lock();
        if inner.fired {
            debug!(backend = %name, "Shutdown already started, running hook now");
            inner.late.push(tokio::spawn(hook()));
        } else {
            inner.pending.push((name, hook));
        }
    }

    /// Run every registered hook concurrently and wait for all of them,
    /// including hooks registered while this call is in progress
    pub async fn run(&self) {
        let hooks = {
            let mut inner = self.inner.lock();
            inner.fired = true;
            std::mem::take(&mut inner.pending)
        };

        join_all(hooks.into_iter().map(|(name, hook)| async move {
            debug!(backend = %name, "Running shutdown hook");
            hook().await;
        }))
        .await;

        loop {
            let late = std::mem::take(&mut self.inner.lock().late);
            if late.is_empty() {
                break;
            }
            for result in join_all(late).await {
                if let Err(e) = result {
                    warn!(error = %e, "Shutdown hook task failed");
                }
            }
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_hook(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn hooks_run_once() {
        let hooks = ShutdownHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        hooks.register("a", counting_hook(&counter));
        hooks.register("b", counting_hook(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        hooks.run().await;
        hooks.run().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hooks_run_concurrently() {
        let hooks = ShutdownHooks::new();
        for name in ["a", "b", "c"] {
            hooks.register(name, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            });
        }

        let started = tokio::time::Instant::now();
        hooks.run().await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn late_hook_runs_immediately() {
        let hooks = ShutdownHooks::new();
        hooks.run().await;

        let counter = Arc::new(AtomicUsize::new(0));
        hooks.register("late", counting_hook(&counter));

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_waits_for_hooks_registered_while_draining() {
        let hooks = ShutdownHooks::new();
        hooks.register("slow", || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let draining = hooks.clone();
        let run = tokio::spawn(async move { draining.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let late = Arc::clone(&counter);
        hooks.register("late", move || async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            late.fetch_add(1, Ordering::SeqCst);
        });

        run.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
