//! Health data model shared by the reporter and its consumers

use serde::{Deserialize, Serialize};

/// Status of one backend as seen by the health reporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// A live handle answered the operation listing
    Running,
    /// A handle was created by this probe; not yet queried
    Initializing,
    /// Creating or querying the handle failed
    Error,
    /// The probe did not complete
    #[default]
    Unknown,
}

/// Per-backend entry of the health document.
///
/// Field names are part of the public JSON contract (note the capitalised
/// `Status`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    #[serde(rename = "Status")]
    pub status: HealthStatus,
    /// Operation names, empty until a probe succeeds
    pub tools: Vec<String>,
    /// Error message, empty when there is none
    pub error: String,
}

impl BackendHealth {
    pub fn running(tools: Vec<String>) -> Self {
        Self {
            status: HealthStatus::Running,
            tools,
            error: String::new(),
        }
    }

    pub fn initializing() -> Self {
        Self {
            status: HealthStatus::Initializing,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            tools: Vec::new(),
            error: message.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_public_field_names() {
        let value = serde_json::to_value(BackendHealth::running(vec!["forecast".into()])).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "Status": "running", "tools": ["forecast"], "error": "" })
        );
    }

    #[test]
    fn unknown_is_default() {
        let health = BackendHealth::unknown();
        assert_eq!(health.status, HealthStatus::Unknown);
        assert!(health.tools.is_empty());
        assert!(health.error.is_empty());
    }
}
