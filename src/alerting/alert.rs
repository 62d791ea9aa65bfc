//! Alert records for breach episodes

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::definition::AlertingDefinition;
use super::service::AlertingError;

/// Unique alert identifier (16 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlertId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AlertId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an alert was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertClosingReason {
    /// The metric returned within its threshold
    AlertResolved,
    /// The alerting definition was deleted while the alert was open
    DefinitionDeleted,
    /// The alerting definition was replaced while the alert was open
    DefinitionUpdated,
    /// Closed through the API
    ManuallyClosed,
}

impl AlertClosingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertClosingReason::AlertResolved => "ALERT_RESOLVED",
            AlertClosingReason::DefinitionDeleted => "DEFINITION_DELETED",
            AlertClosingReason::DefinitionUpdated => "DEFINITION_UPDATED",
            AlertClosingReason::ManuallyClosed => "MANUALLY_CLOSED",
        }
    }
}

/// One breach episode, from start to close
#[derive(Debug, Clone)]
pub struct Alert {
    id: AlertId,
    definition: Arc<AlertingDefinition>,
    start_timestamp: i64,
    close_timestamp: Option<i64>,
    closing_reason: Option<AlertClosingReason>,
}

impl Alert {
    /// Open a new alert for `definition`, starting at `start_timestamp` (unix millis)
    pub fn new(definition: Arc<AlertingDefinition>, start_timestamp: i64) -> Self {
        Self {
            id: AlertId::generate(),
            definition,
            start_timestamp,
            close_timestamp: None,
            closing_reason: None,
        }
    }

    /// Close the alert. Closed alerts are immutable.
    pub fn close(&mut self, timestamp: i64, reason: AlertClosingReason) -> Result<(), AlertingError> {
        if self.is_closed() {
            return Err(AlertingError::AlreadyClosed(self.id.clone()));
        }
        self.close_timestamp = Some(timestamp);
        self.closing_reason = Some(reason);
        Ok(())
    }

    pub fn id(&self) -> &AlertId {
        &self.id
    }

    pub fn definition(&self) -> &Arc<AlertingDefinition> {
        &self.definition
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn close_timestamp(&self) -> Option<i64> {
        self.close_timestamp
    }

    pub fn closing_reason(&self) -> Option<AlertClosingReason> {
        self.closing_reason
    }

    pub fn is_open(&self) -> bool {
        self.close_timestamp.is_none()
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }
}
