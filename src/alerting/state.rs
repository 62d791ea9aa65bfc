//! Per-definition runtime alerting state

use std::sync::Arc;

use serde::Serialize;

use super::alert::Alert;
use super::definition::AlertingDefinition;

/// Implicit phase of an alerting state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertingPhase {
    /// No open alert
    Idle,
    /// An alert is open
    Breaching,
}

/// Mutable runtime record of one alerting definition
///
/// `alert` is present exactly while the definition is breaching, and
/// `extreme_value` only carries meaning during that time.
#[derive(Debug)]
pub struct AlertingState {
    definition: Arc<AlertingDefinition>,
    last_check_time: i64,
    extreme_value: Option<f64>,
    alert: Option<Alert>,
    /// Consecutive non-breaching checks while an alert is open
    valid_count: u32,
}

impl AlertingState {
    /// Create an idle state for `definition`
    pub fn new(definition: Arc<AlertingDefinition>) -> Self {
        Self {
            definition,
            last_check_time: 0,
            extreme_value: None,
            alert: None,
            valid_count: 0,
        }
    }

    pub fn definition(&self) -> &Arc<AlertingDefinition> {
        &self.definition
    }

    /// Timestamp (unix millis) of the most recently evaluated sample
    pub fn last_check_time(&self) -> i64 {
        self.last_check_time
    }

    pub fn set_last_check_time(&mut self, timestamp: i64) {
        self.last_check_time = timestamp;
    }

    /// Most severe value seen during the current breach
    pub fn extreme_value(&self) -> Option<f64> {
        self.extreme_value
    }

    pub(crate) fn set_extreme_value(&mut self, value: f64) {
        self.extreme_value = Some(value);
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub(crate) fn set_alert(&mut self, alert: Alert) {
        self.alert = Some(alert);
    }

    /// Detach the open alert, returning the state to idle
    pub(crate) fn take_alert(&mut self) -> Option<Alert> {
        self.alert.take()
    }

    pub fn phase(&self) -> AlertingPhase {
        if self.alert.is_some() {
            AlertingPhase::Breaching
        } else {
            AlertingPhase::Idle
        }
    }

    pub fn is_breaching(&self) -> bool {
        self.phase() == AlertingPhase::Breaching
    }

    pub fn valid_count(&self) -> u32 {
        self.valid_count
    }

    pub(crate) fn increment_valid_count(&mut self) -> u32 {
        self.valid_count += 1;
        self.valid_count
    }

    pub(crate) fn reset_valid_count(&mut self) {
        self.valid_count = 0;
    }
}
