//! Side-effect handlers invoked on alerting state transitions

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::alert::{Alert, AlertClosingReason};
use super::definition::ThresholdType;
use super::registry::AlertRegistry;
use super::state::AlertingState;

/// Handler reacting to alert transitions
///
/// Hooks run synchronously on the evaluating thread, so anything slow
/// should be handed off (see [`WebhookAction`]).
pub trait AlertAction: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// A breach started; `state.alert()` holds the new alert
    fn on_starting(&self, state: &AlertingState) -> Result<(), ActionError>;

    /// A breach continues; `state.extreme_value()` is up to date
    fn on_ongoing(&self, state: &AlertingState) -> Result<(), ActionError>;

    /// A breach ended; `state` is already idle and `alert` is the closed alert
    fn on_ending(&self, state: &AlertingState, alert: &Alert) -> Result<(), ActionError>;
}

/// Transition an [`AlertNotification`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertEvent {
    Starting,
    Ongoing,
    Ending,
}

/// Payload describing one alert transition
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub event: AlertEvent,
    pub alert_id: String,
    pub definition_id: String,
    pub definition_name: String,
    pub measurement: String,
    pub field: String,
    pub threshold: f64,
    pub threshold_type: ThresholdType,
    pub extreme_value: Option<f64>,
    pub start_timestamp: i64,
    pub close_timestamp: Option<i64>,
    pub closing_reason: Option<AlertClosingReason>,
    pub recipients: Vec<String>,
}

impl AlertNotification {
    pub fn new(event: AlertEvent, state: &AlertingState, alert: &Alert) -> Self {
        let definition = state.definition();
        Self {
            event,
            alert_id: alert.id().to_string(),
            definition_id: definition.id.clone(),
            definition_name: definition.name.clone(),
            measurement: definition.measurement.clone(),
            field: definition.field.clone(),
            threshold: definition.threshold,
            threshold_type: definition.threshold_type,
            extreme_value: state.extreme_value(),
            start_timestamp: alert.start_timestamp(),
            close_timestamp: alert.close_timestamp(),
            closing_reason: alert.closing_reason(),
            recipients: definition.notification_emails.clone(),
        }
    }

    /// Human-readable one-line summary
    pub fn message(&self) -> String {
        let extreme = self
            .extreme_value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        match self.event {
            AlertEvent::Starting => format!(
                "{}.{} violated {} {} (value {})",
                self.measurement,
                self.field,
                self.threshold_type.as_str(),
                self.threshold,
                extreme
            ),
            AlertEvent::Ongoing => format!(
                "{}.{} still violating {} {} (extreme {})",
                self.measurement,
                self.field,
                self.threshold_type.as_str(),
                self.threshold,
                extreme
            ),
            AlertEvent::Ending => format!(
                "{}.{} back within {} {} (extreme {})",
                self.measurement,
                self.field,
                self.threshold_type.as_str(),
                self.threshold,
                extreme
            ),
        }
    }
}

/// Logs every transition through tracing
pub struct LogAction;

impl AlertAction for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn on_starting(&self, state: &AlertingState) -> Result<(), ActionError> {
        let alert = state.alert().ok_or(ActionError::MissingAlert)?;
        let notification = AlertNotification::new(AlertEvent::Starting, state, alert);
        tracing::warn!(
            alert_id = %alert.id(),
            definition = %state.definition().name,
            "Alert started: {}",
            notification.message()
        );
        Ok(())
    }

    fn on_ongoing(&self, state: &AlertingState) -> Result<(), ActionError> {
        if let Some(alert) = state.alert() {
            tracing::debug!(
                alert_id = %alert.id(),
                definition = %state.definition().name,
                extreme_value = ?state.extreme_value(),
                "Alert ongoing"
            );
        }
        Ok(())
    }

    fn on_ending(&self, state: &AlertingState, alert: &Alert) -> Result<(), ActionError> {
        let notification = AlertNotification::new(AlertEvent::Ending, state, alert);
        tracing::info!(
            alert_id = %alert.id(),
            definition = %state.definition().name,
            "Alert closed: {}",
            notification.message()
        );
        Ok(())
    }
}

/// Queues notifications for asynchronous webhook delivery
pub struct WebhookAction {
    sender: mpsc::UnboundedSender<AlertNotification>,
    notify_ongoing: bool,
}

impl WebhookAction {
    pub fn new(sender: mpsc::UnboundedSender<AlertNotification>) -> Self {
        Self {
            sender,
            notify_ongoing: false,
        }
    }

    /// Also send a notification on every ongoing check
    pub fn with_ongoing(mut self, notify_ongoing: bool) -> Self {
        self.notify_ongoing = notify_ongoing;
        self
    }

    fn send(&self, notification: AlertNotification) -> Result<(), ActionError> {
        self.sender
            .send(notification)
            .map_err(|_| ActionError::ChannelClosed)
    }
}

impl AlertAction for WebhookAction {
    fn name(&self) -> &str {
        "webhook"
    }

    fn on_starting(&self, state: &AlertingState) -> Result<(), ActionError> {
        let alert = state.alert().ok_or(ActionError::MissingAlert)?;
        self.send(AlertNotification::new(AlertEvent::Starting, state, alert))
    }

    fn on_ongoing(&self, state: &AlertingState) -> Result<(), ActionError> {
        if !self.notify_ongoing {
            return Ok(());
        }
        let alert = state.alert().ok_or(ActionError::MissingAlert)?;
        self.send(AlertNotification::new(AlertEvent::Ongoing, state, alert))
    }

    fn on_ending(&self, state: &AlertingState, alert: &Alert) -> Result<(), ActionError> {
        self.send(AlertNotification::new(AlertEvent::Ending, state, alert))
    }
}

/// Hands closed alerts over to the registry
pub struct RegistrySyncAction {
    registry: Arc<AlertRegistry>,
}

impl RegistrySyncAction {
    pub fn new(registry: Arc<AlertRegistry>) -> Self {
        Self { registry }
    }
}

impl AlertAction for RegistrySyncAction {
    fn name(&self) -> &str {
        "registry"
    }

    fn on_starting(&self, _state: &AlertingState) -> Result<(), ActionError> {
        Ok(())
    }

    fn on_ongoing(&self, _state: &AlertingState) -> Result<(), ActionError> {
        Ok(())
    }

    fn on_ending(&self, _state: &AlertingState, alert: &Alert) -> Result<(), ActionError> {
        self.registry.close_alert(alert);
        Ok(())
    }
}

/// Action hook errors
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("State has no open alert")]
    MissingAlert,

    #[error("Notification channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Failed(String),
}
