//! Threshold alerting
//!
//! Each alerting definition owns an [`AlertingState`] that moves between
//! idle and breaching. The [`ThresholdChecker`] evaluates fresh metric
//! values and drives the transitions through the
//! [`AlertingActionService`], which opens, tracks and closes alerts and
//! fans each transition out to the configured [`AlertAction`]s.

pub mod action;
pub mod alert;
pub mod checker;
pub mod definition;
pub mod dispatcher;
pub mod registry;
pub mod service;
pub mod state;

pub use action::{
    ActionError, AlertAction, AlertEvent, AlertNotification, LogAction, RegistrySyncAction,
    WebhookAction,
};
pub use alert::{Alert, AlertClosingReason, AlertId};
pub use checker::{CheckError, CheckOutcome, MetricSource, StateSnapshot, ThresholdChecker};
pub use definition::{
    load_definitions, AlertingDefinition, DefinitionError, ThresholdType, MAX_TIMERANGE,
};
pub use dispatcher::{DispatchError, NotificationDispatcher};
pub use registry::{AlertRegistry, RegistryError};
pub use service::{AlertingActionService, AlertingError};
pub use state::{AlertingPhase, AlertingState};
