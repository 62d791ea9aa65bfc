//! Beacon: Application Performance Monitoring Server
//!
//! Agents embedded in monitored applications push metric samples to the
//! server, which keeps a bounded in-memory window of them and evaluates
//! threshold alerting definitions against that window in near-real-time.
//!
//! # Features
//!
//! - **Threshold Alerting**: Upper and lower thresholds over a mean of recent samples
//! - **Breach Tracking**: One alert per breach, with the most extreme value observed
//! - **Debouncing**: Alerts close only after consecutive good checks
//! - **Alert Actions**: Ordered hooks for logging, registry updates and webhooks
//! - **Retention**: Automatic removal of old samples and closed alerts
//!
//! # Example
//!
//! ```no_run
//! use beacon::alerting::{
//!     AlertAction, AlertRegistry, AlertingActionService, AlertingDefinition, AlertingState,
//!     LogAction, ThresholdType,
//! };
//! use std::sync::Arc;
//!
//! let registry = Arc::new(AlertRegistry::new());
//! let actions: Vec<Arc<dyn AlertAction>> = vec![Arc::new(LogAction)];
//! let service = AlertingActionService::new(Arc::clone(&registry), actions);
//!
//! let definition = Arc::new(AlertingDefinition::new(
//!     "latency", "Slow checkout", "http", "duration_ms", 250.0, ThresholdType::UpperThreshold,
//! ));
//! let mut state = AlertingState::new(definition);
//!
//! state.set_last_check_time(1_700_000_000_000);
//! service.alert_starting(&mut state, 300.0).unwrap();
//! service.alert_ongoing(&mut state, 420.0).unwrap();
//! let closed = service.alert_ending(&mut state).unwrap();
//! println!("Closed alert: {:?}", closed);
//! ```

pub mod alerting;
pub mod api;
pub mod metrics;

// Re-export commonly used types
pub use alerting::{
    Alert, AlertRegistry, AlertingActionService, AlertingDefinition, AlertingError,
    AlertingState, ThresholdChecker, ThresholdType,
};
pub use metrics::{MetricSample, MetricStore};
