//! Alert state transitions and action dispatch

use std::sync::Arc;

use super::action::{ActionError, AlertAction};
use super::alert::{Alert, AlertClosingReason, AlertId};
use super::registry::{AlertRegistry, RegistryError};
use super::state::AlertingState;

/// Drives the alert lifecycle of alerting states
///
/// Every transition mutates the registry and the state before any action
/// hook runs. Calls for one state must be serialized by the caller; calls
/// for different states may run in parallel.
pub struct AlertingActionService {
    registry: Arc<AlertRegistry>,
    actions: Vec<Arc<dyn AlertAction>>,
}

impl AlertingActionService {
    pub fn new(registry: Arc<AlertRegistry>, actions: Vec<Arc<dyn AlertAction>>) -> Self {
        Self { registry, actions }
    }

    pub fn registry(&self) -> &Arc<AlertRegistry> {
        &self.registry
    }

    pub fn actions(&self) -> &[Arc<dyn AlertAction>] {
        &self.actions
    }

    /// A breach begins: open, register and attach a new alert
    ///
    /// The alert starts at the state's `last_check_time`, the time of the
    /// sample that triggered the breach.
    pub fn alert_starting<'a>(
        &self,
        state: impl Into<Option<&'a mut AlertingState>>,
        value: f64,
    ) -> Result<(), AlertingError> {
        let state = state.into().ok_or(AlertingError::InvalidArgument)?;

        let alert = Alert::new(Arc::clone(state.definition()), state.last_check_time());
        self.register_and_attach(state, alert, value)
    }

    /// Register `alert`, attach it to `state`, then run the starting hooks
    ///
    /// Nothing on the state changes when registration fails.
    fn register_and_attach(
        &self,
        state: &mut AlertingState,
        alert: Alert,
        value: f64,
    ) -> Result<(), AlertingError> {
        tracing::debug!(
            alert_id = %alert.id(),
            definition = %state.definition().id,
            value,
            "Alert starting"
        );

        self.registry.register_alert(alert.clone())?;
        state.set_alert(alert);
        state.set_extreme_value(value);

        let state: &AlertingState = state;
        self.dispatch(|action| action.on_starting(state))
    }

    /// A breach continues: track the most extreme value
    pub fn alert_ongoing<'a>(
        &self,
        state: impl Into<Option<&'a mut AlertingState>>,
        value: f64,
    ) -> Result<(), AlertingError> {
        let state = state.into().ok_or(AlertingError::InvalidArgument)?;

        let extreme = match state.extreme_value() {
            Some(current) => state.definition().threshold_type().more_extreme(current, value),
            None => value,
        };
        state.set_extreme_value(extreme);

        let state: &AlertingState = state;
        self.dispatch(|action| action.on_ongoing(state))
    }

    /// A breach ended: close the open alert and detach it from the state
    ///
    /// Hooks see the state already idle and receive the closed alert. The
    /// closed alert is returned to the caller.
    pub fn alert_ending<'a>(
        &self,
        state: impl Into<Option<&'a mut AlertingState>>,
    ) -> Result<Alert, AlertingError> {
        self.alert_closing(state, AlertClosingReason::AlertResolved)
    }

    /// Close the open alert of a state for `reason`
    ///
    /// Same transition as [`alert_ending`](Self::alert_ending), used when
    /// an alert is closed by hand or its definition goes away.
    pub fn alert_closing<'a>(
        &self,
        state: impl Into<Option<&'a mut AlertingState>>,
        reason: AlertClosingReason,
    ) -> Result<Alert, AlertingError> {
        let state = state.into().ok_or(AlertingError::InvalidArgument)?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut alert = state
            .take_alert()
            .ok_or_else(|| AlertingError::NoOpenAlert(state.definition().id.clone()))?;

        if let Err(e) = alert.close(now, reason) {
            state.set_alert(alert);
            return Err(e);
        }

        tracing::debug!(
            alert_id = %alert.id(),
            definition = %state.definition().id,
            extreme_value = ?state.extreme_value(),
            reason = reason.as_str(),
            "Alert ending"
        );

        let state: &AlertingState = state;
        self.dispatch(|action| action.on_ending(state, &alert))?;

        Ok(alert)
    }

    /// Run `hook` for every action in order, stopping at the first failure
    fn dispatch<F>(&self, mut hook: F) -> Result<(), AlertingError>
    where
        F: FnMut(&dyn AlertAction) -> Result<(), ActionError>,
    {
        for action in &self.actions {
            hook(action.as_ref()).map_err(|source| AlertingError::Action {
                action: action.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Alerting errors
#[derive(Debug, thiserror::Error)]
pub enum AlertingError {
    #[error("Invalid argument: alerting state must be present")]
    InvalidArgument,

    #[error("No open alert for definition '{0}'")]
    NoOpenAlert(String),

    #[error("Alert '{0}' is already closed")]
    AlreadyClosed(AlertId),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Alert action '{action}' failed: {source}")]
    Action {
        action: String,
        #[source]
        source: ActionError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::definition::{AlertingDefinition, ThresholdType};
    use crate::alerting::state::AlertingPhase;
    use parking_lot::Mutex;

    /// What an action observed when one of its hooks ran
    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        action: String,
        hook: &'static str,
        phase: AlertingPhase,
        extreme: Option<f64>,
        registered: usize,
    }

    struct RecordingAction {
        name: String,
        calls: Arc<Mutex<Vec<Call>>>,
        registry: Arc<AlertRegistry>,
        fail: bool,
    }

    impl RecordingAction {
        fn record(&self, hook: &'static str, state: &AlertingState) -> Result<(), ActionError> {
            self.calls.lock().push(Call {
                action: self.name.clone(),
                hook,
                phase: state.phase(),
                extreme: state.extreme_value(),
                registered: self.registry.len(),
            });
            if self.fail {
                Err(ActionError::Failed(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    impl AlertAction for RecordingAction {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_starting(&self, state: &AlertingState) -> Result<(), ActionError> {
            self.record("starting", state)
        }

        fn on_ongoing(&self, state: &AlertingState) -> Result<(), ActionError> {
            self.record("ongoing", state)
        }

        fn on_ending(&self, state: &AlertingState, alert: &Alert) -> Result<(), ActionError> {
            assert!(alert.is_closed());
            self.record("ending", state)
        }
    }

    struct Fixture {
        service: AlertingActionService,
        registry: Arc<AlertRegistry>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    fn fixture(actions: &[(&str, bool)]) -> Fixture {
        let registry = Arc::new(AlertRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let actions: Vec<Arc<dyn AlertAction>> = actions
            .iter()
            .map(|(name, fail)| {
                Arc::new(RecordingAction {
                    name: name.to_string(),
                    calls: Arc::clone(&calls),
                    registry: Arc::clone(&registry),
                    fail: *fail,
                }) as Arc<dyn AlertAction>
            })
            .collect();

        Fixture {
            service: AlertingActionService::new(Arc::clone(&registry), actions),
            registry,
            calls,
        }
    }

    fn state(threshold_type: ThresholdType) -> AlertingState {
        let def = Arc::new(AlertingDefinition::new(
            "def",
            "Def",
            "http",
            "duration_ms",
            100.0,
            threshold_type,
        ));
        let mut state = AlertingState::new(def);
        state.set_last_check_time(1234);
        state
    }

    fn hooks(calls: &Arc<Mutex<Vec<Call>>>) -> Vec<(String, &'static str)> {
        calls
            .lock()
            .iter()
            .map(|c| (c.action.clone(), c.hook))
            .collect()
    }

    #[test]
    fn test_alert_starting() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);

        f.service.alert_starting(&mut state, 1.0).unwrap();

        let alert = state.alert().unwrap();
        assert_eq!(alert.start_timestamp(), 1234);
        assert!(Arc::ptr_eq(alert.definition(), state.definition()));
        assert_eq!(state.extreme_value(), Some(1.0));

        let registered = f.registry.all_alerts();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].id(), alert.id());
        assert_eq!(registered[0].start_timestamp(), 1234);

        let calls = f.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].hook, "starting");
        // registered and breaching before any hook runs
        assert_eq!(calls[0].phase, AlertingPhase::Breaching);
        assert_eq!(calls[0].extreme, Some(1.0));
        assert_eq!(calls[0].registered, 1);
    }

    #[test]
    fn test_absent_state_is_invalid_argument() {
        let f = fixture(&[("first", false)]);

        assert!(matches!(
            f.service.alert_starting(None::<&mut AlertingState>, 1.0),
            Err(AlertingError::InvalidArgument)
        ));
        assert!(matches!(
            f.service.alert_ongoing(None::<&mut AlertingState>, 1.0),
            Err(AlertingError::InvalidArgument)
        ));
        assert!(matches!(
            f.service.alert_ending(None::<&mut AlertingState>),
            Err(AlertingError::InvalidArgument)
        ));

        assert!(f.registry.is_empty());
        assert!(f.calls.lock().is_empty());
    }

    #[test]
    fn test_upper_threshold_new_extreme_value() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 5.0).unwrap();

        f.service.alert_ongoing(&mut state, 10.0).unwrap();
        assert_eq!(state.extreme_value(), Some(10.0));
    }

    #[test]
    fn test_upper_threshold_keeps_extreme_value() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 5.0).unwrap();

        f.service.alert_ongoing(&mut state, 3.0).unwrap();
        assert_eq!(state.extreme_value(), Some(5.0));
    }

    #[test]
    fn test_lower_threshold_new_extreme_value() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::LowerThreshold);
        f.service.alert_starting(&mut state, 5.0).unwrap();

        f.service.alert_ongoing(&mut state, 3.0).unwrap();
        assert_eq!(state.extreme_value(), Some(3.0));
    }

    #[test]
    fn test_lower_threshold_keeps_extreme_value() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::LowerThreshold);
        f.service.alert_starting(&mut state, 5.0).unwrap();

        f.service.alert_ongoing(&mut state, 10.0).unwrap();
        assert_eq!(state.extreme_value(), Some(5.0));
    }

    #[test]
    fn test_lower_threshold_sequence() {
        let f = fixture(&[]);
        let mut state = state(ThresholdType::LowerThreshold);
        f.service.alert_starting(&mut state, 5.0).unwrap();

        let mut extremes = Vec::new();
        for value in [5.0, 3.0, 10.0] {
            f.service.alert_ongoing(&mut state, value).unwrap();
            extremes.push(state.extreme_value().unwrap());
        }
        assert_eq!(extremes, vec![5.0, 3.0, 3.0]);
    }

    #[test]
    fn test_ongoing_tracks_max_and_min() {
        let values = [4.0, -2.5, 17.0, 16.9, 0.0, 17.0, -3.0];

        let f = fixture(&[]);
        let mut upper = state(ThresholdType::UpperThreshold);
        let mut lower = state(ThresholdType::LowerThreshold);
        f.service.alert_starting(&mut upper, 1.0).unwrap();
        f.service.alert_starting(&mut lower, 1.0).unwrap();

        for value in values {
            f.service.alert_ongoing(&mut upper, value).unwrap();
            f.service.alert_ongoing(&mut lower, value).unwrap();
        }

        assert_eq!(upper.extreme_value(), Some(17.0));
        assert_eq!(lower.extreme_value(), Some(-3.0));
    }

    #[test]
    fn test_ongoing_equal_value_calls_every_hook_once() {
        let f = fixture(&[("first", false), ("second", false), ("third", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 7.0).unwrap();
        f.calls.lock().clear();

        f.service.alert_ongoing(&mut state, 7.0).unwrap();

        assert_eq!(state.extreme_value(), Some(7.0));
        assert_eq!(
            hooks(&f.calls),
            vec![
                ("first".to_string(), "ongoing"),
                ("second".to_string(), "ongoing"),
                ("third".to_string(), "ongoing"),
            ]
        );
    }

    #[test]
    fn test_ongoing_does_not_touch_registry() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 7.0).unwrap();

        f.service.alert_ongoing(&mut state, 9.0).unwrap();

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.registry.open_alerts().len(), 1);
    }

    #[test]
    fn test_alert_ending() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 7.0).unwrap();
        f.calls.lock().clear();

        let left = chrono::Utc::now().timestamp_millis();
        let closed = f.service.alert_ending(&mut state).unwrap();
        let right = chrono::Utc::now().timestamp_millis();

        assert!(state.alert().is_none());
        assert_eq!(closed.closing_reason(), Some(AlertClosingReason::AlertResolved));
        let closed_at = closed.close_timestamp().unwrap();
        assert!(closed_at >= left && closed_at <= right);

        let calls = f.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].hook, "ending");
        assert_eq!(calls[0].phase, AlertingPhase::Idle);

        // the service leaves the registry copy to the closing actions
        assert_eq!(f.registry.open_alerts().len(), 1);
    }

    #[test]
    fn test_ending_without_open_alert() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);

        assert!(matches!(
            f.service.alert_ending(&mut state),
            Err(AlertingError::NoOpenAlert(id)) if id == "def"
        ));
        assert!(f.calls.lock().is_empty());
    }

    #[test]
    fn test_full_breach_cycle() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);

        f.service.alert_starting(&mut state, 1.0).unwrap();
        assert_eq!(state.extreme_value(), Some(1.0));
        assert_eq!(f.registry.len(), 1);

        f.service.alert_ongoing(&mut state, 10.0).unwrap();
        assert_eq!(state.extreme_value(), Some(10.0));

        f.service.alert_ongoing(&mut state, 3.0).unwrap();
        assert_eq!(state.extreme_value(), Some(10.0));

        let closed = f.service.alert_ending(&mut state).unwrap();
        assert!(closed.is_closed());
        assert!(state.alert().is_none());

        // the same definition can breach again
        state.set_last_check_time(5000);
        f.service.alert_starting(&mut state, 2.0).unwrap();
        assert_eq!(state.alert().unwrap().start_timestamp(), 5000);
        assert_ne!(state.alert().unwrap().id(), closed.id());
        assert_eq!(f.registry.len(), 2);

        assert_eq!(
            hooks(&f.calls),
            vec![
                ("first".to_string(), "starting"),
                ("first".to_string(), "ongoing"),
                ("first".to_string(), "ongoing"),
                ("first".to_string(), "ending"),
                ("first".to_string(), "starting"),
            ]
        );
    }

    #[test]
    fn test_failing_action_aborts_dispatch() {
        let f = fixture(&[("first", false), ("broken", true), ("third", false)]);
        let mut state = state(ThresholdType::UpperThreshold);

        let err = f.service.alert_starting(&mut state, 1.0).unwrap_err();
        assert!(matches!(err, AlertingError::Action { ref action, .. } if action == "broken"));

        // mutations made before the failing hook stay in place
        assert!(state.is_breaching());
        assert_eq!(f.registry.len(), 1);
        assert_eq!(
            hooks(&f.calls),
            vec![
                ("first".to_string(), "starting"),
                ("broken".to_string(), "starting"),
            ]
        );
    }

    #[test]
    fn test_failing_action_on_ending_keeps_state_idle() {
        let f = fixture(&[("broken", true)]);
        let mut state = state(ThresholdType::UpperThreshold);
        let _ = f.service.alert_starting(&mut state, 1.0);

        assert!(f.service.alert_ending(&mut state).is_err());
        assert!(state.alert().is_none());
    }

    #[test]
    fn test_parallel_states() {
        let f = fixture(&[("first", false)]);
        let mut states: Vec<AlertingState> = (0..8)
            .map(|_| state(ThresholdType::UpperThreshold))
            .collect();

        std::thread::scope(|scope| {
            for state in states.iter_mut() {
                let service = &f.service;
                scope.spawn(move || {
                    service.alert_starting(&mut *state, 1.0).unwrap();
                    for v in 0..50 {
                        service.alert_ongoing(&mut *state, v as f64).unwrap();
                    }
                });
            }
        });

        assert_eq!(f.registry.len(), 8);
        assert!(states.iter().all(|s| s.extreme_value() == Some(49.0)));
        assert_eq!(f.calls.lock().len(), 8 * 51);
    }

    #[test]
    fn test_alert_closing_with_reason() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);
        f.service.alert_starting(&mut state, 7.0).unwrap();

        let closed = f
            .service
            .alert_closing(&mut state, AlertClosingReason::ManuallyClosed)
            .unwrap();

        assert_eq!(closed.closing_reason(), Some(AlertClosingReason::ManuallyClosed));
        assert!(state.alert().is_none());
        assert_eq!(
            hooks(&f.calls),
            vec![
                ("first".to_string(), "starting"),
                ("first".to_string(), "ending"),
            ]
        );
    }

    #[test]
    fn test_duplicate_registration_leaves_state_untouched() {
        let f = fixture(&[("first", false)]);
        let mut state = state(ThresholdType::UpperThreshold);

        // an alert with the same id is already registered
        let blocker = Alert::new(Arc::clone(state.definition()), 1234);
        f.registry.register_alert(blocker.clone()).unwrap();
        let err = f
            .service
            .register_and_attach(&mut state, blocker.clone(), 1.0)
            .unwrap_err();

        assert!(matches!(
            err,
            AlertingError::Registry(RegistryError::Duplicate(ref id)) if id == blocker.id()
        ));
        assert!(state.alert().is_none());
        assert_eq!(state.extreme_value(), None);
        assert_eq!(f.registry.len(), 1);
        assert!(f.calls.lock().is_empty());
    }
}
