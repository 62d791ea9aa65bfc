//! Periodic threshold evaluation of alerting definitions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use tokio::time;

use super::alert::{Alert, AlertClosingReason, AlertId};
use super::definition::{AlertingDefinition, DefinitionError};
use super::registry::RegistryError;
use super::service::{AlertingActionService, AlertingError};
use super::state::{AlertingPhase, AlertingState};

/// Source of aggregated metric values
pub trait MetricSource: Send + Sync {
    /// Mean of `measurement.field` over samples matching `tags` in `[from, to]`
    fn mean(
        &self,
        measurement: &str,
        field: &str,
        tags: &BTreeMap<String, String>,
        from: i64,
        to: i64,
    ) -> Result<Option<f64>, CheckError>;
}

/// Result of evaluating one definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckOutcome {
    /// No samples and no open alert
    NoData,
    /// Within threshold and no open alert
    WithinThreshold,
    /// A new alert was opened
    Started,
    /// The open alert is still breaching
    Ongoing,
    /// Back within threshold, waiting for more good checks before closing
    Recovering,
    /// The open alert was closed
    Ended,
}

/// Point-in-time view of one alerting state
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub definition_id: String,
    pub definition_name: String,
    pub phase: AlertingPhase,
    pub last_check_time: i64,
    pub extreme_value: Option<f64>,
    pub alert_id: Option<String>,
}

impl From<&AlertingState> for StateSnapshot {
    fn from(state: &AlertingState) -> Self {
        Self {
            definition_id: state.definition().id.clone(),
            definition_name: state.definition().name.clone(),
            phase: state.phase(),
            last_check_time: state.last_check_time(),
            extreme_value: state.alert().and(state.extreme_value()),
            alert_id: state.alert().map(|a| a.id().to_string()),
        }
    }
}

/// Evaluates every alerting definition against fresh metric values
///
/// Owns one [`AlertingState`] per definition. Each state is only touched
/// while its map entry is locked, so one definition is never evaluated
/// twice at the same time while different definitions run in parallel.
pub struct ThresholdChecker {
    states: DashMap<String, AlertingState>,
    service: Arc<AlertingActionService>,
    source: Arc<dyn MetricSource>,
    /// Consecutive good checks needed to close an alert
    reset_checks: u32,
    running: Arc<AtomicBool>,
}

impl ThresholdChecker {
    pub fn new(service: Arc<AlertingActionService>, source: Arc<dyn MetricSource>) -> Self {
        Self {
            states: DashMap::new(),
            service,
            source,
            reset_checks: 1,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set how many consecutive good checks close an alert (at least 1)
    pub fn with_reset_checks(mut self, reset_checks: u32) -> Self {
        self.reset_checks = reset_checks.max(1);
        self
    }

    pub fn service(&self) -> &Arc<AlertingActionService> {
        &self.service
    }

    /// Start monitoring a definition
    ///
    /// Replacing a definition closes its open alert.
    pub fn add_definition(&self, definition: Arc<AlertingDefinition>) -> Result<(), CheckError> {
        definition.validate()?;

        let id = definition.id.clone();
        let state = AlertingState::new(definition);

        if let Some(mut previous) = self.states.insert(id.clone(), state) {
            let closed = self.close_open_alert(&mut previous, AlertClosingReason::DefinitionUpdated);
            if let Err(e) = closed {
                tracing::warn!(definition = %id, error = %e, "Failed to close replaced alert");
            }
            tracing::info!(definition = %id, "Alerting definition updated");
        } else {
            tracing::info!(definition = %id, "Alerting definition added");
        }

        Ok(())
    }

    /// Stop monitoring a definition, closing its open alert
    pub fn remove_definition(&self, id: &str) -> Option<Arc<AlertingDefinition>> {
        let (_, mut state) = self.states.remove(id)?;
        if let Err(e) = self.close_open_alert(&mut state, AlertClosingReason::DefinitionDeleted) {
            tracing::warn!(definition = %id, error = %e, "Failed to close removed alert");
        }
        tracing::info!(definition = %id, "Alerting definition removed");
        Some(Arc::clone(state.definition()))
    }

    /// Get a definition by ID
    pub fn definition(&self, id: &str) -> Option<Arc<AlertingDefinition>> {
        self.states.get(id).map(|s| Arc::clone(s.definition()))
    }

    /// List all definitions
    pub fn definitions(&self) -> Vec<Arc<AlertingDefinition>> {
        let mut definitions: Vec<Arc<AlertingDefinition>> = self
            .states
            .iter()
            .map(|s| Arc::clone(s.definition()))
            .collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Snapshot of every alerting state
    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        let mut snapshots: Vec<StateSnapshot> =
            self.states.iter().map(|s| StateSnapshot::from(s.value())).collect();
        snapshots.sort_by(|a, b| a.definition_id.cmp(&b.definition_id));
        snapshots
    }

    /// Snapshot of one alerting state
    pub fn snapshot(&self, id: &str) -> Option<StateSnapshot> {
        self.states.get(id).map(|s| StateSnapshot::from(s.value()))
    }

    /// Evaluate one definition at `now` (unix millis)
    pub fn check(&self, id: &str, now: i64) -> Result<CheckOutcome, CheckError> {
        let mut state = self
            .states
            .get_mut(id)
            .ok_or_else(|| CheckError::UnknownDefinition(id.to_string()))?;

        self.evaluate(&mut state, now)
    }

    /// Evaluate every definition whose time range has elapsed, in parallel
    ///
    /// A definition is due once `last_check_time + timerange <= now`, or
    /// when it has never been checked. A failing definition is logged and
    /// does not stop the others.
    pub fn check_all(&self, now: i64) -> Vec<(String, CheckOutcome)> {
        let ids: Vec<String> = self
            .states
            .iter()
            .filter(|s| is_due(s.value(), now))
            .map(|s| s.key().clone())
            .collect();

        ids.par_iter()
            .filter_map(|id| match self.check(id, now) {
                Ok(outcome) => Some((id.clone(), outcome)),
                Err(CheckError::UnknownDefinition(_)) => None,
                Err(e) => {
                    tracing::error!(definition = %id, error = %e, "Alert check failed");
                    None
                }
            })
            .collect()
    }

    fn evaluate(&self, state: &mut AlertingState, now: i64) -> Result<CheckOutcome, CheckError> {
        let definition = Arc::clone(state.definition());
        let from = now.saturating_sub(definition.timerange_millis());

        let value = self.source.mean(
            &definition.measurement,
            &definition.field,
            &definition.tags,
            from,
            now,
        )?;
        state.set_last_check_time(now);

        let breaching = value
            .filter(|v| definition.threshold_type.is_violated(*v, definition.threshold));

        let outcome = match (breaching, state.is_breaching()) {
            (Some(v), false) => {
                state.reset_valid_count();
                self.service.alert_starting(&mut *state, v)?;
                CheckOutcome::Started
            }
            (Some(v), true) => {
                state.reset_valid_count();
                self.service.alert_ongoing(&mut *state, v)?;
                CheckOutcome::Ongoing
            }
            (None, true) => {
                if state.increment_valid_count() >= self.reset_checks {
                    state.reset_valid_count();
                    self.service.alert_ending(&mut *state)?;
                    CheckOutcome::Ended
                } else {
                    CheckOutcome::Recovering
                }
            }
            (None, false) if value.is_none() => CheckOutcome::NoData,
            (None, false) => CheckOutcome::WithinThreshold,
        };

        tracing::trace!(
            definition = %definition.id,
            value = ?value,
            outcome = ?outcome,
            "Definition checked"
        );

        Ok(outcome)
    }

    /// Close an open alert by hand
    ///
    /// The owning state returns to idle; if the metric is still breaching
    /// the next check opens a new alert.
    pub fn close_alert(&self, id: &AlertId) -> Result<Alert, CheckError> {
        for mut state in self.states.iter_mut() {
            if state.alert().map(|a| a.id()) == Some(id) {
                state.reset_valid_count();
                return self
                    .close_open_alert(&mut state, AlertClosingReason::ManuallyClosed)?
                    .ok_or_else(|| CheckError::UnknownAlert(id.clone()));
            }
        }

        // not owned by any state, e.g. left over from a removed definition
        let now = chrono::Utc::now().timestamp_millis();
        self.service
            .registry()
            .close_manually(id, now)
            .map_err(|e| match e {
                RegistryError::NotFound(id) => CheckError::UnknownAlert(id),
                other => CheckError::Alerting(AlertingError::Registry(other)),
            })
    }

    /// Close the open alert of a state through the ending hooks
    fn close_open_alert(
        &self,
        state: &mut AlertingState,
        reason: AlertClosingReason,
    ) -> Result<Option<Alert>, AlertingError> {
        if !state.is_breaching() {
            return Ok(None);
        }

        let alert = self.service.alert_closing(&mut *state, reason)?;
        tracing::info!(
            alert_id = %alert.id(),
            definition = %alert.definition().id,
            reason = reason.as_str(),
            "Alert closed"
        );
        Ok(Some(alert))
    }

    /// Start the background checker
    pub fn start(self: Arc<Self>, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Threshold checker started with interval {:?}", check_interval);

            let mut ticker = time::interval(check_interval);

            while self.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }

                let now = chrono::Utc::now().timestamp_millis();
                let checker = Arc::clone(&self);
                let result = tokio::task::spawn_blocking(move || checker.check_all(now)).await;

                match result {
                    Ok(outcomes) => {
                        let changed = outcomes
                            .iter()
                            .filter(|(_, o)| matches!(o, CheckOutcome::Started | CheckOutcome::Ended))
                            .count();
                        if changed > 0 {
                            tracing::info!("Threshold checker changed {} alerts", changed);
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Threshold check task failed"),
                }
            }

            tracing::info!("Threshold checker stopped");
        })
    }

    /// Stop the checker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if checker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn is_due(state: &AlertingState, now: i64) -> bool {
    state.last_check_time() == 0
        || state
            .last_check_time()
            .saturating_add(state.definition().timerange_millis())
            <= now
}

/// Alert check errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Unknown alerting definition '{0}'")]
    UnknownDefinition(String),

    #[error("Alert '{0}' not found")]
    UnknownAlert(AlertId),

    #[error("Metric source error: {0}")]
    Source(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Alerting(#[from] AlertingError),
}
