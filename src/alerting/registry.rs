//! Process-wide registry of alerts

use dashmap::DashMap;

use super::alert::{Alert, AlertClosingReason, AlertId};

/// Registry of open and recently closed alerts
///
/// Holds its own copy of every registered alert. The copy of an alert is
/// replaced with the closed version once the breach ends.
pub struct AlertRegistry {
    alerts: DashMap<AlertId, Alert>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
        }
    }

    /// Record a newly opened alert
    pub fn register_alert(&self, alert: Alert) -> Result<(), RegistryError> {
        let id = alert.id().clone();
        match self.alerts.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(RegistryError::Duplicate(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                tracing::debug!(
                    alert_id = %alert.id(),
                    definition = %alert.definition().id,
                    "Alert registered"
                );
                entry.insert(alert);
                Ok(())
            }
        }
    }

    /// Replace the registry copy with a closed alert
    pub fn close_alert(&self, alert: &Alert) {
        self.alerts.insert(alert.id().clone(), alert.clone());
    }

    /// Close an open alert by id, outside of the evaluation cycle
    pub fn close_manually(&self, id: &AlertId, now: i64) -> Result<Alert, RegistryError> {
        let mut entry = self
            .alerts
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        entry
            .close(now, AlertClosingReason::ManuallyClosed)
            .map_err(|_| RegistryError::AlreadyClosed(id.clone()))?;

        Ok(entry.value().clone())
    }

    /// Get an alert by ID
    pub fn get_alert(&self, id: &AlertId) -> Option<Alert> {
        self.alerts.get(id).map(|a| a.value().clone())
    }

    /// All alerts that are still open, oldest first
    pub fn open_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.is_open())
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.start_timestamp());
        alerts
    }

    /// All known alerts, oldest first
    pub fn all_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by_key(|a| a.start_timestamp());
        alerts
    }

    /// Alerts raised for one definition, oldest first
    pub fn alerts_for_definition(&self, definition_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.definition().id == definition_id)
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.start_timestamp());
        alerts
    }

    /// Drop closed alerts whose close timestamp is before `cutoff`
    pub fn expire_closed(&self, cutoff: i64) -> usize {
        let before = self.alerts.len();
        self.alerts
            .retain(|_, a| a.close_timestamp().map_or(true, |closed| closed >= cutoff));
        before - self.alerts.len()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl Default for AlertRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Alert '{0}' is already registered")]
    Duplicate(AlertId),

    #[error("Alert '{0}' not found")]
    NotFound(AlertId),

    #[error("Alert '{0}' is already closed")]
    AlreadyClosed(AlertId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::definition::{AlertingDefinition, ThresholdType};
    use std::sync::Arc;

    fn definition(id: &str) -> Arc<AlertingDefinition> {
        Arc::new(AlertingDefinition::new(
            id,
            id,
            "cpu",
            "utilization",
            50.0,
            ThresholdType::UpperThreshold,
        ))
    }

    #[test]
    fn test_register_and_query() {
        let registry = AlertRegistry::new();
        let first = Alert::new(definition("a"), 100);
        let second = Alert::new(definition("b"), 50);

        registry.register_alert(first.clone()).unwrap();
        registry.register_alert(second.clone()).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.open_alerts()[0].id(), second.id());
        assert_eq!(registry.alerts_for_definition("a").len(), 1);
        assert!(registry.get_alert(first.id()).is_some());
    }

    #[test]
    fn test_register_duplicate() {
        let registry = AlertRegistry::new();
        let alert = Alert::new(definition("a"), 100);

        registry.register_alert(alert.clone()).unwrap();
        assert!(matches!(
            registry.register_alert(alert),
            Err(RegistryError::Duplicate(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_alert_replaces_copy() {
        let registry = AlertRegistry::new();
        let mut alert = Alert::new(definition("a"), 100);
        registry.register_alert(alert.clone()).unwrap();

        alert.close(200, AlertClosingReason::AlertResolved).unwrap();
        registry.close_alert(&alert);

        assert!(registry.open_alerts().is_empty());
        let stored = registry.get_alert(alert.id()).unwrap();
        assert_eq!(stored.close_timestamp(), Some(200));
    }

    #[test]
    fn test_close_manually() {
        let registry = AlertRegistry::new();
        let alert = Alert::new(definition("a"), 100);
        registry.register_alert(alert.clone()).unwrap();

        let closed = registry.close_manually(alert.id(), 300).unwrap();
        assert_eq!(closed.closing_reason(), Some(AlertClosingReason::ManuallyClosed));

        assert!(matches!(
            registry.close_manually(alert.id(), 400),
            Err(RegistryError::AlreadyClosed(_))
        ));
        assert!(matches!(
            registry.close_manually(&AlertId::from("missing"), 400),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_expire_closed() {
        let registry = AlertRegistry::new();
        let mut old = Alert::new(definition("a"), 100);
        old.close(200, AlertClosingReason::AlertResolved).unwrap();
        let open = Alert::new(definition("b"), 150);

        registry.register_alert(old).unwrap();
        registry.register_alert(open.clone()).unwrap();

        assert_eq!(registry.expire_closed(1000), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_alert(open.id()).is_some());
    }
}
