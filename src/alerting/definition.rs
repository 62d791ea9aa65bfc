//! Alerting definition types

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest time range a definition may aggregate over
pub const MAX_TIMERANGE: Duration = Duration::from_secs(366 * 24 * 3600);

/// Direction in which a metric violates its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdType {
    /// Breach when value > threshold
    UpperThreshold,
    /// Breach when value < threshold
    LowerThreshold,
}

impl ThresholdType {
    /// Whether `value` violates `threshold` in this direction
    pub fn is_violated(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdType::UpperThreshold => value > threshold,
            ThresholdType::LowerThreshold => value < threshold,
        }
    }

    /// The more severe of two values for this direction
    pub fn more_extreme(&self, current: f64, value: f64) -> f64 {
        match self {
            ThresholdType::UpperThreshold => current.max(value),
            ThresholdType::LowerThreshold => current.min(value),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdType::UpperThreshold => "UPPER_THRESHOLD",
            ThresholdType::LowerThreshold => "LOWER_THRESHOLD",
        }
    }
}

/// Immutable alerting definition
///
/// Loaded once from configuration and shared read-only between the
/// scheduler, the alerting states and every open alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertingDefinition {
    /// Unique definition ID
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Measurement the metric is read from
    pub measurement: String,
    /// Field of the measurement holding the value
    pub field: String,
    /// Tag filters a sample must match
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Threshold value
    pub threshold: f64,
    /// Threshold direction
    pub threshold_type: ThresholdType,
    /// Time range aggregated on each check
    #[serde(with = "duration_serde")]
    pub timerange: Duration,
    /// Notification recipients
    #[serde(default)]
    pub notification_emails: Vec<String>,
}

impl AlertingDefinition {
    /// Create a new definition
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        measurement: impl Into<String>,
        field: impl Into<String>,
        threshold: f64,
        threshold_type: ThresholdType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            measurement: measurement.into(),
            field: field.into(),
            tags: BTreeMap::new(),
            threshold,
            threshold_type,
            timerange: Duration::from_secs(60),
            notification_emails: Vec::new(),
        }
    }

    /// Set the aggregation time range
    pub fn with_timerange(mut self, timerange: Duration) -> Self {
        self.timerange = timerange;
        self
    }

    /// Add a tag filter
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a notification recipient
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.notification_emails.push(email.into());
        self
    }

    pub fn threshold_type(&self) -> ThresholdType {
        self.threshold_type
    }

    /// Time range in unix millis, saturating for out-of-range values
    pub fn timerange_millis(&self) -> i64 {
        i64::try_from(self.timerange.as_millis()).unwrap_or(i64::MAX)
    }

    /// Check the definition is usable by the scheduler
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::Invalid("id must not be empty".to_string()));
        }
        if self.measurement.trim().is_empty() || self.field.trim().is_empty() {
            return Err(DefinitionError::Invalid(format!(
                "definition '{}' needs a measurement and a field",
                self.id
            )));
        }
        if !self.threshold.is_finite() {
            return Err(DefinitionError::Invalid(format!(
                "definition '{}' has a non-finite threshold",
                self.id
            )));
        }
        if self.timerange.is_zero() {
            return Err(DefinitionError::Invalid(format!(
                "definition '{}' has an empty timerange",
                self.id
            )));
        }
        if self.timerange > MAX_TIMERANGE {
            return Err(DefinitionError::Invalid(format!(
                "definition '{}' has a timerange longer than {}s",
                self.id,
                MAX_TIMERANGE.as_secs()
            )));
        }
        Ok(())
    }
}

/// Load definitions from a JSON file holding an array of definitions
pub fn load_definitions(path: impl AsRef<Path>) -> Result<Vec<Arc<AlertingDefinition>>, DefinitionError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let definitions: Vec<AlertingDefinition> = serde_json::from_str(&contents)?;

    let mut loaded = Vec::with_capacity(definitions.len());
    for definition in definitions {
        definition.validate()?;
        if loaded.iter().any(|d: &Arc<AlertingDefinition>| d.id == definition.id) {
            return Err(DefinitionError::Duplicate(definition.id));
        }
        loaded.push(Arc::new(definition));
    }

    tracing::info!(
        path = %path.display(),
        count = loaded.len(),
        "Loaded alerting definitions"
    );

    Ok(loaded)
}

/// Definition loading errors
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Failed to read definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid definition: {0}")]
    Invalid(String),

    #[error("Duplicate definition id '{0}'")]
    Duplicate(String),
}

/// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}
