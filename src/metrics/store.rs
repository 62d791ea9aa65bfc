use std::collections::{BTreeMap, VecDeque};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::alerting::{CheckError, MetricSource};

/// One metric sample reported by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub measurement: String,
    pub field: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Unix millis
    pub timestamp: i64,
    pub value: f64,
}

impl MetricSample {
    pub fn new(measurement: impl Into<String>, field: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            measurement: measurement.into(),
            field: field.into(),
            tags: BTreeMap::new(),
            timestamp,
            value,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Identity of a series: measurement, field and full tag set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    measurement: String,
    field: String,
    tags: BTreeMap<String, String>,
}

impl SeriesKey {
    fn matches(&self, measurement: &str, field: &str, tags: &BTreeMap<String, String>) -> bool {
        self.measurement == measurement
            && self.field == field
            && tags.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}

/// In-memory buffer of recent metric samples
pub struct MetricStore {
    series: DashMap<SeriesKey, RwLock<VecDeque<(i64, f64)>>>,
    /// Oldest samples are dropped once a series holds this many
    max_samples_per_series: usize,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::with_series_limit(100_000)
    }

    pub fn with_series_limit(max_samples_per_series: usize) -> Self {
        Self {
            series: DashMap::new(),
            max_samples_per_series: max_samples_per_series.max(1),
        }
    }

    /// Insert a single sample
    pub fn insert(&self, sample: MetricSample) -> Result<(), MetricError> {
        if !sample.value.is_finite() {
            return Err(MetricError::InvalidValue(sample.value));
        }
        if sample.measurement.is_empty() || sample.field.is_empty() {
            return Err(MetricError::MissingName);
        }

        let key = SeriesKey {
            measurement: sample.measurement,
            field: sample.field,
            tags: sample.tags,
        };

        let series = self
            .series
            .entry(key)
            .or_insert_with(|| RwLock::new(VecDeque::new()));
        let mut samples = series.write();
        if samples.len() >= self.max_samples_per_series {
            samples.pop_front();
        }
        samples.push_back((sample.timestamp, sample.value));

        Ok(())
    }

    /// Insert multiple samples, skipping invalid ones
    pub fn insert_batch(&self, samples: Vec<MetricSample>) -> usize {
        let mut inserted = 0;

        for sample in samples {
            match self.insert(sample) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    tracing::warn!("Failed to insert sample: {}", e);
                }
            }
        }

        inserted
    }

    /// Mean of all matching samples with `from <= timestamp <= to`
    pub fn mean_between(
        &self,
        measurement: &str,
        field: &str,
        tags: &BTreeMap<String, String>,
        from: i64,
        to: i64,
    ) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;

        for entry in self.series.iter() {
            if !entry.key().matches(measurement, field, tags) {
                continue;
            }
            for (ts, value) in entry.value().read().iter() {
                if *ts >= from && *ts <= to {
                    sum += value;
                    count += 1;
                }
            }
        }

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Remove samples older than `cutoff`, dropping empty series
    pub fn expire_before(&self, cutoff: i64) -> usize {
        let mut expired = 0;

        for entry in self.series.iter() {
            let mut samples = entry.value().write();
            let before = samples.len();
            samples.retain(|(ts, _)| *ts >= cutoff);
            expired += before - samples.len();
        }

        self.series.retain(|_, samples| !samples.read().is_empty());
        expired
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|s| s.value().read().len()).sum()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for MetricStore {
    fn mean(
        &self,
        measurement: &str,
        field: &str,
        tags: &BTreeMap<String, String>,
        from: i64,
        to: i64,
    ) -> Result<Option<f64>, CheckError> {
        Ok(self.mean_between(measurement, field, tags, from, to))
    }
}

/// Metric store errors
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("Sample value {0} is not finite")]
    InvalidValue(f64),

    #[error("Sample needs a measurement and a field")]
    MissingName,
}
