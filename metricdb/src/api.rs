//! The read/write contract offered to transport layers.
//!
//! A transport parses and validates requests, then calls into this module.
//! Nothing here fails for well-formed input: an unknown metric on the read
//! path is reported as `None`, never as an error. The response types
//! serialize to the JSON shapes served over HTTP.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, Timestamp},
    metric::Metric,
    repository::Repository,
    sample::{Label, Sample},
};

/// One sample to store under `metric`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Ingest {
    /// Key of the metric to insert into; created if unseen.
    pub metric: String,
    /// The measurement.
    pub value: f64,
    /// Labels in caller order.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Sample time. `None` stamps the sample with the time of acceptance.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Store one sample, creating its metric if needed.
pub fn ingest(repository: &Repository, ingest: Ingest) {
    let metric = repository.find_or_create(&ingest.metric);
    metric.insert_sample(ingest.value, ingest.labels, ingest.timestamp);
}

/// Summary of a single metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDescription {
    /// The metric's key.
    pub key: String,
    /// Backend-reported storage footprint.
    pub total_bytes: u64,
    /// Time of the most recently accepted insert.
    pub last_insert: Timestamp,
    /// Every label key ever inserted.
    pub labels: BTreeSet<String>,
}

impl MetricDescription {
    /// Describe `metric` as of now.
    #[must_use]
    pub fn of(metric: &dyn Metric) -> Self {
        Self {
            key: metric.key().to_string(),
            total_bytes: metric.total_bytes(),
            last_insert: metric.last_insert_time(),
            labels: metric.labels(),
        }
    }
}

/// Every registered metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricList {
    /// Descriptions sorted by key.
    pub metrics: Vec<MetricDescription>,
}

/// Describe every registered metric.
#[must_use]
pub fn list(repository: &Repository) -> MetricList {
    let metrics = repository
        .list()
        .iter()
        .map(|metric| MetricDescription::of(metric.as_ref()))
        .collect();
    MetricList { metrics }
}

/// A metric together with the samples read from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleScan {
    /// The metric, described after the scan completed.
    pub metric: MetricDescription,
    /// Samples in stored order.
    pub samples: Vec<Sample>,
}

/// Read every sample of `key` in `[time_begin, time_end)`.
///
/// Returns `None` if no metric is registered under `key`.
#[must_use]
pub fn scan(
    repository: &Repository,
    key: &str,
    time_begin: Timestamp,
    time_end: Timestamp,
) -> Option<SampleScan> {
    let metric = repository.find(key)?;
    let samples = metric.collect_samples(time_begin, time_end);
    Some(SampleScan {
        metric: MetricDescription::of(metric.as_ref()),
        samples,
    })
}

/// Read the full history of `key`, from the epoch up to and including now.
///
/// Returns `None` if no metric is registered under `key`.
#[must_use]
pub fn scan_history(repository: &Repository, key: &str) -> Option<SampleScan> {
    let now = repository.clock().now();
    scan(repository, key, 0, now.saturating_add(1))
}
