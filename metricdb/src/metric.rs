//! The metric storage contract.
//!
//! A metric is a named, independently stored time series. [`Metric`] is the
//! capability set every storage backend provides: insert, scan, label
//! introspection and a little metadata. Callers only ever hold an
//! `Arc<dyn Metric>`; which backend sits behind it is decided by the
//! [`Repository`](crate::Repository) from its configured [`Backend`].
//!
//! ## Default timestamps
//!
//! [`Metric::insert_sample`] is the one piece of behavior shared by all
//! backends. When no timestamp is supplied the current reading of the
//! backend's [`Clock`] is substituted. That reading happens once per insert,
//! is handed to the backend inside an [`Insertion`] and becomes the metric's
//! last insert time. An [`Insertion`] can only be built here, so every insert
//! goes through this resolution.

use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, Timestamp},
    sample::{Label, Sample},
};

pub mod in_memory;

/// Storage strategies a [`Repository`](crate::Repository) can build metrics
/// with.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Samples live in process memory and are lost on restart.
    #[default]
    InMemory,
}

impl Backend {
    /// Construct a new, empty metric of this backend.
    #[must_use]
    pub fn build(self, key: &str, clock: Arc<dyn Clock>) -> Arc<dyn Metric> {
        match self {
            Backend::InMemory => Arc::new(in_memory::InMemoryMetric::new(key, clock)),
        }
    }
}

/// A sample accepted by [`Metric::insert_sample`], timestamp resolved.
#[derive(Debug)]
pub struct Insertion {
    accepted_at: Timestamp,
    sample: Sample,
}

impl Insertion {
    /// Decompose into the clock reading taken at acceptance and the sample
    /// to store.
    #[must_use]
    pub fn into_parts(self) -> (Timestamp, Sample) {
        (self.accepted_at, self.sample)
    }
}

/// The storage contract for a single metric.
///
/// IMPLEMENTATIONS MUST BE THREADSAFE. Every method may be called
/// concurrently with every other, from any number of threads.
pub trait Metric: fmt::Debug + Send + Sync {
    /// The metric's identity. Never changes.
    fn key(&self) -> &str;

    /// Clock used to resolve default timestamps.
    fn clock(&self) -> &dyn Clock;

    /// Store `insertion`. Only reachable through [`Metric::insert_sample`].
    fn insert_sample_impl(&self, insertion: Insertion);

    /// Visit every sample with `time_begin <= time < time_end` in stored
    /// order, stopping as soon as `visit` returns `false`.
    ///
    /// Each visited sample is a private copy. No partially inserted sample is
    /// ever visited.
    fn scan_samples(
        &self,
        time_begin: Timestamp,
        time_end: Timestamp,
        visit: &mut dyn FnMut(Sample) -> bool,
    );

    /// Storage footprint as reported by the backend. Advisory only.
    fn total_bytes(&self) -> u64;

    /// Clock reading of the most recently accepted insert, zero if none.
    fn last_insert_time(&self) -> Timestamp;

    /// Every distinct label key ever inserted into this metric.
    fn labels(&self) -> BTreeSet<String>;

    /// Whether label key `name` has ever been inserted into this metric.
    fn has_label(&self, name: &str) -> bool;

    /// Accept one measurement.
    ///
    /// If `timestamp` is `None` the sample is stamped with the clock reading
    /// taken at acceptance, which is also recorded as the last insert time.
    fn insert_sample(&self, value: f64, labels: Vec<Label>, timestamp: Option<Timestamp>) {
        let accepted_at = self.clock().now();
        let time = timestamp.unwrap_or(accepted_at);
        self.insert_sample_impl(Insertion {
            accepted_at,
            sample: Sample::new(time, value, labels),
        });
    }

    /// Gather every sample in `[time_begin, time_end)` into a `Vec`.
    fn collect_samples(&self, time_begin: Timestamp, time_end: Timestamp) -> Vec<Sample> {
        let mut samples = Vec::new();
        self.scan_samples(time_begin, time_end, &mut |sample| {
            samples.push(sample);
            true
        });
        samples
    }
}
