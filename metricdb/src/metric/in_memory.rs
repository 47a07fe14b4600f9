//! The in-memory metric backend.
//!
//! Storage is two independently locked regions: the sample buffer and the
//! accumulated label set. Label reads never wait on sample writes and the
//! reverse. The cost is relaxed cross-field consistency: a concurrent reader
//! of [`Metric::labels`] may see a label key before or after the sample that
//! introduced it becomes visible to [`Metric::scan_samples`]. No operation
//! relies on the two being observed together.
//!
//! ## Ordering
//!
//! The sample buffer is kept sorted by sample time. Inserts carrying the
//! newest timestamp, the overwhelmingly common case, are plain appends. A
//! sample older than the newest stored one is placed after every stored
//! sample whose time is less than or equal to its own, so samples sharing a
//! timestamp stay in acceptance order. Scans can then binary search to the
//! start of their window and stop at the first sample past its end without
//! omitting anything.
//!
//! ## Blocking
//!
//! A scan holds the sample buffer's read lock for its full duration. Scans run
//! in parallel with one another and with label reads; inserts into the same
//! metric wait until in-flight scans finish.
//!
//! A scan visitor must not insert into the metric it is scanning, nor call
//! [`InMemoryMetric::len`] or [`Metric::scan_samples`] on it. The sample lock
//! is not re-entrant: once a writer is queued a nested read waits behind it,
//! and the writer waits on the outer scan. [`Metric::labels`] and
//! [`Metric::has_label`] take the label lock and are safe from a visitor.

#[cfg(not(loom))]
use std::sync::{
    RwLock,
    atomic::{AtomicU64, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    RwLock,
    atomic::{AtomicU64, Ordering},
};

use std::{
    collections::BTreeSet,
    sync::{Arc, PoisonError},
};

use tracing::debug;

use crate::{
    clock::{Clock, Timestamp},
    metric::{Insertion, Metric},
    sample::Sample,
};

/// A metric whose samples live in process memory.
#[derive(Debug)]
pub struct InMemoryMetric {
    key: String,
    clock: Arc<dyn Clock>,
    /// Sorted by [`Sample::time`], ties in acceptance order.
    samples: RwLock<Vec<Sample>>,
    labels: RwLock<BTreeSet<String>>,
    total_bytes: AtomicU64,
    last_insert_time: AtomicU64,
}

impl InMemoryMetric {
    /// Create a new, empty [`InMemoryMetric`].
    #[must_use]
    pub fn new(key: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: key.to_string(),
            clock,
            samples: RwLock::new(Vec::new()),
            labels: RwLock::new(BTreeSet::new()),
            total_bytes: AtomicU64::new(0),
            last_insert_time: AtomicU64::new(0),
        }
    }

    /// Number of samples stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no sample has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Metric for InMemoryMetric {
    fn key(&self) -> &str {
        &self.key
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn insert_sample_impl(&self, insertion: Insertion) {
        let (accepted_at, sample) = insertion.into_parts();

        {
            let mut labels = self.labels.write().unwrap_or_else(PoisonError::into_inner);
            for (key, _) in sample.labels() {
                if !labels.contains(key) {
                    labels.insert(key.clone());
                }
            }
        }

        let footprint = u64::try_from(sample.footprint()).unwrap_or(u64::MAX);
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        self.last_insert_time
            .fetch_max(accepted_at, Ordering::AcqRel);
        self.total_bytes.fetch_add(footprint, Ordering::Relaxed);

        let newest = samples.last().map_or(0, Sample::time);
        if sample.time() >= newest {
            samples.push(sample);
        } else {
            let time = sample.time();
            let position = samples.partition_point(|stored| stored.time() <= time);
            debug!(
                metric = %self.key,
                time,
                newest,
                "placing out-of-order sample at {position}"
            );
            samples.insert(position, sample);
        }
    }

    fn scan_samples(
        &self,
        time_begin: Timestamp,
        time_end: Timestamp,
        visit: &mut dyn FnMut(Sample) -> bool,
    ) {
        if time_begin >= time_end {
            return;
        }

        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let start = samples.partition_point(|sample| sample.time() < time_begin);
        for sample in &samples[start..] {
            if sample.time() >= time_end {
                break;
            }
            if !visit(sample.clone()) {
                break;
            }
        }
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn last_insert_time(&self) -> Timestamp {
        self.last_insert_time.load(Ordering::Acquire)
    }

    fn labels(&self) -> BTreeSet<String> {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn has_label(&self, name: &str) -> bool {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}
