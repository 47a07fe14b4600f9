//! The registry of live metrics.
//!
//! [`Repository`] is the single authority for metric identity and lifecycle.
//! It is the only component that constructs metrics, and it never removes
//! one: once registered, a metric is shared by reference with every caller
//! for as long as the repository lives.
//!
//! A repository is built once at startup and threaded, behind an `Arc`, into
//! whichever transport or query layer needs it.

#[cfg(not(loom))]
use std::sync::RwLock;

#[cfg(loom)]
use loom::sync::RwLock;

use std::{
    fmt,
    sync::{Arc, PoisonError},
};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    clock::{Clock, RealClock},
    metric::{Backend, Metric},
};

/// Owns the mapping from metric key to metric.
pub struct Repository {
    backend: Backend,
    clock: Arc<dyn Clock>,
    metrics: RwLock<FxHashMap<String, Arc<dyn Metric>>>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("backend", &self.backend)
            .field("clock", &self.clock)
            .field("metrics", &self.len())
            .finish()
    }
}

impl Repository {
    /// Create a new, empty [`Repository`] stamping default timestamps with
    /// the process-wide wall clock.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self::with_clock(backend, RealClock::shared())
    }

    /// Create a new, empty [`Repository`] whose metrics read `clock`.
    #[must_use]
    pub fn with_clock(backend: Backend, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            metrics: RwLock::new(FxHashMap::default()),
        }
    }

    /// The backend new metrics are built with.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The clock handed to every metric this repository builds.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Return the metric registered under `key`, registering a new one if
    /// there is none.
    ///
    /// Concurrent calls with the same unseen key build exactly one metric and
    /// all of them receive it.
    pub fn find_or_create(&self, key: &str) -> Arc<dyn Metric> {
        if let Some(metric) = self.find(key) {
            return metric;
        }

        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race between our read and write
        // locks.
        if let Some(metric) = metrics.get(key) {
            return Arc::clone(metric);
        }
        let metric = self.backend.build(key, Arc::clone(&self.clock));
        metrics.insert(key.to_string(), Arc::clone(&metric));
        debug!(backend = ?self.backend, "created metric {key}");
        metric
    }

    /// Return the metric registered under `key`. Never creates.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<Arc<dyn Metric>> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(Arc::clone)
    }

    /// Snapshot of every registered metric, sorted by key.
    ///
    /// Metrics registered while the snapshot is taken may or may not appear.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Metric>> {
        let mut metrics: Vec<_> = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect();
        metrics.sort_by(|a, b| a.key().cmp(b.key()));
        metrics
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no metric has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new(Backend::default())
    }
}
