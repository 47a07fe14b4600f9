//! The sample value type.

use std::mem;

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::clock::Timestamp;

/// A `(key, value)` label annotation.
///
/// Labels are an ordered sequence, not a map: duplicate keys are permitted and
/// order is whatever the caller supplied.
pub type Label = (String, String);

/// One measurement belonging to a metric.
///
/// A `Sample` never changes after construction. Backends hand out clones so
/// that callers cannot observe or disturb stored data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    time: Timestamp,
    value: f64,
    #[serde(serialize_with = "labels_as_object")]
    labels: Vec<Label>,
}

impl Sample {
    /// Create a new [`Sample`].
    #[must_use]
    pub fn new(time: Timestamp, value: f64, labels: Vec<Label>) -> Self {
        Self {
            time,
            value,
            labels,
        }
    }

    /// Time of the measurement, microseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// The measured value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Labels in the order they were supplied.
    #[inline]
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// The first value stored under `key`, if any.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Approximate number of bytes this sample occupies in memory.
    #[must_use]
    pub fn footprint(&self) -> usize {
        let strings: usize = self.labels.iter().map(|(k, v)| k.len() + v.len()).sum();
        mem::size_of::<Self>() + self.labels.len() * mem::size_of::<Label>() + strings
    }
}

// Emits labels as a JSON-style object in stored order. Duplicate keys are
// written as-is.
fn labels_as_object<S>(labels: &[Label], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(labels.len()))?;
    for (k, v) in labels {
        map.serialize_entry(k, v)?;
    }
    map.end()
}
