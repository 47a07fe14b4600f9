//! An embeddable time-series metric store.
//!
//! Callers append numeric samples, tagged with labels, under a metric key and
//! later scan those samples within a time window in chronological order. The
//! pieces, leaves first:
//!
//! * [`Sample`] -- an immutable `(time, value, labels)` measurement.
//! * [`Metric`] -- the storage contract every backend satisfies, plus the one
//!   bit of shared behavior: default-timestamp resolution on insert.
//! * [`in_memory::InMemoryMetric`] -- the reference backend.
//! * [`Repository`] -- the single owner of every live metric, keyed by name.
//! * [`api`] and [`table`] -- the narrow read/write contract handed to
//!   transport and query layers.
//!
//! Every public operation on [`Metric`] and [`Repository`] is safe to call
//! from any number of threads at once. Nothing here is global: construct a
//! [`Repository`] once and pass it, behind an `Arc`, to whoever needs it.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod api;
pub mod clock;
pub mod metric;
pub mod repository;
pub mod sample;
pub mod table;

pub use clock::{Clock, ManualClock, RealClock, Timestamp};
pub use metric::{Backend, Insertion, Metric, in_memory};
pub use repository::Repository;
pub use sample::{Label, Sample};
