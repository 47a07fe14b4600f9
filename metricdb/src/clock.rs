//! Time sources for default-timestamp resolution.
//!
//! Every insert that arrives without a caller-supplied timestamp is stamped
//! with [`Clock::now`]. The same reading becomes the metric's last insert
//! time, so the clock must never run backwards from the point of view of a
//! single caller.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;

/// Microseconds since the Unix epoch.
pub type Timestamp = u64;

static SHARED: Lazy<Arc<RealClock>> = Lazy::new(|| Arc::new(RealClock::default()));

/// The source of "now" used by every metric backend.
pub trait Clock: fmt::Debug + Send + Sync {
    /// The current time in microseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// A clock that operates with respect to wall-clock time.
///
/// The wall clock may step backwards, NTP being what it is. This clock
/// remembers the largest value it has handed out and never returns anything
/// smaller.
#[derive(Debug, Default)]
pub struct RealClock {
    high_water: AtomicU64,
}

impl RealClock {
    /// The process-wide wall clock.
    #[must_use]
    pub fn shared() -> Arc<RealClock> {
        Arc::clone(&SHARED)
    }

    fn wall_micros() -> Timestamp {
        // A clock set before 1970 reads as the epoch.
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(since_epoch.as_micros()).unwrap_or(u64::MAX)
    }
}

impl Clock for RealClock {
    fn now(&self) -> Timestamp {
        let wall = Self::wall_micros();
        let previous = self.high_water.fetch_max(wall, Ordering::AcqRel);
        previous.max(wall)
    }
}

/// A clock that only moves when told to.
///
/// Useful for tests and for embedders that drive time themselves, for
/// instance when replaying a recorded stream.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a new [`ManualClock`] reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Set the current reading.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::Release);
    }

    /// Move the clock forward by `micros`, saturating at `u64::MAX`.
    pub fn advance(&self, micros: u64) {
        let mut current = self.now.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(micros);
            match self.now.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(x) => current = x,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}
