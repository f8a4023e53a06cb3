//! Clock abstraction.
//!
//! All time reads in the decision and refresh paths go through this trait so
//! tests can pin time instead of sleeping in real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, expressed as seconds since the Unix epoch.
///
/// Using a plain `f64` (rather than `std::time::Instant`) matches the wire
/// contract: `expiresAt`/`refreshedAt`/`lastTick` all round-trip through Unix
/// timestamps from the backend (spec.md §3, §6).
pub type Timestamp = f64;

/// Abstraction over wall-clock reads.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time, as Unix seconds.
    fn now(&self) -> Timestamp;
}

/// Real wall-clock implementation, backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Test double that returns a fixed, externally advanceable time.
///
/// Stored as bit-pattern `u64` behind an atomic so the clock can be shared
/// (`Arc<ManualClock>`) and advanced from a different thread than the one
/// reading it, without an `Arc<Mutex<f64>>` indirection.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock pinned at `now` (Unix seconds).
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    /// Move the clock forward (or backward) by `delta` seconds.
    pub fn advance(&self, delta: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        self.set(current + delta);
    }

    /// Pin the clock at an absolute Unix-seconds timestamp.
    pub fn set(&self, now: Timestamp) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
