//! Time sources.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic and wall-clock time, both in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's origin. Never goes backwards.
    fn now_ms(&self) -> f64;

    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> i64;
}

/// Real clock. `now_ms` counts from the moment the clock was created,
/// matching the page's time origin.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn epoch_ms(&self) -> i64 {
        epoch_ms_now()
    }
}

/// Current wall-clock time in epoch milliseconds. Clamps to 0 if the system
/// clock is set before 1970.
pub fn epoch_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A clock that only moves when told to.
///
/// Monotonic time is stored as raw `f64` bits so the clock can be shared
/// across tasks without a lock.
#[derive(Debug)]
pub struct ManualClock {
    now_bits: AtomicU64,
    epoch_ms: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `now_ms` on the monotonic axis and epoch 0.
    pub fn new(now_ms: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(now_ms.to_bits()),
            epoch_ms: AtomicI64::new(0),
        }
    }

    /// Set the wall-clock reading.
    pub fn with_epoch_ms(self, epoch_ms: i64) -> Self {
        self.epoch_ms.store(epoch_ms, Ordering::SeqCst);
        self
    }

    /// Jump the monotonic reading to `now_ms`.
    pub fn set(&self, now_ms: f64) {
        self.now_bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    /// Move both readings forward by `delta_ms`.
    pub fn advance(&self, delta_ms: f64) {
        let now = f64::from_bits(self.now_bits.load(Ordering::SeqCst));
        self.now_bits
            .store((now + delta_ms).to_bits(), Ordering::SeqCst);
        self.epoch_ms
            .fetch_add(delta_ms.round() as i64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }

    fn epoch_ms(&self) -> i64 {
        self.epoch_ms.load(Ordering::SeqCst)
    }
}
