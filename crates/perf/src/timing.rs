//! Interval timing against a [`Clock`].

use std::sync::Arc;

use crate::clock::Clock;

/// A timer that measures elapsed milliseconds from creation.
///
/// A timer dropped without [`PerfTimer::stop`] logs its elapsed time at
/// trace level, which is handy for RAII-style scope timing.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use pulse_perf::{MonotonicClock, PerfTimer};
///
/// fn render_list() {
///     let _timer = PerfTimer::start("render_list", Arc::new(MonotonicClock::new()));
///     // ... render ...
/// }
/// ```
pub struct PerfTimer {
    name: &'static str,
    clock: Arc<dyn Clock>,
    start_ms: f64,
    stopped: bool,
}

impl PerfTimer {
    /// Start a timer on the given clock.
    #[inline]
    pub fn start(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        let start_ms = clock.now_ms();
        Self {
            name,
            clock,
            start_ms,
            stopped: false,
        }
    }

    /// Elapsed milliseconds so far. Never negative.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        (self.clock.now_ms() - self.start_ms).max(0.0)
    }

    /// Clock reading when the timer started.
    #[inline]
    pub fn start_ms(&self) -> f64 {
        self.start_ms
    }

    /// Current clock reading.
    #[inline]
    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Name of this timer.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Restart the timer from now.
    #[inline]
    pub fn reset(&mut self) {
        self.start_ms = self.clock.now_ms();
    }

    /// Stop the timer and return elapsed milliseconds without logging.
    #[inline]
    pub fn stop(mut self) -> f64 {
        self.stopped = true;
        self.elapsed_ms()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        tracing::trace!(
            target: "pulse_perf::timer",
            name = self.name,
            elapsed_ms = self.elapsed_ms(),
            "timer completed"
        );
    }
}

impl std::fmt::Debug for PerfTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfTimer")
            .field("name", &self.name)
            .field("start_ms", &self.start_ms)
            .finish()
    }
}
