//! Hydration timing.
//!
//! Measures the span between the start of client-side hydration and the
//! moment the event loop settles afterwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use pulse_perf::Clock;

use crate::collector::MetricCollector;
use crate::event::{EventType, PartialEvent};
use crate::host::PageEnvironment;

/// Where the observer is in a hydration cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HydrationPhase {
    Idle,
    /// Started at the given monotonic time
    Started(f64),
}

struct HydrationInner {
    collector: MetricCollector,
    clock: Arc<dyn Clock>,
    route: String,
    idle: Option<Arc<Notify>>,
    idle_timeout: Duration,
    phase: Mutex<HydrationPhase>,
}

/// Emits one `hydration` event per start/end pair.
#[derive(Clone)]
pub struct HydrationObserver {
    inner: Arc<HydrationInner>,
}

impl HydrationObserver {
    /// Observer for the page's current route.
    pub fn new(collector: MetricCollector, env: &dyn PageEnvironment) -> Self {
        let idle_timeout = collector.config().hydration_idle_timeout();
        Self {
            inner: Arc::new(HydrationInner {
                clock: collector.clock(),
                route: env.current_route(),
                idle: env.idle_notifier(),
                idle_timeout,
                phase: Mutex::new(HydrationPhase::Idle),
                collector,
            }),
        }
    }

    pub fn phase(&self) -> HydrationPhase {
        *self.lock_phase()
    }

    /// Route the measurement is attributed to.
    pub fn route(&self) -> &str {
        &self.inner.route
    }

    /// Record the start of hydration. A second start restarts the timer.
    pub fn mark_start(&self) {
        let start = self.inner.clock.now_ms();
        *self.lock_phase() = HydrationPhase::Started(start);
        tracing::trace!(target: "pagepulse::hydration", start_ms = start, "hydration started");
    }

    /// Record the end of hydration and emit the event.
    ///
    /// Returns the measured duration, or `None` when no hydration was in
    /// progress.
    pub fn mark_end(&self) -> Option<f64> {
        let start = {
            let mut phase = self.lock_phase();
            match *phase {
                HydrationPhase::Started(start) => {
                    *phase = HydrationPhase::Idle;
                    start
                }
                HydrationPhase::Idle => return None,
            }
        };

        let end = self.inner.clock.now_ms();
        let duration = end - start;
        tracing::trace!(
            target: "pagepulse::hydration",
            duration_ms = duration,
            route = %self.inner.route,
            "hydration finished"
        );

        self.inner.collector.collect(
            PartialEvent::new(EventType::Hydration, self.inner.route.clone(), duration)
                .with_metadata("startTime", start)
                .with_metadata("endTime", end),
        );
        Some(duration)
    }

    /// Run a hydration entry point under measurement.
    ///
    /// The end mark is taken once the event loop has settled after `entry`
    /// returns.
    pub fn instrument<R>(&self, entry: impl FnOnce() -> R) -> R {
        self.mark_start();
        let result = entry();
        self.schedule_end();
        result
    }

    /// Wrap a hydration entry point so every call is measured.
    pub fn wrap<A, R, F>(&self, entry: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        let observer = self.clone();
        move |arg| observer.instrument(|| entry(arg))
    }

    fn schedule_end(&self) {
        let Ok(handle) = Handle::try_current() else {
            self.mark_end();
            return;
        };

        let observer = self.clone();
        handle.spawn(async move {
            match observer.inner.idle.clone() {
                Some(idle) => {
                    // Timing out is the same as settling.
                    let _ = tokio::time::timeout(observer.inner.idle_timeout, idle.notified()).await;
                }
                None => tokio::task::yield_now().await,
            }
            observer.mark_end();
        });
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, HydrationPhase> {
        self.inner
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HydrationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationObserver")
            .field("route", &self.inner.route)
            .field("phase", &self.phase())
            .finish()
    }
}
