//! The metric collector: sampling, buffering and flush triggers.
//!
//! Observers hand [`PartialEvent`]s to [`MetricCollector::collect`]. The
//! collector completes them, buffers them and flushes the buffer when it
//! reaches the batch size, when the flush timer fires, or when the page is
//! being hidden. A flush swaps the buffer out before anything is sent, so
//! events collected while a delivery is in flight land in a fresh buffer.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use pulse_perf::Clock;

use crate::config::MonitorConfig;
use crate::event::{encode_batch, MetricEvent, PartialEvent};
use crate::host::{PageEnvironment, PageSignal, Visibility};
use crate::sampling::{RandomSource, Sampler};
use crate::session::Session;
use crate::transport::{DeliveryMode, DeliveryRequest, DeliveryTransport};

/// Counters describing what the collector has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    /// Events that passed sampling and were buffered
    pub collected: u64,
    /// Events dropped by sampling
    pub sampled_out: u64,
    /// Batches handed to the transport
    pub batches_dispatched: u64,
    /// Events in those batches
    pub events_dispatched: u64,
    /// Batches lost because encoding or hand-off failed
    pub dispatch_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    collected: AtomicU64,
    sampled_out: AtomicU64,
    batches_dispatched: AtomicU64,
    events_dispatched: AtomicU64,
    dispatch_errors: AtomicU64,
}

struct CollectorInner {
    config: MonitorConfig,
    session: Session,
    clock: Arc<dyn Clock>,
    /// Monotonic reading when the session started
    started_ms: f64,
    sampler: Sampler,
    transport: Arc<dyn DeliveryTransport>,
    user_agent: String,
    buffer: Mutex<Vec<MetricEvent>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
    counters: Counters,
}

impl Drop for CollectorInner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Central event buffer. Cheap to clone; clones share one buffer.
#[derive(Clone)]
pub struct MetricCollector {
    inner: Arc<CollectorInner>,
}

impl MetricCollector {
    /// Create a collector and start its background work.
    ///
    /// When called inside a tokio runtime this spawns the periodic flush
    /// timer and a listener that flushes durably when the page is hidden.
    /// Outside a runtime the collector still buffers and flushes on batch
    /// size and on explicit calls.
    pub fn new(
        config: MonitorConfig,
        env: Arc<dyn PageEnvironment>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        random: Box<dyn RandomSource>,
    ) -> Self {
        let session = Session::new(config.user_id().map(str::to_string));
        let sampler = Sampler::new(config.sample_rate(), random);

        let collector = Self {
            inner: Arc::new(CollectorInner {
                session,
                started_ms: clock.now_ms(),
                clock,
                sampler,
                transport,
                user_agent: env.user_agent(),
                buffer: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
                counters: Counters::default(),
                config,
            }),
        };

        collector.start_background(env.as_ref());

        tracing::debug!(
            target: "pagepulse::collector",
            session_id = collector.inner.session.id(),
            batch_size = collector.inner.config.batch_size(),
            sample_rate = collector.inner.config.sample_rate(),
            "collector started"
        );

        collector
    }

    fn start_background(&self, env: &dyn PageEnvironment) {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!(
                target: "pagepulse::collector",
                "no async runtime, periodic and lifecycle flushes disabled"
            );
            return;
        };

        let mut tasks = lock(&self.inner.tasks);
        tasks.push(handle.spawn(flush_timer(
            Arc::downgrade(&self.inner),
            self.inner.config.flush_interval(),
        )));

        if let Some(signals) = env.subscribe() {
            tasks.push(handle.spawn(lifecycle_listener(
                Arc::downgrade(&self.inner),
                signals,
            )));
        }
    }

    /// Accept a measurement.
    ///
    /// Applies sampling, stamps time and identity, buffers the event and
    /// flushes when the buffer reaches the batch size. Never fails: events
    /// are silently dropped after [`MetricCollector::destroy`].
    pub fn collect(&self, partial: PartialEvent) {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            tracing::trace!(
                target: "pagepulse::collector",
                "collector destroyed, dropping event"
            );
            return;
        }

        if !inner.sampler.should_sample() {
            inner.counters.sampled_out.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = MetricEvent::from_partial(
            partial,
            inner.clock.epoch_ms(),
            inner.session.id(),
            inner.config.project_key(),
            inner.session.user_id(),
        );
        let event_type = event.event_type;
        let duration = event.duration;

        let buffered = {
            let mut buffer = lock(&inner.buffer);
            buffer.push(event);
            buffer.len()
        };
        inner.counters.collected.fetch_add(1, Ordering::Relaxed);

        if inner.config.debug() {
            tracing::info!(
                target: "pagepulse::collector",
                event_type = %event_type,
                duration_ms = duration,
                buffered,
                "event collected"
            );
        } else {
            tracing::trace!(
                target: "pagepulse::collector",
                event_type = %event_type,
                duration_ms = duration,
                buffered,
                "event collected"
            );
        }

        if buffered >= inner.config.batch_size() {
            self.flush(DeliveryMode::Standard);
        }
    }

    /// Send everything buffered.
    ///
    /// No-op on an empty buffer. The buffer is detached before the batch is
    /// encoded or handed off; a failed delivery is never re-queued.
    pub fn flush(&self, mode: DeliveryMode) {
        let inner = &self.inner;
        let events = {
            let mut buffer = lock(&inner.buffer);
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        let event_count = events.len();

        let body = match encode_batch(&events, &inner.user_agent) {
            Ok(body) => body,
            Err(e) => {
                inner.counters.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "pagepulse::collector",
                    error = %e,
                    events = event_count,
                    "failed to encode batch, dropping it"
                );
                return;
            }
        };

        let request = DeliveryRequest {
            endpoint: inner.config.endpoint().to_string(),
            body,
            mode,
            event_count,
        };

        match inner.transport.deliver(request) {
            Ok(()) => {
                inner
                    .counters
                    .batches_dispatched
                    .fetch_add(1, Ordering::Relaxed);
                inner
                    .counters
                    .events_dispatched
                    .fetch_add(event_count as u64, Ordering::Relaxed);
                tracing::debug!(
                    target: "pagepulse::collector",
                    events = event_count,
                    mode = ?mode,
                    "batch dispatched"
                );
            }
            Err(e) => {
                inner.counters.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "pagepulse::collector",
                    error = %e,
                    events = event_count,
                    "failed to dispatch batch, dropping it"
                );
            }
        }
    }

    /// Stop background work and flush durably one last time. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }

        self.flush(DeliveryMode::Durable);
        tracing::debug!(target: "pagepulse::collector", "collector destroyed");
    }

    /// `true` once [`MetricCollector::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// The page session events are stamped with.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Session id shortcut.
    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    /// The resolved configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Milliseconds since the collector started, on its own clock.
    pub fn session_age_ms(&self) -> f64 {
        (self.inner.clock.now_ms() - self.inner.started_ms).max(0.0)
    }

    /// The clock events and observers measure against.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Number of events waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    #[cfg(test)]
    pub(crate) fn buffered_events(&self) -> Vec<MetricEvent> {
        lock(&self.inner.buffer).clone()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CollectorStats {
        let c = &self.inner.counters;
        CollectorStats {
            collected: c.collected.load(Ordering::Relaxed),
            sampled_out: c.sampled_out.load(Ordering::Relaxed),
            batches_dispatched: c.batches_dispatched.load(Ordering::Relaxed),
            events_dispatched: c.events_dispatched.load(Ordering::Relaxed),
            dispatch_errors: c.dispatch_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCollector")
            .field("session_id", &self.session_id())
            .field("buffered", &self.buffered_len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

async fn flush_timer(collector: Weak<CollectorInner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = collector.upgrade() else {
            break;
        };
        MetricCollector { inner }.flush(DeliveryMode::Standard);
    }
}

async fn lifecycle_listener(
    collector: Weak<CollectorInner>,
    mut signals: tokio::sync::broadcast::Receiver<PageSignal>,
) {
    loop {
        let signal = match signals.recv().await {
            Ok(signal) => signal,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(
                    target: "pagepulse::collector",
                    skipped,
                    "lifecycle listener lagged"
                );
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let teardown = matches!(
            signal,
            PageSignal::PageHide | PageSignal::VisibilityChange(Visibility::Hidden)
        );
        if !teardown {
            continue;
        }

        let Some(inner) = collector.upgrade() else {
            break;
        };
        MetricCollector { inner }.flush(DeliveryMode::Durable);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
