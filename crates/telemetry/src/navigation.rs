//! Route navigation timing.
//!
//! Two duration semantics coexist. An explicit router hook measures each
//! transition from its start to its completion ("paired"). Passive history
//! interception has no completion signal, so each observed change closes
//! the timer opened by the previous change ("continuous"). Every event
//! records which one produced it in its `timing` metadata.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use pulse_perf::Clock;

use crate::collector::MetricCollector;
use crate::event::{EventType, PartialEvent};
use crate::host::{PageEnvironment, PageSignal};

pub const PAIRED_TIMING: &str = "paired";
pub const CONTINUOUS_TIMING: &str = "continuous";

#[derive(Debug)]
struct NavState {
    started_at: Option<f64>,
    from: Option<String>,
    current_route: String,
}

struct NavInner {
    collector: MetricCollector,
    clock: Arc<dyn Clock>,
    state: Mutex<NavState>,
}

/// Times route transitions and emits `navigation` events.
#[derive(Clone)]
pub struct NavigationObserver {
    inner: Arc<NavInner>,
}

impl NavigationObserver {
    pub fn new(collector: MetricCollector, env: &dyn PageEnvironment) -> Self {
        Self {
            inner: Arc::new(NavInner {
                clock: collector.clock(),
                state: Mutex::new(NavState {
                    started_at: None,
                    from: None,
                    current_route: env.current_route(),
                }),
                collector,
            }),
        }
    }

    /// Last route the observer knows the page to be on.
    pub fn current_route(&self) -> String {
        self.lock_state().current_route.clone()
    }

    /// `true` while a timer is open.
    pub fn in_flight(&self) -> bool {
        self.lock_state().started_at.is_some()
    }

    /// A router began a transition. Replaces any transition already in
    /// flight.
    pub fn route_change_start(&self, url: &str) {
        let now = self.inner.clock.now_ms();
        let mut state = self.lock_state();
        state.started_at = Some(now);
        state.from = Some(state.current_route.clone());
        tracing::trace!(target: "pagepulse::navigation", from = %state.current_route, to = url, "route change started");
    }

    /// A router finished the transition to `url`. Returns the measured
    /// duration, or `None` when nothing was in flight.
    pub fn route_change_complete(&self, url: &str) -> Option<f64> {
        let now = self.inner.clock.now_ms();
        let (started_at, from) = {
            let mut state = self.lock_state();
            let started_at = state.started_at.take()?;
            let from = state.from.take().unwrap_or_else(|| state.current_route.clone());
            state.current_route = url.to_string();
            (started_at, from)
        };

        let duration = now - started_at;
        self.emit(from, url, duration, PAIRED_TIMING);
        Some(duration)
    }

    /// A router transition failed. Drops the open timer.
    pub fn route_change_error(&self) {
        let mut state = self.lock_state();
        state.started_at = None;
        state.from = None;
    }

    /// The page was seen on `route`.
    ///
    /// A change closes the open timer, if any, and opens a new one. Returns
    /// the duration of the navigation that was closed.
    pub fn route_observed(&self, route: &str) -> Option<f64> {
        let now = self.inner.clock.now_ms();
        let (closed, from) = {
            let mut state = self.lock_state();
            if state.current_route == route {
                return None;
            }
            let from = std::mem::replace(&mut state.current_route, route.to_string());
            let closed = state.started_at.replace(now);
            state.from = Some(from.clone());
            (closed, from)
        };

        let started_at = closed?;
        let duration = now - started_at;
        self.emit(from, route, duration, CONTINUOUS_TIMING);
        Some(duration)
    }

    fn emit(&self, from: String, to: &str, duration: f64, timing: &'static str) {
        tracing::trace!(
            target: "pagepulse::navigation",
            from = %from,
            to,
            duration_ms = duration,
            timing,
            "navigation"
        );
        self.inner.collector.collect(
            PartialEvent::new(EventType::Navigation, to, duration)
                .with_metadata("from", from)
                .with_metadata("to", to)
                .with_metadata("timing", timing),
        );
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, NavState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NavigationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationObserver")
            .field("state", &*self.lock_state())
            .finish()
    }
}

/// Something that reports route changes to a [`NavigationObserver`].
pub trait NavigationSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start feeding `observer`. The returned handle stops the source.
    fn connect(self: Box<Self>, observer: NavigationObserver) -> SourceHandle;
}

/// Keeps a connected [`NavigationSource`] running. Dropping it stops the
/// source.
#[derive(Debug)]
pub struct SourceHandle {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl SourceHandle {
    fn running(name: &'static str, task: JoinHandle<()>) -> Self {
        Self {
            name,
            task: Some(task),
        }
    }

    fn inert(name: &'static str) -> Self {
        tracing::warn!(
            target: "pagepulse::navigation",
            source = name,
            "no async runtime, navigation source not connected"
        );
        Self { name, task: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(target: "pagepulse::navigation", source = self.name, "navigation source stopped");
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Native router lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    RouteChangeStart(String),
    RouteChangeComplete(String),
    RouteChangeError(String),
}

/// Sending half handed to the router integration.
#[derive(Debug, Clone)]
pub struct RouterEventSender {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

impl RouterEventSender {
    /// Forward an event. Returns `false` once the source has stopped.
    pub fn send(&self, event: RouterEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn route_change_start(&self, url: &str) -> bool {
        self.send(RouterEvent::RouteChangeStart(url.to_string()))
    }

    pub fn route_change_complete(&self, url: &str) -> bool {
        self.send(RouterEvent::RouteChangeComplete(url.to_string()))
    }

    pub fn route_change_error(&self, url: &str) -> bool {
        self.send(RouterEvent::RouteChangeError(url.to_string()))
    }
}

/// Router events delivered over a channel, driving the explicit hook.
#[derive(Debug)]
pub struct RouterEvents {
    rx: mpsc::UnboundedReceiver<RouterEvent>,
}

impl RouterEvents {
    pub fn channel() -> (RouterEventSender, RouterEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RouterEventSender { tx }, RouterEvents { rx })
    }
}

impl NavigationSource for RouterEvents {
    fn name(&self) -> &'static str {
        "router-events"
    }

    fn connect(self: Box<Self>, observer: NavigationObserver) -> SourceHandle {
        let name = self.name();
        let Ok(handle) = Handle::try_current() else {
            return SourceHandle::inert(name);
        };

        let mut rx = self.rx;
        let task = handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RouterEvent::RouteChangeStart(url) => observer.route_change_start(&url),
                    RouterEvent::RouteChangeComplete(url) => {
                        observer.route_change_complete(&url);
                    }
                    RouterEvent::RouteChangeError(url) => {
                        tracing::debug!(target: "pagepulse::navigation", url = %url, "route change failed");
                        observer.route_change_error();
                    }
                }
            }
        });
        SourceHandle::running(name, task)
    }
}

/// Passive route tracking: history signals from the page plus a periodic
/// check of the current path for changes that bypass the history entry
/// points.
pub struct HistoryInterception {
    env: Arc<dyn PageEnvironment>,
    poll_interval: Duration,
}

impl HistoryInterception {
    pub fn new(env: Arc<dyn PageEnvironment>, poll_interval: Duration) -> Self {
        Self {
            env,
            poll_interval,
        }
    }
}

impl std::fmt::Debug for HistoryInterception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryInterception")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl NavigationSource for HistoryInterception {
    fn name(&self) -> &'static str {
        "history-interception"
    }

    fn connect(self: Box<Self>, observer: NavigationObserver) -> SourceHandle {
        let name = self.name();
        let Ok(handle) = Handle::try_current() else {
            return SourceHandle::inert(name);
        };

        let mut signals = self.env.subscribe();
        let env = self.env;
        let period = self.poll_interval;

        let task = handle.spawn(async move {
            let mut poll = tokio::time::interval_at(Instant::now() + period, period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        observer.route_observed(&env.current_route());
                    }
                    received = async {
                        match signals.as_mut() {
                            Some(rx) => Some(rx.recv().await),
                            None => std::future::pending().await,
                        }
                    } => match received {
                        Some(Ok(PageSignal::History(_))) => {
                            observer.route_observed(&env.current_route());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(RecvError::Lagged(skipped))) => {
                            tracing::debug!(target: "pagepulse::navigation", skipped, "history listener lagged");
                            observer.route_observed(&env.current_route());
                        }
                        Some(Err(RecvError::Closed)) | None => signals = None,
                    },
                }
            }
        });
        SourceHandle::running(name, task)
    }
}
