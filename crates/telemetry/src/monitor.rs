//! The page monitor: one context object owning the whole pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pulse_perf::{Clock, MonotonicClock};

use crate::collector::MetricCollector;
use crate::config::{MonitorConfig, MonitorOptions};
use crate::error::{TelemetryError, TelemetryResult};
use crate::event::{EventType, Metadata, PartialEvent};
use crate::host::PageEnvironment;
use crate::hydration::HydrationObserver;
use crate::navigation::{
    HistoryInterception, NavigationObserver, NavigationSource, RouterEvents, SourceHandle,
};
use crate::page_timing::PageTimingObserver;
use crate::render::{Component, Profiled, RenderObserver};
use crate::sampling::{RandomSource, ThreadRandom};
use crate::transport::{DeliveryTransport, HttpTransport, TransportConfig};

/// Builder for a [`Monitor`] with injectable collaborators.
pub struct MonitorBuilder {
    options: MonitorOptions,
    env: Arc<dyn PageEnvironment>,
    clock: Option<Arc<dyn Clock>>,
    random: Option<Box<dyn RandomSource>>,
    transport: Option<Arc<dyn DeliveryTransport>>,
}

impl MonitorBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Random source for sampling decisions.
    pub fn with_random_source(mut self, random: Box<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    /// Replace the HTTP transport.
    pub fn with_transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Start the pipeline.
    ///
    /// Fails with [`TelemetryError::UnsupportedEnvironment`] outside a
    /// browser-like host. Invalid options are reported as warnings and
    /// replaced with defaults.
    pub fn build(self) -> TelemetryResult<Monitor> {
        let env = self.env;
        if !env.is_browser() {
            tracing::warn!(
                target: "pagepulse::monitor",
                "not a browser-like environment, telemetry disabled"
            );
            return Err(TelemetryError::UnsupportedEnvironment);
        }

        let config = MonitorConfig::resolve_logged(self.options);
        if let Err(e) = config.validate_endpoint() {
            tracing::warn!(target: "pagepulse::monitor", error = %e, "batches will not be delivered");
        }
        let transport: Arc<dyn DeliveryTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(TransportConfig::from_monitor(&config))?
                    .with_beacon(env.beacon()),
            ),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let random = self.random.unwrap_or_else(|| Box::new(ThreadRandom));

        let collector = MetricCollector::new(config, Arc::clone(&env), transport, clock, random);
        let config = collector.config();

        let monitor = Monitor {
            hydration: HydrationObserver::new(collector.clone(), env.as_ref()),
            page_timing: PageTimingObserver::new(collector.clone(), env.as_ref()),
            renders: RenderObserver::new(collector.clone(), Arc::clone(&env)),
            navigation: NavigationObserver::new(collector.clone(), env.as_ref()),
            sources: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            collector: collector.clone(),
            env: Arc::clone(&env),
        };

        if config.auto_track_routes() {
            let source = HistoryInterception::new(Arc::clone(&env), config.route_poll_interval());
            monitor.connect_source(Box::new(source));
        }

        if config.track_sessions() {
            monitor.track_custom_event("session_start", None);
        }

        tracing::info!(
            target: "pagepulse::monitor",
            project_key = config.project_key(),
            session_id = collector.session_id(),
            "monitor initialized"
        );
        Ok(monitor)
    }
}

/// Owns the collector, the observers and the connected navigation sources
/// for one page load.
pub struct Monitor {
    env: Arc<dyn PageEnvironment>,
    collector: MetricCollector,
    hydration: HydrationObserver,
    page_timing: PageTimingObserver,
    renders: RenderObserver,
    navigation: NavigationObserver,
    sources: Mutex<Vec<SourceHandle>>,
    destroyed: AtomicBool,
}

impl Monitor {
    /// Start monitoring with the default clock, sampling and transport.
    pub fn initialize(
        options: MonitorOptions,
        env: Arc<dyn PageEnvironment>,
    ) -> TelemetryResult<Self> {
        Self::builder(options, env).build()
    }

    pub fn builder(options: MonitorOptions, env: Arc<dyn PageEnvironment>) -> MonitorBuilder {
        MonitorBuilder {
            options,
            env,
            clock: None,
            random: None,
            transport: None,
        }
    }

    /// Record a measurement taken by the host on the current route.
    pub fn track_metric(&self, event_type: EventType, duration: f64, metadata: Option<Metadata>) {
        let mut event = PartialEvent::new(event_type, self.env.current_route(), duration);
        if let Some(metadata) = metadata {
            event = event.with_metadata_map(metadata);
        }
        self.collector.collect(event);
    }

    /// Record a named application event. Caller metadata wins over the
    /// `eventName` key.
    pub fn track_custom_event(&self, name: &str, metadata: Option<Metadata>) {
        let mut merged = Metadata::new();
        merged.insert("eventName".to_string(), name.into());
        merged.extend(metadata.unwrap_or_default());

        self.collector.collect(
            PartialEvent::new(EventType::Custom, self.env.current_route(), 0.0)
                .with_metadata_map(merged),
        );
    }

    /// Record an application error. Skipped when error tracking is off.
    pub fn track_error(&self, error: &dyn std::error::Error, metadata: Option<Metadata>) {
        if !self.collector.config().track_errors() {
            tracing::trace!(target: "pagepulse::monitor", "error tracking disabled");
            return;
        }

        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        let mut merged = Metadata::new();
        merged.insert("errorMessage".to_string(), error.to_string().into());
        merged.insert("errorChain".to_string(), chain.into());
        merged.extend(metadata.unwrap_or_default());

        self.collector.collect(
            PartialEvent::new(EventType::Error, self.env.current_route(), 0.0)
                .with_metadata_map(merged),
        );
    }

    /// Measure a hydration entry point. See [`HydrationObserver::wrap`].
    pub fn wrap_hydrate<A, R, F>(&self, entry: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        self.hydration.wrap(entry)
    }

    /// Profile a component's renders. See [`RenderObserver::profile`].
    pub fn with_profiler<C: Component>(&self, component: C, name: Option<&str>) -> Profiled<C> {
        self.renders.profile(component, name)
    }

    /// Follow a framework router's events instead of watching history.
    ///
    /// Passive sources connected so far are stopped first, so transitions
    /// are not reported twice.
    pub fn track_router(&self, events: RouterEvents) {
        if self.is_destroyed() {
            tracing::warn!(target: "pagepulse::monitor", "monitor destroyed, router not tracked");
            return;
        }

        let stopped = {
            let mut sources = self.lock_sources();
            let stopped = sources.len();
            sources.clear();
            stopped
        };
        if stopped > 0 {
            tracing::debug!(
                target: "pagepulse::monitor",
                stopped,
                "switching to router events"
            );
        }
        self.connect_source(Box::new(events));
    }

    fn connect_source(&self, source: Box<dyn NavigationSource>) {
        let handle = source.connect(self.navigation.clone());
        self.lock_sources().push(handle);
    }

    pub fn collector(&self) -> &MetricCollector {
        &self.collector
    }

    pub fn hydration(&self) -> &HydrationObserver {
        &self.hydration
    }

    pub fn renders(&self) -> &RenderObserver {
        &self.renders
    }

    pub fn navigation(&self) -> &NavigationObserver {
        &self.navigation
    }

    pub fn page_timing(&self) -> &PageTimingObserver {
        &self.page_timing
    }

    pub fn config(&self) -> &MonitorConfig {
        self.collector.config()
    }

    pub fn session_id(&self) -> &str {
        self.collector.session_id()
    }

    /// Names of the navigation sources currently connected.
    pub fn sources(&self) -> Vec<&'static str> {
        self.lock_sources().iter().map(SourceHandle::name).collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Stop all sources and timers, then flush durably. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.lock_sources().clear();

        if self.collector.config().track_sessions() {
            let age_ms = self.collector.session_age_ms();
            self.collector.collect(
                PartialEvent::new(EventType::Custom, self.env.current_route(), age_ms)
                    .with_metadata("eventName", "session_end"),
            );
        }

        self.collector.destroy();
        tracing::info!(
            target: "pagepulse::monitor",
            session_id = self.collector.session_id(),
            "monitor destroyed"
        );
    }

    fn lock_sources(&self) -> std::sync::MutexGuard<'_, Vec<SourceHandle>> {
        self.sources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("collector", &self.collector)
            .field("sources", &self.sources())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Process-wide entry point for hosts that prefer free-standing calls.
///
/// Every call made before [`Telemetry::init`] or after
/// [`Telemetry::destroy`] does nothing and logs a warning.
#[derive(Debug, Default)]
pub struct Telemetry {
    monitor: Option<Monitor>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize, replacing any running monitor.
    pub fn init(
        &mut self,
        options: MonitorOptions,
        env: Arc<dyn PageEnvironment>,
    ) -> TelemetryResult<()> {
        self.init_with(Monitor::builder(options, env))
    }

    /// Initialize from a configured builder, replacing any running monitor.
    pub fn init_with(&mut self, builder: MonitorBuilder) -> TelemetryResult<()> {
        if let Some(previous) = self.monitor.take() {
            tracing::warn!(
                target: "pagepulse::monitor",
                "already initialized, replacing the running monitor"
            );
            previous.destroy();
        }
        self.monitor = Some(builder.build()?);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    /// The running monitor, for callers that want an error instead of a
    /// silent no-op.
    pub fn require(&self) -> TelemetryResult<&Monitor> {
        self.monitor.as_ref().ok_or(TelemetryError::NotInitialized)
    }

    pub fn track_metric(&self, event_type: EventType, duration: f64, metadata: Option<Metadata>) {
        if let Some(monitor) = self.active("track_metric") {
            monitor.track_metric(event_type, duration, metadata);
        }
    }

    pub fn track_custom_event(&self, name: &str, metadata: Option<Metadata>) {
        if let Some(monitor) = self.active("track_custom_event") {
            monitor.track_custom_event(name, metadata);
        }
    }

    pub fn track_error(&self, error: &dyn std::error::Error, metadata: Option<Metadata>) {
        if let Some(monitor) = self.active("track_error") {
            monitor.track_error(error, metadata);
        }
    }

    pub fn track_router(&self, events: RouterEvents) {
        if let Some(monitor) = self.active("track_router") {
            monitor.track_router(events);
        }
    }

    /// Measure a hydration entry point; returns it unchanged when not
    /// initialized.
    pub fn wrap_hydrate<A, R, F>(&self, entry: F) -> Box<dyn Fn(A) -> R>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + 'static,
    {
        match self.active("wrap_hydrate") {
            Some(monitor) => Box::new(monitor.wrap_hydrate(entry)),
            None => Box::new(entry),
        }
    }

    /// Profile a component, or hand it back untouched when not initialized.
    pub fn with_profiler<C: Component>(
        &self,
        component: C,
        name: Option<&str>,
    ) -> Result<Profiled<C>, C> {
        match self.active("with_profiler") {
            Some(monitor) => Ok(monitor.with_profiler(component, name)),
            None => Err(component),
        }
    }

    /// Tear down the running monitor, if any.
    pub fn destroy(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.destroy();
        }
    }

    fn active(&self, operation: &'static str) -> Option<&Monitor> {
        if self.monitor.is_none() {
            tracing::warn!(
                target: "pagepulse::monitor",
                operation,
                "telemetry not initialized, call ignored"
            );
        }
        self.monitor.as_ref()
    }
}
