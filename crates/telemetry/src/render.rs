//! Component render profiling.
//!
//! Every commit increments the component's render count. Only mounts and
//! slow renders are reported, to keep the volume of render events low.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pulse_perf::{Clock, PerfTimer};

use crate::collector::MetricCollector;
use crate::event::{EventType, PartialEvent};
use crate::host::PageEnvironment;

/// Fallback name for components without one.
pub const ANONYMOUS_COMPONENT: &str = "Anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderPhase {
    Mount,
    Update,
    NestedUpdate,
}

impl RenderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderPhase::Mount => "mount",
            RenderPhase::Update => "update",
            RenderPhase::NestedUpdate => "nested-update",
        }
    }
}

/// Profiler data for one commit of a component subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCommit {
    /// Component name the commit is attributed to
    pub id: String,
    pub phase: RenderPhase,
    /// Time spent rendering this commit, ms
    pub actual_duration: f64,
    /// Estimated time to render the whole subtree without memoization, ms
    pub base_duration: f64,
    pub start_time: f64,
    pub commit_time: f64,
}

struct RenderInner {
    collector: MetricCollector,
    env: Arc<dyn PageEnvironment>,
    slow_threshold_ms: f64,
    enabled: bool,
    counts: Mutex<HashMap<String, u64>>,
}

/// Counts renders per component and reports mounts and slow renders.
#[derive(Clone)]
pub struct RenderObserver {
    inner: Arc<RenderInner>,
}

impl RenderObserver {
    pub fn new(collector: MetricCollector, env: Arc<dyn PageEnvironment>) -> Self {
        let config = collector.config();
        let slow_threshold_ms = config.slow_render_threshold_ms();
        let enabled = config.track_component_performance();
        Self {
            inner: Arc::new(RenderInner {
                collector,
                env,
                slow_threshold_ms,
                enabled,
                counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// `false` when component performance tracking is switched off.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn slow_threshold_ms(&self) -> f64 {
        self.inner.slow_threshold_ms
    }

    /// Handle one commit. Returns `true` if an event was emitted.
    pub fn on_render(&self, commit: &RenderCommit) -> bool {
        if !self.inner.enabled {
            return false;
        }

        let render_count = {
            let mut counts = self.lock_counts();
            let count = counts.entry(commit.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let is_slow = commit.actual_duration > self.inner.slow_threshold_ms;
        if !is_slow && commit.phase != RenderPhase::Mount {
            return false;
        }

        if is_slow {
            tracing::debug!(
                target: "pagepulse::render",
                component = %commit.id,
                duration_ms = commit.actual_duration,
                threshold_ms = self.inner.slow_threshold_ms,
                "slow render"
            );
        }

        self.inner.collector.collect(
            PartialEvent::new(
                EventType::Render,
                self.inner.env.current_route(),
                commit.actual_duration,
            )
            .with_component(commit.id.clone())
            .with_metadata("phase", commit.phase.as_str())
            .with_metadata("baseDuration", commit.base_duration)
            .with_metadata("renderCount", render_count)
            .with_metadata("isSlow", is_slow)
            .with_metadata("commitTime", commit.commit_time - commit.start_time),
        );
        true
    }

    /// Commits seen so far for `component`.
    pub fn render_count(&self, component: &str) -> u64 {
        self.lock_counts().get(component).copied().unwrap_or(0)
    }

    /// Wrap `component` so its renders are profiled.
    ///
    /// The profile name is `name` if given, else the component's own
    /// display name, else [`ANONYMOUS_COMPONENT`].
    pub fn profile<C: Component>(&self, component: C, name: Option<&str>) -> Profiled<C> {
        let name = name
            .filter(|n| !n.is_empty())
            .or_else(|| component.display_name().filter(|n| !n.is_empty()))
            .unwrap_or(ANONYMOUS_COMPONENT)
            .to_string();

        Profiled {
            display_name: format!("Profiled({name})"),
            name,
            clock: self.inner.collector.clock(),
            observer: self.clone(),
            mounted: AtomicBool::new(false),
            component,
        }
    }

    fn lock_counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.inner
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RenderObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderObserver")
            .field("slow_threshold_ms", &self.inner.slow_threshold_ms)
            .field("enabled", &self.inner.enabled)
            .finish()
    }
}

/// A renderable unit of the host UI.
pub trait Component {
    type Props;
    type Output;

    /// Name the component identifies itself with, if any.
    fn display_name(&self) -> Option<&str> {
        None
    }

    fn render(&self, props: &Self::Props) -> Self::Output;
}

/// A component whose renders are reported to a [`RenderObserver`].
pub struct Profiled<C> {
    component: C,
    name: String,
    display_name: String,
    observer: RenderObserver,
    clock: Arc<dyn Clock>,
    mounted: AtomicBool,
}

impl<C: Component> Profiled<C> {
    /// Name commits are attributed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &C {
        &self.component
    }

    /// Render the wrapped component and report the commit. The first render
    /// is a mount, later ones are updates.
    pub fn render(&self, props: &C::Props) -> C::Output {
        let timer = PerfTimer::start("render", Arc::clone(&self.clock));
        let start_time = timer.start_ms();
        let output = self.component.render(props);
        let actual_duration = timer.stop();

        let phase = if self.mounted.swap(true, Ordering::SeqCst) {
            RenderPhase::Update
        } else {
            RenderPhase::Mount
        };

        self.on_commit(RenderCommit {
            id: self.name.clone(),
            phase,
            actual_duration,
            base_duration: actual_duration,
            start_time,
            commit_time: start_time + actual_duration,
        });
        output
    }

    /// Forward profiler data supplied by the host for this component. The
    /// commit is attributed to this wrapper's name whatever its `id` says.
    pub fn on_commit(&self, mut commit: RenderCommit) {
        commit.id.clone_from(&self.name);
        self.observer.on_render(&commit);
    }
}

impl<C: Component> Component for Profiled<C> {
    type Props = C::Props;
    type Output = C::Output;

    fn display_name(&self) -> Option<&str> {
        Some(&self.display_name)
    }

    fn render(&self, props: &Self::Props) -> Self::Output {
        Profiled::render(self, props)
    }
}

impl<C> std::fmt::Debug for Profiled<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiled")
            .field("name", &self.name)
            .field("mounted", &self.mounted.load(Ordering::SeqCst))
            .finish()
    }
}
