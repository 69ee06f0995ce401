//! Page-load timing entries reported by the host's performance timeline.

use serde::{Deserialize, Serialize};

use crate::collector::MetricCollector;
use crate::event::{EventType, PartialEvent};
use crate::host::PageEnvironment;

/// Navigation timing for the initial document load. All fields are
/// milliseconds on the page's monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTiming {
    pub fetch_start: f64,
    pub response_start: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    /// Time to interactive, relative to fetch start.
    pub fn time_to_interactive(&self) -> f64 {
        self.dom_interactive - self.fetch_start
    }

    pub fn time_to_first_byte(&self) -> f64 {
        self.response_start - self.fetch_start
    }
}

/// A task that blocked the main thread for an extended period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTask {
    pub start_time: f64,
    pub duration: f64,
}

/// A performance timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryType", rename_all = "lowercase")]
pub enum PerformanceEntry {
    Navigation(NavigationTiming),
    #[serde(rename = "longtask")]
    LongTask(LongTask),
}

/// Turns timeline entries into `page_timing` events.
#[derive(Debug, Clone)]
pub struct PageTimingObserver {
    collector: MetricCollector,
    route: String,
}

impl PageTimingObserver {
    pub fn new(collector: MetricCollector, env: &dyn PageEnvironment) -> Self {
        Self {
            collector,
            route: env.current_route(),
        }
    }

    pub fn record(&self, entry: PerformanceEntry) {
        match entry {
            PerformanceEntry::Navigation(timing) => self.record_navigation_timing(timing),
            PerformanceEntry::LongTask(task) => self.record_long_task(task),
        }
    }

    pub fn record_navigation_timing(&self, timing: NavigationTiming) {
        let start = timing.fetch_start;
        self.collector.collect(
            PartialEvent::new(
                EventType::PageTiming,
                self.route.clone(),
                timing.time_to_interactive(),
            )
            .with_metadata(
                "domContentLoaded",
                timing.dom_content_loaded_event_end - start,
            )
            .with_metadata("loadComplete", timing.load_event_end - start)
            .with_metadata("ttfb", timing.time_to_first_byte()),
        );
    }

    pub fn record_long_task(&self, task: LongTask) {
        tracing::trace!(
            target: "pagepulse::page_timing",
            duration_ms = task.duration,
            "long task"
        );
        self.collector.collect(
            PartialEvent::new(EventType::PageTiming, self.route.clone(), task.duration)
                .with_metadata("type", "long_task")
                .with_metadata("startTime", task.start_time),
        );
    }
}
