//! Page Telemetry Pipeline
//!
//! This crate captures client-side timing signals from a web-style host and
//! ships them to an analytics endpoint without getting in the host's way:
//!
//! - Hydration timing, from the start of hydration until the loop settles
//! - Component render profiling, reporting mounts and slow renders
//! - Route navigation timing, from router events or history interception
//! - Page-load timing and long tasks from the performance timeline
//! - Sampled, batched delivery with a durable path for page teardown
//!
//! Capture never fails and never blocks. Delivery is best-effort and
//! at-most-once: a batch that cannot be delivered is dropped and logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagepulse::{EventType, Monitor, MonitorOptions, PageHandle};
//!
//! # async fn run() -> pagepulse::TelemetryResult<()> {
//! let page = Arc::new(PageHandle::new("/").with_user_agent("Mozilla/5.0"));
//! let monitor = Monitor::initialize(
//!     MonitorOptions::new("my-project").with_sample_rate(0.5),
//!     page.clone(),
//! )?;
//!
//! // Measure hydration
//! let hydrate = monitor.wrap_hydrate(|root: &str| format!("hydrated {root}"));
//! hydrate("#app");
//!
//! // Manual measurements
//! monitor.track_metric(EventType::PageTiming, 180.0, None);
//! monitor.track_custom_event("signup_clicked", None);
//!
//! // Navigation through history is picked up automatically
//! page.push_state("/pricing");
//!
//! monitor.destroy();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Options, defaults and validation
//! - [`collector`] - Sampling, buffering and flush triggers
//! - [`transport`] - Batch delivery over HTTP or beacon
//! - [`hydration`] - Hydration timing
//! - [`render`] - Component render profiling
//! - [`navigation`] - Route change timing and navigation sources
//! - [`page_timing`] - Page-load timing entries
//! - [`host`] - The page environment the pipeline runs in
//! - [`monitor`] - The context object tying it together

pub mod collector;
pub mod config;
mod error;
mod event;
pub mod host;
pub mod hydration;
pub mod monitor;
pub mod navigation;
pub mod page_timing;
pub mod render;
mod sampling;
mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use collector::{CollectorStats, MetricCollector};
pub use config::{ConfigWarning, MonitorConfig, MonitorOptions};
pub use error::{TelemetryError, TelemetryResult};
pub use event::{encode_batch, DestinationRecord, EventType, Metadata, MetricEvent, PartialEvent};
pub use host::{Beacon, HistoryChange, HistoryMethod, PageEnvironment, PageHandle, PageSignal, Visibility};
pub use hydration::{HydrationObserver, HydrationPhase};
pub use monitor::{Monitor, MonitorBuilder, Telemetry};
pub use navigation::{
    HistoryInterception, NavigationObserver, NavigationSource, RouterEvent, RouterEventSender,
    RouterEvents, SourceHandle,
};
pub use page_timing::{LongTask, NavigationTiming, PageTimingObserver, PerformanceEntry};
pub use render::{Component, Profiled, RenderCommit, RenderObserver, RenderPhase};
pub use sampling::{RandomSource, Sampler, SeededRandom, ThreadRandom};
pub use session::{generate_session_id, Session};
pub use transport::{DeliveryMode, DeliveryRequest, DeliveryTransport, HttpTransport, TransportConfig};
