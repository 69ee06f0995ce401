//! Clock and Timing Primitives
//!
//! This crate provides the time sources the page telemetry pipeline measures
//! against:
//! - A [`Clock`] trait exposing monotonic and wall-clock milliseconds
//! - [`MonotonicClock`] backed by `Instant`, and [`ManualClock`] for tests
//! - [`PerfTimer`] for interval measurement on any clock
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pulse_perf::{Clock, ManualClock, PerfTimer};
//!
//! let clock = Arc::new(ManualClock::new(100.0));
//! let timer = PerfTimer::start("hydrate", clock.clone());
//! clock.advance(250.0);
//! assert_eq!(timer.stop(), 250.0);
//! ```

mod clock;
mod timing;

pub use clock::*;
pub use timing::*;
