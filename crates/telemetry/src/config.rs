//! Option resolution.
//!
//! [`MonitorOptions`] is what callers (or the setup wizard's JSON file)
//! provide; [`MonitorConfig`] is the fully populated, immutable record the
//! pipeline runs on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};

/// Default events ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.us-east.tinybird.co/v0/events?name=events";
/// Default sampling rate (keep everything).
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;
/// Default periodic flush interval in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
/// Default number of buffered events that forces a flush.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default slow render threshold in milliseconds (one 60 Hz frame).
pub const DEFAULT_SLOW_RENDER_THRESHOLD_MS: f64 = 16.0;
/// Default timeout for standard deliveries.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default grace period for deliveries issued during page teardown.
pub const DEFAULT_KEEPALIVE_GRACE_MS: u64 = 10_000;
/// Default poll interval for passive route detection.
pub const DEFAULT_ROUTE_POLL_INTERVAL_MS: u64 = 100;
/// Default upper bound on waiting for an idle callback after hydration.
pub const DEFAULT_HYDRATION_IDLE_TIMEOUT_MS: u64 = 1_000;
/// Longest interval or timeout accepted for any timing option (one day).
pub const MAX_INTERVAL_MS: u64 = 86_400_000;

/// Caller-supplied options. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorOptions {
    /// Project identifier attached to every event
    pub project_key: Option<String>,
    /// Destination endpoint for batches
    pub endpoint: Option<String>,
    /// Probability in `[0, 1]` that an event is kept
    pub sample_rate: Option<f64>,
    /// Periodic flush interval in milliseconds
    pub flush_interval: Option<u64>,
    /// Buffer length that triggers an immediate flush
    pub batch_size: Option<usize>,
    /// Render duration above which a render is slow, in milliseconds
    pub slow_render_threshold: Option<f64>,
    /// Caller-supplied user identity
    pub user_id: Option<String>,
    /// Log every collected event at info level
    pub debug: Option<bool>,
    /// Passively track route changes at initialization
    pub auto_track_routes: Option<bool>,
    /// Report component render cost
    pub track_component_performance: Option<bool>,
    /// Report errors passed to the error hook
    pub track_errors: Option<bool>,
    /// Report session start and end
    pub track_sessions: Option<bool>,
    /// Timeout for standard deliveries in milliseconds
    pub request_timeout_ms: Option<u64>,
    /// Grace period for teardown deliveries in milliseconds
    pub keepalive_grace_ms: Option<u64>,
    /// Poll interval for passive route detection in milliseconds
    pub route_poll_interval_ms: Option<u64>,
    /// Upper bound on the post-hydration idle wait in milliseconds
    pub hydration_idle_timeout_ms: Option<u64>,
}

impl MonitorOptions {
    /// Create options for the given project.
    pub fn new(project_key: &str) -> Self {
        Self {
            project_key: Some(project_key.to_string()),
            ..Default::default()
        }
    }

    /// Parse options from JSON, ignoring unknown fields.
    pub fn from_json_str(json: &str) -> TelemetryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Set the destination endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Set the sampling rate.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Set the flush interval in milliseconds.
    pub fn with_flush_interval(mut self, interval_ms: u64) -> Self {
        self.flush_interval = Some(interval_ms);
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the slow render threshold in milliseconds.
    pub fn with_slow_render_threshold(mut self, threshold_ms: f64) -> Self {
        self.slow_render_threshold = Some(threshold_ms);
        self
    }

    /// Attach a user identity to every event.
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Enable verbose event logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Toggle passive route tracking.
    pub fn with_auto_track_routes(mut self, enabled: bool) -> Self {
        self.auto_track_routes = Some(enabled);
        self
    }

    /// Toggle component render tracking.
    pub fn with_track_component_performance(mut self, enabled: bool) -> Self {
        self.track_component_performance = Some(enabled);
        self
    }

    /// Toggle error tracking.
    pub fn with_track_errors(mut self, enabled: bool) -> Self {
        self.track_errors = Some(enabled);
        self
    }

    /// Toggle session start/end events.
    pub fn with_track_sessions(mut self, enabled: bool) -> Self {
        self.track_sessions = Some(enabled);
        self
    }

    /// Set the passive route poll interval in milliseconds.
    pub fn with_route_poll_interval(mut self, interval_ms: u64) -> Self {
        self.route_poll_interval_ms = Some(interval_ms);
        self
    }
}

/// Something wrong with the supplied options that resolution worked around.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// No project key was supplied
    MissingProjectKey,
    /// Endpoint was empty; the default is used
    EmptyEndpoint,
    /// Sample rate outside `[0, 1]` was clamped
    SampleRateClamped { given: f64, used: f64 },
    /// Sample rate was not a number; the default is used
    SampleRateInvalid,
    /// A zero flush interval; the default is used
    ZeroFlushInterval,
    /// A zero batch size; the default is used
    ZeroBatchSize,
    /// Negative or non-finite threshold; the default is used
    InvalidSlowRenderThreshold(f64),
    /// A timing option above [`MAX_INTERVAL_MS`] was clamped
    IntervalClamped { option: &'static str, given: u64 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::MissingProjectKey => write!(f, "projectKey is missing"),
            ConfigWarning::EmptyEndpoint => {
                write!(f, "endpoint is empty, using {}", DEFAULT_ENDPOINT)
            }
            ConfigWarning::SampleRateClamped { given, used } => {
                write!(f, "sampleRate {} is outside [0, 1], using {}", given, used)
            }
            ConfigWarning::SampleRateInvalid => {
                write!(f, "sampleRate is not a number, using {}", DEFAULT_SAMPLE_RATE)
            }
            ConfigWarning::ZeroFlushInterval => write!(
                f,
                "flushInterval must be positive, using {}ms",
                DEFAULT_FLUSH_INTERVAL_MS
            ),
            ConfigWarning::ZeroBatchSize => write!(
                f,
                "batchSize must be positive, using {}",
                DEFAULT_BATCH_SIZE
            ),
            ConfigWarning::InvalidSlowRenderThreshold(given) => write!(
                f,
                "slowRenderThreshold {} is invalid, using {}ms",
                given, DEFAULT_SLOW_RENDER_THRESHOLD_MS
            ),
            ConfigWarning::IntervalClamped { option, given } => write!(
                f,
                "{} {}ms is too large, using {}ms",
                option, given, MAX_INTERVAL_MS
            ),
        }
    }
}

/// Fully resolved configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    project_key: String,
    endpoint: String,
    sample_rate: f64,
    flush_interval: Duration,
    batch_size: usize,
    slow_render_threshold_ms: f64,
    user_id: Option<String>,
    debug: bool,
    auto_track_routes: bool,
    track_component_performance: bool,
    track_errors: bool,
    track_sessions: bool,
    request_timeout: Duration,
    keepalive_grace: Duration,
    route_poll_interval: Duration,
    hydration_idle_timeout: Duration,
}

impl MonitorConfig {
    /// Merge options with defaults.
    ///
    /// Never fails: unusable values fall back to defaults and are reported
    /// as warnings for the caller to log.
    pub fn resolve(options: MonitorOptions) -> (Self, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();

        let project_key = match options.project_key {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                warnings.push(ConfigWarning::MissingProjectKey);
                String::new()
            }
        };

        let endpoint = match options.endpoint {
            Some(endpoint) if endpoint.trim().is_empty() => {
                warnings.push(ConfigWarning::EmptyEndpoint);
                DEFAULT_ENDPOINT.to_string()
            }
            Some(endpoint) => endpoint,
            None => DEFAULT_ENDPOINT.to_string(),
        };

        let sample_rate = match options.sample_rate {
            None => DEFAULT_SAMPLE_RATE,
            Some(rate) if rate.is_nan() => {
                warnings.push(ConfigWarning::SampleRateInvalid);
                DEFAULT_SAMPLE_RATE
            }
            Some(rate) if !(0.0..=1.0).contains(&rate) => {
                let used = rate.clamp(0.0, 1.0);
                warnings.push(ConfigWarning::SampleRateClamped { given: rate, used });
                used
            }
            Some(rate) => rate,
        };

        let flush_interval_ms = match options.flush_interval {
            Some(0) => {
                warnings.push(ConfigWarning::ZeroFlushInterval);
                DEFAULT_FLUSH_INTERVAL_MS
            }
            Some(ms) => ms,
            None => DEFAULT_FLUSH_INTERVAL_MS,
        };
        let flush_interval_ms = clamp_interval("flushInterval", flush_interval_ms, &mut warnings);

        let request_timeout_ms = clamp_interval(
            "requestTimeoutMs",
            options
                .request_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            &mut warnings,
        );
        let keepalive_grace_ms = clamp_interval(
            "keepaliveGraceMs",
            options
                .keepalive_grace_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_KEEPALIVE_GRACE_MS),
            &mut warnings,
        );
        let route_poll_interval_ms = clamp_interval(
            "routePollIntervalMs",
            options
                .route_poll_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_ROUTE_POLL_INTERVAL_MS),
            &mut warnings,
        );
        let hydration_idle_timeout_ms = clamp_interval(
            "hydrationIdleTimeoutMs",
            options
                .hydration_idle_timeout_ms
                .unwrap_or(DEFAULT_HYDRATION_IDLE_TIMEOUT_MS),
            &mut warnings,
        );

        let batch_size = match options.batch_size {
            Some(0) => {
                warnings.push(ConfigWarning::ZeroBatchSize);
                DEFAULT_BATCH_SIZE
            }
            Some(size) => size,
            None => DEFAULT_BATCH_SIZE,
        };

        let slow_render_threshold_ms = match options.slow_render_threshold {
            Some(t) if !t.is_finite() || t < 0.0 => {
                warnings.push(ConfigWarning::InvalidSlowRenderThreshold(t));
                DEFAULT_SLOW_RENDER_THRESHOLD_MS
            }
            Some(t) => t,
            None => DEFAULT_SLOW_RENDER_THRESHOLD_MS,
        };

        let config = Self {
            project_key,
            endpoint,
            sample_rate,
            flush_interval: Duration::from_millis(flush_interval_ms),
            batch_size,
            slow_render_threshold_ms,
            user_id: options.user_id.filter(|id| !id.is_empty()),
            debug: options.debug.unwrap_or(false),
            auto_track_routes: options.auto_track_routes.unwrap_or(true),
            track_component_performance: options.track_component_performance.unwrap_or(true),
            track_errors: options.track_errors.unwrap_or(true),
            track_sessions: options.track_sessions.unwrap_or(true),
            request_timeout: Duration::from_millis(request_timeout_ms),
            keepalive_grace: Duration::from_millis(keepalive_grace_ms),
            route_poll_interval: Duration::from_millis(route_poll_interval_ms),
            hydration_idle_timeout: Duration::from_millis(hydration_idle_timeout_ms),
        };

        (config, warnings)
    }

    /// Resolve and log each warning once.
    pub fn resolve_logged(options: MonitorOptions) -> Self {
        let (config, warnings) = Self::resolve(options);
        for warning in &warnings {
            tracing::warn!(target: "pagepulse::config", "{}", warning);
        }
        config
    }

    /// Reject options that cannot produce a working pipeline at all.
    pub fn validate_endpoint(&self) -> TelemetryResult<()> {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            Ok(())
        } else {
            Err(TelemetryError::Config(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )))
        }
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn slow_render_threshold_ms(&self) -> f64 {
        self.slow_render_threshold_ms
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn auto_track_routes(&self) -> bool {
        self.auto_track_routes
    }

    pub fn track_component_performance(&self) -> bool {
        self.track_component_performance
    }

    pub fn track_errors(&self) -> bool {
        self.track_errors
    }

    pub fn track_sessions(&self) -> bool {
        self.track_sessions
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn keepalive_grace(&self) -> Duration {
        self.keepalive_grace
    }

    pub fn route_poll_interval(&self) -> Duration {
        self.route_poll_interval
    }

    pub fn hydration_idle_timeout(&self) -> Duration {
        self.hydration_idle_timeout
    }
}

fn clamp_interval(option: &'static str, ms: u64, warnings: &mut Vec<ConfigWarning>) -> u64 {
    if ms > MAX_INTERVAL_MS {
        warnings.push(ConfigWarning::IntervalClamped { option, given: ms });
        MAX_INTERVAL_MS
    } else {
        ms
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::resolve(MonitorOptions::default()).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let (config, warnings) = MonitorConfig::resolve(MonitorOptions::new("proj_1"));

        assert!(warnings.is_empty());
        assert_eq!(config.project_key(), "proj_1");
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.sample_rate(), 1.0);
        assert_eq!(config.flush_interval(), Duration::from_millis(5_000));
        assert_eq!(config.batch_size(), 50);
        assert_eq!(config.slow_render_threshold_ms(), 16.0);
        assert!(config.user_id().is_none());
        assert!(!config.debug());
        assert!(config.auto_track_routes());
        assert!(config.track_component_performance());
        assert!(config.track_errors());
        assert!(config.track_sessions());
        assert_eq!(config.route_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.hydration_idle_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_resolve_builder_overrides() {
        let options = MonitorOptions::new("proj")
            .with_endpoint("https://collector.example.com/events")
            .with_sample_rate(0.25)
            .with_flush_interval(1_000)
            .with_batch_size(10)
            .with_slow_render_threshold(8.0)
            .with_user_id("user-7")
            .with_debug(true)
            .with_auto_track_routes(false)
            .with_track_component_performance(false)
            .with_track_errors(false)
            .with_track_sessions(false)
            .with_route_poll_interval(250);

        let (config, warnings) = MonitorConfig::resolve(options);
        assert!(warnings.is_empty());
        assert_eq!(config.endpoint(), "https://collector.example.com/events");
        assert_eq!(config.sample_rate(), 0.25);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 10);
        assert_eq!(config.slow_render_threshold_ms(), 8.0);
        assert_eq!(config.user_id(), Some("user-7"));
        assert!(config.debug());
        assert!(!config.auto_track_routes());
        assert!(!config.track_component_performance());
        assert!(!config.track_errors());
        assert!(!config.track_sessions());
        assert_eq!(config.route_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_project_key_warns() {
        let (config, warnings) = MonitorConfig::resolve(MonitorOptions::default());
        assert_eq!(config.project_key(), "");
        assert_eq!(warnings, vec![ConfigWarning::MissingProjectKey]);
    }

    #[test]
    fn test_sample_rate_clamped() {
        let (config, warnings) =
            MonitorConfig::resolve(MonitorOptions::new("p").with_sample_rate(1.5));
        assert_eq!(config.sample_rate(), 1.0);
        assert_eq!(
            warnings,
            vec![ConfigWarning::SampleRateClamped { given: 1.5, used: 1.0 }]
        );

        let (config, _) = MonitorConfig::resolve(MonitorOptions::new("p").with_sample_rate(-0.5));
        assert_eq!(config.sample_rate(), 0.0);
    }

    #[test]
    fn test_sample_rate_nan_uses_default() {
        let (config, warnings) =
            MonitorConfig::resolve(MonitorOptions::new("p").with_sample_rate(f64::NAN));
        assert_eq!(config.sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(warnings, vec![ConfigWarning::SampleRateInvalid]);
    }

    #[test]
    fn test_zero_values_use_defaults() {
        let options = MonitorOptions::new("p")
            .with_batch_size(0)
            .with_flush_interval(0)
            .with_endpoint("  ");
        let (config, warnings) = MonitorConfig::resolve(options);

        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(
            config.flush_interval(),
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)
        );
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_extreme_batch_size_is_kept() {
        let options =
            MonitorOptions::from_json_str(r#"{"projectKey": "p", "batchSize": 18446744073709551615}"#)
                .unwrap();
        let (config, warnings) = MonitorConfig::resolve(options);

        assert_eq!(config.batch_size(), usize::MAX);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_extreme_intervals_are_clamped() {
        let options = MonitorOptions::new("p")
            .with_flush_interval(u64::MAX)
            .with_route_poll_interval(u64::MAX);
        let (config, warnings) = MonitorConfig::resolve(options);

        let max = Duration::from_millis(MAX_INTERVAL_MS);
        assert_eq!(config.flush_interval(), max);
        assert_eq!(config.route_poll_interval(), max);
        assert_eq!(
            warnings,
            vec![
                ConfigWarning::IntervalClamped {
                    option: "flushInterval",
                    given: u64::MAX
                },
                ConfigWarning::IntervalClamped {
                    option: "routePollIntervalMs",
                    given: u64::MAX
                },
            ]
        );
    }

    #[test]
    fn test_invalid_threshold_uses_default() {
        let (config, warnings) =
            MonitorConfig::resolve(MonitorOptions::new("p").with_slow_render_threshold(-1.0));
        assert_eq!(config.slow_render_threshold_ms(), 16.0);
        assert_eq!(
            warnings,
            vec![ConfigWarning::InvalidSlowRenderThreshold(-1.0)]
        );
    }

    #[test]
    fn test_from_json_camel_case() {
        let json = r#"{
            "projectKey": "proj_json",
            "sampleRate": 0.5,
            "flushInterval": 2000,
            "batchSize": 20,
            "slowRenderThreshold": 32,
            "trackErrors": false,
            "someFutureOption": true
        }"#;

        let options = MonitorOptions::from_json_str(json).unwrap();
        assert_eq!(options.project_key.as_deref(), Some("proj_json"));
        assert_eq!(options.track_errors, Some(false));

        let (config, warnings) = MonitorConfig::resolve(options);
        assert!(warnings.is_empty());
        assert_eq!(config.sample_rate(), 0.5);
        assert_eq!(config.flush_interval(), Duration::from_secs(2));
        assert_eq!(config.batch_size(), 20);
        assert_eq!(config.slow_render_threshold_ms(), 32.0);
        assert!(!config.track_errors());
    }

    #[test]
    fn test_from_json_invalid() {
        let result = MonitorOptions::from_json_str("{ not json");
        assert!(matches!(result, Err(TelemetryError::Serialization(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = MonitorOptions::from_file("/nonexistent/pagepulse.json");
        assert!(matches!(result, Err(TelemetryError::Io(_))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "pagepulse-options-{}.json",
            std::process::id()
        ));
        let options = MonitorOptions::new("file_proj").with_batch_size(5);
        std::fs::write(&path, serde_json::to_string(&options).unwrap()).unwrap();

        let loaded = MonitorOptions::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, options);
    }

    #[test]
    fn test_validate_endpoint() {
        let (config, _) = MonitorConfig::resolve(MonitorOptions::new("p"));
        assert!(config.validate_endpoint().is_ok());

        let (config, _) =
            MonitorConfig::resolve(MonitorOptions::new("p").with_endpoint("ftp://nope"));
        assert!(matches!(
            config.validate_endpoint(),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(
            ConfigWarning::MissingProjectKey.to_string(),
            "projectKey is missing"
        );
        assert_eq!(
            ConfigWarning::ZeroBatchSize.to_string(),
            "batchSize must be positive, using 50"
        );
    }
}
