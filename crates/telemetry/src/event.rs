//! Metric event types and the destination wire format.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::TelemetryResult;

/// Open key-value metadata carried by an event.
pub type Metadata = HashMap<String, Value>;

/// Kind of measurement an event carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Hydration start to settle
    Hydration,
    /// One component render commit
    Render,
    /// One route transition
    Navigation,
    /// Page load timing or a long task
    PageTiming,
    /// Caller-defined event
    Custom,
    /// Error reported by the host
    Error,
}

impl EventType {
    /// Wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Hydration => "hydration",
            EventType::Render => "render",
            EventType::Navigation => "navigation",
            EventType::PageTiming => "page_timing",
            EventType::Custom => "custom",
            EventType::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an observer hands the collector. The collector stamps time and
/// identity to turn it into a [`MetricEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialEvent {
    pub event_type: EventType,
    pub route: String,
    pub component_name: Option<String>,
    pub duration: f64,
    pub metadata: Metadata,
    pub user_id: Option<String>,
}

impl PartialEvent {
    /// Create a partial event of the given type on a route.
    pub fn new(event_type: EventType, route: impl Into<String>, duration: f64) -> Self {
        Self {
            event_type,
            route: route.into(),
            component_name: None,
            duration,
            metadata: Metadata::new(),
            user_id: None,
        }
    }

    /// Attach the component the measurement belongs to.
    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Merge a metadata map; later keys win.
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Override the user id for this event.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A completed telemetry event. Never mutated once buffered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricEvent {
    /// Wall-clock time of collection, epoch milliseconds
    pub timestamp: i64,
    pub session_id: String,
    pub project_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub event_type: EventType,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    /// Milliseconds, never negative
    pub duration: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MetricEvent {
    /// Complete a partial event with identity and time.
    ///
    /// Negative or non-finite durations are clamped to zero.
    pub fn from_partial(
        partial: PartialEvent,
        timestamp: i64,
        session_id: &str,
        project_key: &str,
        default_user_id: Option<&str>,
    ) -> Self {
        let duration = if partial.duration.is_finite() {
            partial.duration.max(0.0)
        } else {
            0.0
        };

        Self {
            timestamp,
            session_id: session_id.to_string(),
            project_key: project_key.to_string(),
            user_id: partial
                .user_id
                .or_else(|| default_user_id.map(str::to_string)),
            event_type: partial.event_type,
            route: partial.route,
            component_name: partial.component_name,
            duration,
            metadata: partial.metadata,
        }
    }

    /// Map into the destination's record schema.
    pub fn to_destination(&self, user_agent: &str) -> TelemetryResult<DestinationRecord> {
        let metadata = if self.metadata.is_empty() {
            "{}".to_string()
        } else {
            serde_json::to_string(&self.metadata)?
        };

        Ok(DestinationRecord {
            timestamp: format_timestamp(self.timestamp),
            project_id: self.project_key.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone().unwrap_or_default(),
            event_type: self.event_type.as_str().to_string(),
            route: self.route.clone(),
            component_name: self.component_name.clone().unwrap_or_default(),
            duration: self.duration,
            metadata,
            user_agent: user_agent.to_string(),
            country: String::new(),
            city: String::new(),
        })
    }
}

/// One event in the ingestion endpoint's schema.
///
/// Field renaming only: values mean the same as on [`MetricEvent`]. Geo
/// fields are always empty on the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRecord {
    /// ISO-8601 with milliseconds, UTC
    pub timestamp: String,
    pub project_id: String,
    pub session_id: String,
    pub user_id: String,
    pub event_type: String,
    pub route: String,
    pub component_name: String,
    pub duration: f64,
    /// Metadata serialized as a JSON string
    pub metadata: String,
    pub user_agent: String,
    pub country: String,
    pub city: String,
}

/// Encode a batch as newline-delimited JSON, one record per line.
pub fn encode_batch(events: &[MetricEvent], user_agent: &str) -> TelemetryResult<String> {
    let mut lines = Vec::with_capacity(events.len());
    for event in events {
        let record = event.to_destination(user_agent)?;
        lines.push(serde_json::to_string(&record)?);
    }
    Ok(lines.join("\n"))
}

fn format_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
