//! Anonymous session identity.

use chrono::{DateTime, Utc};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::{Builder, Uuid};

/// One page load's worth of identity.
///
/// The id is random and never persisted, so it cannot be linked across
/// reloads. A user id is attached only when the caller supplies one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    session_id: String,
    /// When the session started
    started_at: DateTime<Utc>,
    /// Caller-supplied user identity
    user_id: Option<String>,
}

impl Session {
    /// Create a new session with a fresh id.
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            session_id: generate_session_id(),
            started_at: Utc::now(),
            user_id,
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// User id, if the caller supplied one.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// When the session started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time elapsed since the session started.
    pub fn age(&self) -> Duration {
        let diff = Utc::now().signed_duration_since(self.started_at);
        Duration::from_millis(diff.num_milliseconds().max(0) as u64)
    }
}

/// Generate a random v4 UUID string.
///
/// Uses the operating system's random source. If that is unavailable the
/// bytes come from a generator seeded with the current time, which is not
/// cryptographic but keeps ids unique enough for session grouping.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        tracing::debug!(
            target: "pagepulse::session",
            error = %e,
            "os random source unavailable, using fallback"
        );
        fallback_bytes(&mut bytes);
    }
    uuid_from_bytes(bytes).to_string()
}

fn fallback_bytes(bytes: &mut [u8; 16]) {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seed = nanos ^ (u64::from(std::process::id()) << 32);
    StdRng::seed_from_u64(seed).fill_bytes(bytes);
}

fn uuid_from_bytes(bytes: [u8; 16]) -> Uuid {
    Builder::from_random_bytes(bytes).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_session_new() {
        let session = Session::new(None);
        assert!(!session.id().is_empty());
        assert!(session.user_id().is_none());
    }

    #[test]
    fn test_session_with_user() {
        let session = Session::new(Some("user-1".to_string()));
        assert_eq!(session.user_id(), Some("user-1"));
    }

    #[test]
    fn test_session_unique_ids() {
        let a = Session::new(None);
        let b = Session::new(None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_session_id_is_v4_uuid() {
        let id = generate_session_id();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.len(), 36);
    }

    #[test]
    fn test_fallback_bytes_form_v4_uuid() {
        let mut bytes = [0u8; 16];
        fallback_bytes(&mut bytes);
        let uuid = uuid_from_bytes(bytes);
        assert_eq!(uuid.get_version_num(), 4);
        assert_eq!(uuid.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn test_session_age() {
        let session = Session::new(None);
        assert!(session.age().as_millis() < 1_000);
        sleep(Duration::from_millis(20));
        assert!(session.age().as_millis() >= 20);
    }

    #[test]
    fn test_session_serialization() {
        let session = Session::new(Some("u".to_string()));
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session.id(), parsed.id());
        assert_eq!(session.user_id(), parsed.user_id());
    }
}
