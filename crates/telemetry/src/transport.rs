//! Delivery of encoded batches to the remote endpoint.
//!
//! Delivery is fire-and-forget: the collector hands a batch over and never
//! waits for the result. Failures are logged and the batch is discarded.

use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::host::Beacon;

/// How a batch must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Regular asynchronous request
    Standard,
    /// The page is going away: the send must outlive it
    Durable,
}

/// One encoded batch bound for the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub endpoint: String,
    /// Newline-delimited JSON records
    pub body: String,
    pub mode: DeliveryMode,
    pub event_count: usize,
}

/// Result of one delivery attempt. Only ever logged.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Enqueued through the beacon; no response will be seen
    Beaconed,
    /// Endpoint answered with a success status
    Delivered(u16),
    /// Endpoint answered with a non-success status
    Rejected(u16),
    /// The request never completed
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Beaconed | DeliveryOutcome::Delivered(_))
    }
}

/// Hands batches to the network.
///
/// Implementations must return promptly: any waiting happens on a detached
/// task. An `Err` means the batch could not even be handed off.
pub trait DeliveryTransport: Send + Sync {
    fn deliver(&self, request: DeliveryRequest) -> TelemetryResult<()>;
}

/// Timeouts for HTTP delivery.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for standard deliveries
    pub request_timeout: Duration,
    /// How long a teardown delivery may stay in flight
    pub keepalive_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            keepalive_grace: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Take the timeouts from a resolved monitor config.
    pub fn from_monitor(config: &MonitorConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            keepalive_grace: config.keepalive_grace(),
        }
    }

    /// Set the standard request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the teardown grace period.
    pub fn with_keepalive_grace(mut self, grace: Duration) -> Self {
        self.keepalive_grace = grace;
        self
    }

    fn timeout_for(&self, mode: DeliveryMode) -> Duration {
        match mode {
            DeliveryMode::Standard => self.request_timeout,
            DeliveryMode::Durable => self.keepalive_grace,
        }
    }
}

/// How a batch left the process.
#[derive(Debug)]
pub enum Dispatch {
    /// Accepted by the beacon
    Beaconed,
    /// Sent on a detached task; awaiting the handle is optional
    Request(JoinHandle<DeliveryOutcome>),
}

/// POSTs batches with `reqwest`, preferring the host's beacon for durable
/// sends.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
    beacon: Option<Arc<dyn Beacon>>,
}

impl HttpTransport {
    /// Create a transport with the given timeouts.
    pub fn new(config: TransportConfig) -> TelemetryResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TelemetryError::Network(e.to_string()))?;
        Ok(Self {
            client,
            config,
            beacon: None,
        })
    }

    /// Use the host's beacon for durable sends when it has one.
    pub fn with_beacon(mut self, beacon: Option<Arc<dyn Beacon>>) -> Self {
        self.beacon = beacon;
        self
    }

    /// Get the transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a batch and expose the in-flight task.
    ///
    /// Durable sends go through the beacon first. If there is no beacon or
    /// it refuses the payload, a POST is spawned on the current runtime.
    pub fn dispatch(&self, request: DeliveryRequest) -> TelemetryResult<Dispatch> {
        if request.mode == DeliveryMode::Durable {
            if let Some(beacon) = &self.beacon {
                if beacon.send_beacon(&request.endpoint, &request.body) {
                    tracing::debug!(
                        target: "pagepulse::transport",
                        events = request.event_count,
                        "batch enqueued via beacon"
                    );
                    return Ok(Dispatch::Beaconed);
                }
                tracing::debug!(
                    target: "pagepulse::transport",
                    "beacon refused batch, falling back to request"
                );
            }
        }

        let handle = Handle::try_current()
            .map_err(|_| TelemetryError::Transport("no async runtime available".to_string()))?;
        let transport = self.clone();
        Ok(Dispatch::Request(
            handle.spawn(async move { transport.post(request).await }),
        ))
    }

    /// POST one batch and report what happened.
    pub async fn post(&self, request: DeliveryRequest) -> DeliveryOutcome {
        let timeout = self.config.timeout_for(request.mode);
        let event_count = request.event_count;

        let result = self
            .client
            .post(&request.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(request.body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16();
                tracing::debug!(
                    target: "pagepulse::transport",
                    status,
                    events = event_count,
                    "batch delivered"
                );
                DeliveryOutcome::Delivered(status)
            }
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::warn!(
                    target: "pagepulse::transport",
                    status,
                    events = event_count,
                    "endpoint rejected batch, dropping it"
                );
                DeliveryOutcome::Rejected(status)
            }
            Err(e) => {
                tracing::warn!(
                    target: "pagepulse::transport",
                    error = %e,
                    events = event_count,
                    "failed to send batch, dropping it"
                );
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }
}

impl DeliveryTransport for HttpTransport {
    fn deliver(&self, request: DeliveryRequest) -> TelemetryResult<()> {
        // The in-flight task is detached; its outcome is only logged.
        self.dispatch(request).map(|_| ())
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("beacon", &self.beacon.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBeacon {
        accept: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBeacon {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl Beacon for RecordingBeacon {
        fn send_beacon(&self, url: &str, body: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((url.to_string(), body.to_string()));
            self.accept
        }
    }

    fn request(endpoint: String, mode: DeliveryMode) -> DeliveryRequest {
        DeliveryRequest {
            endpoint,
            body: "{\"eventType\":\"render\"}".to_string(),
            mode,
            event_count: 1,
        }
    }

    async fn outcome_of(dispatch: Dispatch) -> DeliveryOutcome {
        match dispatch {
            Dispatch::Beaconed => DeliveryOutcome::Beaconed,
            Dispatch::Request(handle) => handle.await.unwrap(),
        }
    }

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.keepalive_grace, Duration::from_secs(10));
        assert_eq!(config.timeout_for(DeliveryMode::Durable), Duration::from_secs(10));
    }

    #[test]
    fn test_transport_config_builder() {
        let config = TransportConfig::default()
            .with_request_timeout(Duration::from_secs(5))
            .with_keepalive_grace(Duration::from_secs(2));
        assert_eq!(config.timeout_for(DeliveryMode::Standard), Duration::from_secs(5));
        assert_eq!(config.timeout_for(DeliveryMode::Durable), Duration::from_secs(2));
    }

    #[test]
    fn test_outcome_success() {
        assert!(DeliveryOutcome::Beaconed.is_success());
        assert!(DeliveryOutcome::Delivered(202).is_success());
        assert!(!DeliveryOutcome::Rejected(500).is_success());
        assert!(!DeliveryOutcome::Failed("x".to_string()).is_success());
    }

    #[test]
    fn test_dispatch_without_runtime_fails() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let result = transport.deliver(request(
            "http://127.0.0.1:9/events".to_string(),
            DeliveryMode::Standard,
        ));
        assert!(matches!(result, Err(TelemetryError::Transport(_))));
    }

    #[tokio::test]
    async fn test_post_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/events")
            .match_header("content-type", "application/json")
            .match_body("{\"eventType\":\"render\"}")
            .with_status(202)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let dispatch = transport
            .dispatch(request(
                format!("{}/v0/events", server.url()),
                DeliveryMode::Standard,
            ))
            .unwrap();

        assert_eq!(outcome_of(dispatch).await, DeliveryOutcome::Delivered(202));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_rejected_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/events")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let dispatch = transport
            .dispatch(request(
                format!("{}/v0/events", server.url()),
                DeliveryMode::Standard,
            ))
            .unwrap();

        assert_eq!(outcome_of(dispatch).await, DeliveryOutcome::Rejected(500));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_network_failure() {
        let transport = HttpTransport::new(
            TransportConfig::default().with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        // Nothing listens on the discard port.
        let outcome = transport
            .post(request(
                "http://127.0.0.1:9/events".to_string(),
                DeliveryMode::Standard,
            ))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_durable_prefers_beacon() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/events")
            .expect(0)
            .create_async()
            .await;

        let beacon = RecordingBeacon::new(true);
        let transport = HttpTransport::new(TransportConfig::default())
            .unwrap()
            .with_beacon(Some(beacon.clone()));

        let endpoint = format!("{}/v0/events", server.url());
        let dispatch = transport
            .dispatch(request(endpoint.clone(), DeliveryMode::Durable))
            .unwrap();

        assert!(matches!(dispatch, Dispatch::Beaconed));
        let sent = beacon.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, endpoint);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_standard_ignores_beacon() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/events")
            .with_status(200)
            .create_async()
            .await;

        let beacon = RecordingBeacon::new(true);
        let transport = HttpTransport::new(TransportConfig::default())
            .unwrap()
            .with_beacon(Some(beacon.clone()));

        let dispatch = transport
            .dispatch(request(
                format!("{}/v0/events", server.url()),
                DeliveryMode::Standard,
            ))
            .unwrap();

        assert_eq!(outcome_of(dispatch).await, DeliveryOutcome::Delivered(200));
        assert!(beacon.sent.lock().unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refused_beacon_falls_back_to_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/events")
            .with_status(200)
            .create_async()
            .await;

        let beacon = RecordingBeacon::new(false);
        let transport = HttpTransport::new(TransportConfig::default())
            .unwrap()
            .with_beacon(Some(beacon.clone()));

        let dispatch = transport
            .dispatch(request(
                format!("{}/v0/events", server.url()),
                DeliveryMode::Durable,
            ))
            .unwrap();

        assert_eq!(outcome_of(dispatch).await, DeliveryOutcome::Delivered(200));
        assert_eq!(beacon.sent.lock().unwrap().len(), 1);
        mock.assert_async().await;
    }
}
