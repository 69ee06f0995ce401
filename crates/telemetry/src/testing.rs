//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pulse_perf::ManualClock;

use crate::collector::MetricCollector;
use crate::config::{MonitorConfig, MonitorOptions};
use crate::error::{TelemetryError, TelemetryResult};
use crate::event::{DestinationRecord, MetricEvent};
use crate::host::PageHandle;
use crate::sampling::SeededRandom;
use crate::transport::{DeliveryMode, DeliveryRequest, DeliveryTransport};

/// Records every batch it is handed. Can be told to refuse hand-offs.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<DeliveryRequest>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn modes(&self) -> Vec<DeliveryMode> {
        self.requests().iter().map(|r| r.mode).collect()
    }

    /// Every record delivered so far, in order.
    pub fn records(&self) -> Vec<DestinationRecord> {
        self.requests()
            .iter()
            .flat_map(|r| {
                r.body
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect::<Vec<DestinationRecord>>()
            })
            .collect()
    }
}

impl DeliveryTransport for RecordingTransport {
    fn deliver(&self, request: DeliveryRequest) -> TelemetryResult<()> {
        self.requests.lock().unwrap().push(request);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TelemetryError::Network("simulated outage".to_string()));
        }
        Ok(())
    }
}

/// A collector wired to a manual clock and a recording transport.
pub struct Fixture {
    pub collector: MetricCollector,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
    pub page: Arc<PageHandle>,
}

impl Fixture {
    pub fn new(options: MonitorOptions) -> Self {
        Self::with_page(options, Arc::new(PageHandle::new("/")))
    }

    pub fn with_page(options: MonitorOptions, page: Arc<PageHandle>) -> Self {
        let clock = Arc::new(ManualClock::new(0.0).with_epoch_ms(1_700_000_000_000));
        let transport = RecordingTransport::new();
        let (config, _) = MonitorConfig::resolve(options);
        let collector = MetricCollector::new(
            config,
            page.clone(),
            transport.clone(),
            clock.clone(),
            Box::new(SeededRandom::new(7)),
        );
        Self {
            collector,
            clock,
            transport,
            page,
        }
    }

    /// Events still waiting in the buffer.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.collector.buffered_events()
    }
}
