//! Broker transports
//!
//! The node publishes through an HTTP bridge in front of the message broker:
//! `POST {url}/topics/{topic}` with the QoS level in `X-QoS`, and liveness via
//! `GET {url}/health`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Transport errors (all transient from the coordinator's point of view)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Broker returned status {0}")]
    BrokerStatus(reqwest::StatusCode),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Delivery rejected: {0}")]
    Rejected(String),
    #[error("Transport setup failed: {0}")]
    Setup(String),
}

/// Connection to the remote broker
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Re-establish the connection; `Ok` means the broker is reachable
    async fn reconnect(&self) -> Result<(), TransportError>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// HTTP bridge
// ============================================================================

/// Publishes through the broker's HTTP bridge
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    broker_url: String,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(broker_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            broker_url: broker_url.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(false),
        })
    }

    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    fn mark(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            debug!(url = %self.broker_url, connected, "Broker link changed");
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        let result = self
            .http
            .post(format!("{}/topics/{}", self.broker_url, topic.trim_start_matches('/')))
            .header("Content-Type", "application/json")
            .header("X-QoS", qos.level().to_string())
            .body(payload.to_vec())
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                // Connect errors and timeouts mean the broker is gone
                if e.is_connect() || e.is_timeout() {
                    self.mark(false);
                }
                return Err(TransportError::Http(e));
            }
        };

        self.mark(true);
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::BrokerStatus(resp.status()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let result = self
            .http
            .get(format!("{}/health", self.broker_url))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.mark(true);
                info!(url = %self.broker_url, "Broker reachable");
                Ok(())
            }
            Ok(resp) => {
                self.mark(false);
                Err(TransportError::BrokerStatus(resp.status()))
            }
            Err(e) => {
                self.mark(false);
                Err(TransportError::Http(e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// ============================================================================
// In-memory transport
// ============================================================================

/// A message accepted by the in-memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct MemoryState {
    delivered: Vec<DeliveredMessage>,
    /// Remaining successful deliveries before every publish fails
    fail_after: Option<usize>,
    attempts: usize,
    latency: Duration,
}

/// Loopback transport with connectivity control and failure injection
#[derive(Debug)]
pub struct MemoryTransport {
    connected: AtomicBool,
    reconnect_succeeds: AtomicBool,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            reconnect_succeeds: AtomicBool::new(true),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Outcome of the next `reconnect()` calls
    pub fn set_reconnect_succeeds(&self, succeeds: bool) {
        self.reconnect_succeeds.store(succeeds, Ordering::SeqCst);
    }

    /// Accept `successes` more publishes, then fail every publish
    pub fn fail_after(&self, successes: usize) {
        self.lock().fail_after = Some(successes);
    }

    pub fn clear_failures(&self) {
        self.lock().fail_after = None;
    }

    /// Delay every publish by `latency`, like a slow broker link
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.lock().delivered.clone()
    }

    /// Publish calls made, successful or not
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.attempts += 1;

        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        match state.fail_after {
            Some(0) => {
                return Err(TransportError::Rejected("injected failure".to_string()));
            }
            Some(ref mut remaining) => *remaining -= 1,
            None => {}
        }

        state.delivered.push(DeliveredMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.reconnect_succeeds.load(Ordering::SeqCst) {
            self.set_connected(true);
            Ok(())
        } else {
            warn!("In-memory transport refusing reconnect");
            self.set_connected(false);
            Err(TransportError::NotConnected)
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
