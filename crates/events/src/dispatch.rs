//! Gateway dispatch: pushing signed command packets to facilities.
//!
//! [`GatewayDispatcher`] is the facility-scoped push capability the
//! revocation flows consume. [`HttpGatewayDispatcher`] POSTs the wire tuple
//! to every gateway endpoint registered for the facility.
//! [`DispatchOutbox`] wraps any dispatcher in a bounded queue with
//! background retry, making the best-effort contract explicit: the caller
//! returns as soon as the packet is queued, and exhausted delivery failures
//! are logged, never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use keyway_core::command::SignedPacket;
use keyway_core::types::DbId;
use keyway_db::repositories::GatewayRepo;
use keyway_db::DbPool;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single push attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded capacity of the outbox queue.
const OUTBOX_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for gateway push failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A gateway returned a non-2xx status code.
    #[error("Gateway returned HTTP {0}")]
    HttpStatus(u16),

    /// Gateway endpoints could not be resolved.
    #[error("Gateway lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),

    /// The outbox worker has shut down.
    #[error("Dispatch queue is closed")]
    QueueClosed,
}

// ---------------------------------------------------------------------------
// GatewayDispatcher
// ---------------------------------------------------------------------------

/// Facility-scoped, send-only push capability for signed packets.
///
/// Delivery is best-effort: callers must treat persisted state as
/// authoritative regardless of the outcome.
#[async_trait]
pub trait GatewayDispatcher: Send + Sync {
    /// Push a signed packet to all gateways belonging to a facility.
    async fn unicast_to_facility(
        &self,
        facility_id: DbId,
        packet: &SignedPacket,
    ) -> Result<(), DispatchError>;
}

// ---------------------------------------------------------------------------
// HttpGatewayDispatcher
// ---------------------------------------------------------------------------

/// Pushes packets over HTTP POST to each of the facility's gateways.
pub struct HttpGatewayDispatcher {
    pool: DbPool,
    client: reqwest::Client,
}

impl HttpGatewayDispatcher {
    /// Create a dispatcher with a pre-configured HTTP client.
    pub fn new(pool: DbPool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { pool, client }
    }

    /// Execute a single POST of the wire tuple and check the status.
    async fn try_send(&self, url: &str, packet: &SignedPacket) -> Result<(), DispatchError> {
        let response = self.client.post(url).json(&packet.wire_tuple()).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayDispatcher for HttpGatewayDispatcher {
    /// Push to every gateway of the facility. A failing endpoint does not
    /// stop delivery to the others; the last failure is reported.
    async fn unicast_to_facility(
        &self,
        facility_id: DbId,
        packet: &SignedPacket,
    ) -> Result<(), DispatchError> {
        let endpoints = GatewayRepo::endpoints_for_facility(&self.pool, facility_id).await?;
        if endpoints.is_empty() {
            tracing::debug!(facility_id, "No gateways registered, dropping packet");
            return Ok(());
        }

        let mut last_err: Option<DispatchError> = None;
        for url in &endpoints {
            if let Err(e) = self.try_send(url, packet).await {
                tracing::warn!(facility_id, url, error = %e, "Gateway push failed");
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchOutbox
// ---------------------------------------------------------------------------

/// One queued push.
struct OutboxItem {
    facility_id: DbId,
    packet: SignedPacket,
}

/// Bounded queue in front of a dispatcher, drained by a background worker
/// with exponential-backoff retry.
///
/// Implements [`GatewayDispatcher`] itself, so the listener can be composed
/// against either the outbox (production) or a bare dispatcher (tests).
#[derive(Clone)]
pub struct DispatchOutbox {
    tx: mpsc::Sender<OutboxItem>,
}

impl DispatchOutbox {
    /// Spawn the outbox worker and return the enqueue handle.
    ///
    /// The worker drains queued packets until `cancel` fires or every
    /// handle is dropped.
    pub fn start(inner: Arc<dyn GatewayDispatcher>, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(Self::run(inner, rx, cancel));
        Self { tx }
    }

    async fn run(
        inner: Arc<dyn GatewayDispatcher>,
        mut rx: mpsc::Receiver<OutboxItem>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatch outbox cancelled");
                    break;
                }
                item = rx.recv() => match item {
                    Some(item) => Self::deliver(inner.as_ref(), item).await,
                    None => {
                        tracing::info!("Dispatch outbox closed, worker shutting down");
                        break;
                    }
                },
            }
        }
    }

    /// Attempt delivery with retry; exhausted failures are logged and
    /// dropped -- persisted state remains the source of truth.
    async fn deliver(inner: &dyn GatewayDispatcher, item: OutboxItem) {
        for (attempt, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
            match inner.unicast_to_facility(item.facility_id, &item.packet).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        facility_id = item.facility_id,
                        error = %e,
                        "Gateway push attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
                }
            }
        }

        // Final attempt after the last backoff.
        if let Err(e) = inner.unicast_to_facility(item.facility_id, &item.packet).await {
            tracing::error!(
                facility_id = item.facility_id,
                error = %e,
                "Gateway push failed after all retries, dropping packet"
            );
        }
    }
}

#[async_trait]
impl GatewayDispatcher for DispatchOutbox {
    /// Enqueue the packet; returns once queued, not once delivered.
    async fn unicast_to_facility(
        &self,
        facility_id: DbId,
        packet: &SignedPacket,
    ) -> Result<(), DispatchError> {
        self.tx
            .send(OutboxItem {
                facility_id,
                packet: packet.clone(),
            })
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Dispatcher double that records calls and fails a configurable number
    /// of times before succeeding.
    struct FlakyDispatcher {
        calls: Mutex<Vec<DbId>>,
        failures_left: Mutex<u32>,
    }

    impl FlakyDispatcher {
        fn new(failures: u32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures_left: Mutex::new(failures),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GatewayDispatcher for FlakyDispatcher {
        async fn unicast_to_facility(
            &self,
            facility_id: DbId,
            _packet: &SignedPacket,
        ) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push(facility_id);
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(DispatchError::HttpStatus(503));
            }
            Ok(())
        }
    }

    fn packet() -> SignedPacket {
        SignedPacket {
            payload: serde_json::json!({"cmd_type": "DENYLIST_ADD"}),
            signature: "sig".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outbox_delivers_on_first_success() {
        let inner = Arc::new(FlakyDispatcher::new(0));
        let cancel = CancellationToken::new();
        let outbox = DispatchOutbox::start(Arc::clone(&inner) as Arc<dyn GatewayDispatcher>, cancel.clone());

        outbox.unicast_to_facility(100, &packet()).await.unwrap();

        // Let the worker drain the queue.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(inner.call_count(), 1);
        assert_eq!(inner.calls.lock().unwrap()[0], 100);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn outbox_retries_with_backoff_then_gives_up() {
        // 4 failures > 1 initial + 3 retries: delivery is dropped.
        let inner = Arc::new(FlakyDispatcher::new(4));
        let cancel = CancellationToken::new();
        let outbox = DispatchOutbox::start(Arc::clone(&inner) as Arc<dyn GatewayDispatcher>, cancel.clone());

        outbox.unicast_to_facility(7, &packet()).await.unwrap();

        // Advance past all backoff delays (1 + 2 + 4 seconds).
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(inner.call_count(), 4, "initial attempt plus three retries");
        cancel.cancel();
    }

    #[tokio::test]
    async fn enqueue_after_cancel_reports_closed() {
        let inner = Arc::new(FlakyDispatcher::new(0));
        let cancel = CancellationToken::new();
        let outbox = DispatchOutbox::start(Arc::clone(&inner) as Arc<dyn GatewayDispatcher>, cancel.clone());

        cancel.cancel();
        // Give the worker a moment to observe cancellation and drop the receiver.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = outbox.unicast_to_facility(1, &packet()).await;
        assert_matches::assert_matches!(result, Err(DispatchError::QueueClosed));
    }
}
