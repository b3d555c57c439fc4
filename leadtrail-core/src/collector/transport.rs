//! Two-tier event delivery
//!
//! A flush hands its batch to a [`Deliver`] implementation and moves on; it
//! never waits for the network. [`TieredTransport`] tries the beacon tier
//! first (a bounded queue drained by a background worker that outlives page
//! teardown), then falls back to the fetch tier (one detached request per
//! batch). Whatever happens after a tier accepts a batch is logged by that
//! tier and never reported back to the engine.
//!
//! ```text
//! EventQueue::flush ──► TieredTransport ──► BeaconSender ──► BeaconWorker ──► POST
//!                               │ refused
//!                               └─────────► HttpFetch (spawned request) ───► POST
//! ```

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::error::{Error, Result};

use super::client::ApiClient;
use super::events::EventBatch;

/// Tier that accepted a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Beacon,
    Fetch,
}

/// Result of handing a batch to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A tier took ownership of the batch
    Accepted(Tier),
    /// No tier would take it; the batch is dropped
    Failed(String),
}

/// Anything a flushed batch can be handed to
pub trait Deliver: Send {
    fn deliver(&self, batch: EventBatch) -> DeliveryOutcome;
}

/// Survive-unload tier: accepts or refuses synchronously
pub trait Beacon: Send {
    /// Returns false when the payload is refused
    fn send_beacon(&self, body: Vec<u8>) -> bool;
}

/// Keep-alive request tier
pub trait Fetch: Send {
    /// Start a request for `body`; errors only if it could not be started
    fn fetch(&self, body: Vec<u8>) -> Result<()>;
}

/// Beacon first, fetch as fallback
pub struct TieredTransport {
    beacon: Option<Box<dyn Beacon>>,
    fetch: Box<dyn Fetch>,
}

impl TieredTransport {
    pub fn new(beacon: Option<Box<dyn Beacon>>, fetch: Box<dyn Fetch>) -> Self {
        Self { beacon, fetch }
    }

    /// HTTP tiers for `client`, spawned on `handle`
    ///
    /// The returned [`BeaconWorker`] finishes once this transport (the only
    /// beacon sender) is dropped and its queue is drained.
    pub fn http(client: ApiClient, config: &TransportConfig, handle: &Handle) -> (Self, BeaconWorker) {
        let (sender, worker) = BeaconWorker::spawn(client.clone(), config, handle);
        let fetch = HttpFetch::new(client, handle.clone());
        (Self::new(Some(Box::new(sender)), Box::new(fetch)), worker)
    }
}

impl Deliver for TieredTransport {
    fn deliver(&self, batch: EventBatch) -> DeliveryOutcome {
        let body = match batch.to_body() {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::Failed(format!("failed to serialize batch: {}", e)),
        };

        if let Some(beacon) = &self.beacon {
            if beacon.send_beacon(body.clone()) {
                return DeliveryOutcome::Accepted(Tier::Beacon);
            }
            tracing::debug!(bytes = body.len(), "Beacon refused batch, falling back to fetch");
        }

        match self.fetch.fetch(body) {
            Ok(()) => DeliveryOutcome::Accepted(Tier::Fetch),
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

// ============================================
// Beacon tier
// ============================================

/// Producer side of the beacon queue
#[derive(Debug, Clone)]
pub struct BeaconSender {
    tx: mpsc::Sender<Vec<u8>>,
    max_bytes: usize,
}

impl BeaconSender {
    pub fn new(tx: mpsc::Sender<Vec<u8>>, max_bytes: usize) -> Self {
        Self { tx, max_bytes }
    }
}

impl Beacon for BeaconSender {
    fn send_beacon(&self, body: Vec<u8>) -> bool {
        if body.len() > self.max_bytes {
            return false;
        }
        self.tx.try_send(body).is_ok()
    }
}

/// Background task posting queued beacon payloads in order
pub struct BeaconWorker {
    join: JoinHandle<usize>,
}

impl BeaconWorker {
    /// Spawn the worker; payloads arrive through the returned sender
    pub fn spawn(client: ApiClient, config: &TransportConfig, handle: &Handle) -> (BeaconSender, Self) {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(config.beacon_capacity);

        let join = handle.spawn(async move {
            let mut delivered = 0;
            while let Some(body) = rx.recv().await {
                match client.send_body(body).await {
                    Ok(_) => delivered += 1,
                    Err(e) => tracing::warn!(error = %e, "Beacon delivery failed"),
                }
            }
            delivered
        });

        (BeaconSender::new(tx, config.beacon_max_bytes), Self { join })
    }

    /// Wait for every queued payload to be posted
    ///
    /// Completes once all senders are dropped. Returns the number of
    /// successful posts.
    pub async fn drain(self) -> usize {
        match self.join.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!(error = %e, "Beacon worker did not finish cleanly");
                0
            }
        }
    }
}

// ============================================
// Fetch tier
// ============================================

/// One detached POST per batch
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: ApiClient,
    handle: Handle,
}

impl HttpFetch {
    pub fn new(client: ApiClient, handle: Handle) -> Self {
        Self { client, handle }
    }

    /// Fetch tier on the current tokio runtime
    pub fn current(client: ApiClient) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Delivery(format!("no async runtime for fetch tier: {}", e)))?;
        Ok(Self::new(client, handle))
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, body: Vec<u8>) -> Result<()> {
        let client = self.client.clone();
        self.handle.spawn(async move {
            let bytes = body.len();
            match client.send_body(body).await {
                Ok(_) => tracing::debug!(bytes, "Delivered batch"),
                Err(e) => tracing::warn!(error = %e, "Failed to deliver batch"),
            }
        });
        Ok(())
    }
}

// ============================================
// In-memory transport
// ============================================

/// Records every batch instead of sending it (dry runs, tests)
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    batches: Arc<Mutex<Vec<EventBatch>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches delivered so far, in order
    pub fn batches(&self) -> Vec<EventBatch> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every delivered event, flattened across batches
    pub fn events(&self) -> Vec<crate::types::TrackEvent> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.events)
            .collect()
    }
}

impl Deliver for MemoryTransport {
    fn deliver(&self, batch: EventBatch) -> DeliveryOutcome {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch);
        DeliveryOutcome::Accepted(Tier::Beacon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBeacon {
        accept: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Beacon for FakeBeacon {
        fn send_beacon(&self, _body: Vec<u8>) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    struct FakeFetch {
        ok: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Fetch for FakeFetch {
        fn fetch(&self, _body: Vec<u8>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(Error::Delivery("offline".to_string()))
            }
        }
    }

    fn transport(beacon: Option<bool>, fetch_ok: bool) -> (TieredTransport, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let beacon_calls = Arc::new(AtomicUsize::new(0));
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let beacon = beacon.map(|accept| {
            Box::new(FakeBeacon {
                accept,
                calls: beacon_calls.clone(),
            }) as Box<dyn Beacon>
        });
        let fetch = Box::new(FakeFetch {
            ok: fetch_ok,
            calls: fetch_calls.clone(),
        });
        (TieredTransport::new(beacon, fetch), beacon_calls, fetch_calls)
    }

    #[test]
    fn test_beacon_preferred() {
        let (t, beacon, fetch) = transport(Some(true), true);
        assert_eq!(t.deliver(EventBatch::default()), DeliveryOutcome::Accepted(Tier::Beacon));
        assert_eq!(beacon.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_beacon_falls_back_to_fetch() {
        let (t, beacon, fetch) = transport(Some(false), true);
        assert_eq!(t.deliver(EventBatch::default()), DeliveryOutcome::Accepted(Tier::Fetch));
        assert_eq!(beacon.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_beacon_uses_fetch() {
        let (t, _, fetch) = transport(None, true);
        assert_eq!(t.deliver(EventBatch::default()), DeliveryOutcome::Accepted(Tier::Fetch));
        assert_eq!(fetch.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_both_tiers_failing() {
        let (t, _, _) = transport(Some(false), false);
        assert!(matches!(t.deliver(EventBatch::default()), DeliveryOutcome::Failed(_)));
    }

    #[test]
    fn test_beacon_sender_limits() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = BeaconSender::new(tx, 8);

        assert!(!sender.send_beacon(vec![0; 9]));
        assert!(sender.send_beacon(vec![0; 8]));
        // channel full
        assert!(!sender.send_beacon(vec![0; 1]));

        assert_eq!(rx.try_recv().unwrap().len(), 8);
        assert!(sender.send_beacon(vec![0; 1]));
    }

    #[test]
    fn test_memory_transport_records() {
        let transport = MemoryTransport::new();
        let shared = transport.clone();
        transport.deliver(EventBatch::default());

        assert_eq!(shared.batches().len(), 1);
        assert!(shared.events().is_empty());
    }

    #[tokio::test]
    async fn test_beacon_worker_drains_after_senders_drop() {
        let transport_config = TransportConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let client = ApiClient::new("http://127.0.0.1:9", &transport_config).unwrap();
        let (sender, worker) = BeaconWorker::spawn(client, &transport_config, &Handle::current());

        assert!(sender.send_beacon(b"{\"events\":[]}".to_vec()));
        drop(sender);

        // nothing listens on the discard port, so the post fails but the worker exits
        assert_eq!(worker.drain().await, 0);
    }
}
