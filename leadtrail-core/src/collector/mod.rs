//! Event collection and delivery
//!
//! Everything between "an event was created" and "the collection endpoint has
//! it":
//! - [`EventFactory`] stamps events with session context
//! - [`EventQueue`] buffers and flushes them in batches
//! - [`TieredTransport`] delivers a batch through the beacon or fetch tier
//! - [`ApiClient`] speaks HTTP to the collection API
//!
//! ## Delivery
//!
//! Flushing never waits for the network. Batches go to:
//!
//! ```text
//! POST {apiUrl}/v1/track/events
//! Content-Type: application/json
//!
//! {"events": [ ... ]}
//! ```
//!
//! Any 2xx response is success. Non-2xx and network failures are logged and
//! the batch is dropped.

mod client;
mod events;
mod queue;
mod transport;

pub use client::{ApiClient, TrackResponse};
pub use events::{normalize_url, EventBatch, EventFactory};
pub use queue::{EventQueue, QueueStats};
pub use transport::{
    Beacon, BeaconSender, BeaconWorker, Deliver, DeliveryOutcome, Fetch, HttpFetch,
    MemoryTransport, TieredTransport, Tier,
};
