//! Event queue with batched flushing
//!
//! The queue buffers events in arrival order and hands them to the transport
//! when:
//! - Batch size threshold is reached
//! - Flush is explicitly called (page hide/unload, shutdown)
//! - Flush interval expires (polled through [`EventQueue::tick`])
//!
//! A flush swaps the buffer for an empty one before delivery, so an event is
//! consumed by exactly one flush. Delivery failures are counted and logged;
//! the batch is not re-queued.

use chrono::{DateTime, Duration, Utc};

use crate::types::TrackEvent;
use crate::utils;

use super::events::EventBatch;
use super::transport::{Deliver, DeliveryOutcome, Tier};

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Non-empty flushes
    pub batches_flushed: usize,
    /// Events handed to the transport
    pub events_flushed: usize,
    /// Batches accepted by the beacon tier
    pub beacon_deliveries: usize,
    /// Batches accepted by the fetch tier
    pub fetch_deliveries: usize,
    /// Batches no tier would take
    pub failed_deliveries: usize,
}

#[derive(Debug, Clone, Copy)]
struct AutoFlush {
    interval: Duration,
    next_at: DateTime<Utc>,
}

/// FIFO buffer in front of a [`Deliver`] transport
pub struct EventQueue {
    buffer: Vec<TrackEvent>,
    batch_size: usize,
    transport: Box<dyn Deliver>,
    auto_flush: Option<AutoFlush>,
    stats: QueueStats,
}

impl EventQueue {
    /// Create a queue that flushes every `batch_size` events
    pub fn new(transport: Box<dyn Deliver>, batch_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            batch_size: batch_size.max(1),
            transport,
            auto_flush: None,
            stats: QueueStats::default(),
        }
    }

    /// Append an event, flushing once the batch size is reached
    pub fn enqueue(&mut self, event: TrackEvent) {
        tracing::trace!(event_type = %event.event_type, id = %event.id, "Queued event");
        self.buffer.push(event);

        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Hand every pending event to the transport
    ///
    /// No-op (returns `None`) when nothing is pending.
    pub fn flush(&mut self) -> Option<DeliveryOutcome> {
        if self.buffer.is_empty() {
            return None;
        }

        let events = std::mem::take(&mut self.buffer);
        let count = events.len();
        let outcome = self.transport.deliver(EventBatch::new(events));

        self.stats.batches_flushed += 1;
        self.stats.events_flushed += count;
        match &outcome {
            DeliveryOutcome::Accepted(Tier::Beacon) => {
                self.stats.beacon_deliveries += 1;
                tracing::debug!(events = count, tier = "beacon", "Flushed event batch");
            }
            DeliveryOutcome::Accepted(Tier::Fetch) => {
                self.stats.fetch_deliveries += 1;
                tracing::debug!(events = count, tier = "fetch", "Flushed event batch");
            }
            DeliveryOutcome::Failed(reason) => {
                self.stats.failed_deliveries += 1;
                // Don't re-queue: the batch is dropped
                tracing::warn!(events = count, reason = %reason, "Failed to deliver event batch");
            }
        }

        Some(outcome)
    }

    /// Flush every `interval_ms` starting from `now`; 0 disables
    pub fn start_auto_flush(&mut self, interval_ms: u64, now: DateTime<Utc>) {
        if interval_ms == 0 {
            self.auto_flush = None;
            return;
        }
        let interval = utils::millis(interval_ms);
        self.auto_flush = now
            .checked_add_signed(interval)
            .map(|next_at| AutoFlush { interval, next_at });
        if self.auto_flush.is_none() {
            tracing::warn!(interval_ms, "Auto flush interval out of range, disabled");
        }
    }

    pub fn stop_auto_flush(&mut self) {
        self.auto_flush = None;
    }

    /// Run the auto flush if its interval has elapsed
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<DeliveryOutcome> {
        let auto = self.auto_flush.as_mut()?;
        if now < auto.next_at {
            return None;
        }
        // one flush however many intervals were missed
        let mut exhausted = false;
        while auto.next_at <= now {
            match auto.next_at.checked_add_signed(auto.interval) {
                Some(next_at) => auto.next_at = next_at,
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        if exhausted {
            self.auto_flush = None;
        }
        self.flush()
    }

    /// When the next auto flush is due
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.auto_flush.map(|auto| auto.next_at)
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Events waiting for the next flush, oldest first
    pub fn pending(&self) -> &[TrackEvent] {
        &self.buffer
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get current delivery statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::transport::MemoryTransport;
    use crate::types::{EventType, SessionContext};
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn event(n: usize) -> TrackEvent {
        TrackEvent {
            id: format!("evt-{}", n),
            event_type: EventType::Custom,
            api_key: "key".to_string(),
            context: SessionContext {
                timestamp: at(0),
                url: "https://localhost/".to_string(),
                referrer: None,
                user_agent: "ua".to_string(),
                screen_resolution: "0x0".to_string(),
                session_id: "s".to_string(),
                visitor_id: "v".to_string(),
                duration: 0,
            },
            page: None,
            form: None,
            widget: None,
            traits: None,
            name: None,
            properties: None,
            config: None,
        }
    }

    struct Refusing;

    impl Deliver for Refusing {
        fn deliver(&self, _batch: EventBatch) -> DeliveryOutcome {
            DeliveryOutcome::Failed("offline".to_string())
        }
    }

    #[test]
    fn test_size_trigger_flushes_in_order() {
        let transport = MemoryTransport::new();
        let mut queue = EventQueue::new(Box::new(transport.clone()), 3);

        queue.enqueue(event(1));
        queue.enqueue(event(2));
        assert!(transport.batches().is_empty());
        assert_eq!(queue.pending_count(), 2);

        queue.enqueue(event(3));
        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-1", "evt-2", "evt-3"]);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let transport = MemoryTransport::new();
        let mut queue = EventQueue::new(Box::new(transport.clone()), 10);

        assert!(queue.flush().is_none());
        assert!(transport.batches().is_empty());
        assert_eq!(queue.stats().batches_flushed, 0);
    }

    #[test]
    fn test_interval_trigger() {
        let transport = MemoryTransport::new();
        let mut queue = EventQueue::new(Box::new(transport.clone()), 10);
        queue.start_auto_flush(5_000, at(0));

        queue.enqueue(event(1));
        queue.enqueue(event(2));
        assert!(queue.tick(at(4_999)).is_none());
        assert_eq!(queue.next_deadline(), Some(at(5_000)));

        assert!(queue.tick(at(5_000)).is_some());
        assert_eq!(transport.batches().len(), 1);
        assert_eq!(transport.batches()[0].len(), 2);
        assert_eq!(queue.next_deadline(), Some(at(10_000)));

        // an empty interval flushes nothing but still re-arms
        assert!(queue.tick(at(17_000)).is_none());
        assert_eq!(queue.next_deadline(), Some(at(20_000)));
    }

    #[test]
    fn test_out_of_range_interval_disables_auto_flush() {
        let mut queue = EventQueue::new(Box::new(MemoryTransport::new()), 10);
        queue.start_auto_flush(u64::MAX, Utc::now());
        assert_eq!(queue.next_deadline(), None);

        queue.start_auto_flush(9_000_000_000_000_000_000, Utc::now());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_zero_interval_disables_auto_flush() {
        let mut queue = EventQueue::new(Box::new(MemoryTransport::new()), 10);
        queue.start_auto_flush(0, at(0));
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_failed_delivery_is_dropped() {
        let mut queue = EventQueue::new(Box::new(Refusing), 10);
        queue.enqueue(event(1));

        assert!(matches!(queue.flush(), Some(DeliveryOutcome::Failed(_))));
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.stats().failed_deliveries, 1);
        assert_eq!(queue.stats().events_flushed, 1);
    }

    #[test]
    fn test_stats_count_tiers() {
        let mut queue = EventQueue::new(Box::new(MemoryTransport::new()), 1);
        queue.enqueue(event(1));
        queue.enqueue(event(2));

        let stats = queue.stats();
        assert_eq!(stats.batches_flushed, 2);
        assert_eq!(stats.beacon_deliveries, 2);
        assert_eq!(stats.fetch_deliveries, 0);
    }
}
