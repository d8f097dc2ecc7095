//! Event Bus: total-ordered fan-out to N sinks with per-sink back-pressure.
//! Each sink is driven by a single consumer task reading a bounded channel
//! (`max_pending`, default 64). A full channel drops the event (with a
//! counter increment) for a stream sink, or blocks the producer for a file
//! sink, matching the durability-over-latency split in the component design.

pub mod coalescer;
pub mod sinks;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::contracts::{Event, EventSink};

pub const DEFAULT_MAX_PENDING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Drop the event and increment a counter rather than stall the producer.
    Drop,
    /// Block the producer until the sink's consumer catches up.
    Block,
}

struct Registered {
    tx: mpsc::Sender<Event>,
    backpressure: Backpressure,
    dropped: Arc<AtomicU64>,
}

pub struct EventBus {
    sinks: Vec<Registered>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Registers `sink` with its own consumer task and bounded channel.
    pub fn register(&mut self, sink: Box<dyn EventSink>, backpressure: Backpressure, max_pending: usize) {
        let (tx, mut rx) = mpsc::channel::<Event>(max_pending.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = sink.emit(&event).await {
                    tracing::warn!(error = %err, "event sink failed to emit");
                }
            }
        });
        self.sinks.push(Registered {
            tx,
            backpressure,
            dropped,
        });
    }

    /// Publishes `event` to every registered sink per its backpressure policy.
    pub async fn publish(&self, event: Event) {
        for sink in &self.sinks {
            match sink.backpressure {
                Backpressure::Drop => {
                    if sink.tx.try_send(event.clone()).is_err() {
                        sink.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Backpressure::Block => {
                    let _ = sink.tx.send(event.clone()).await;
                }
            }
        }
    }

    pub fn dropped_counts(&self) -> Vec<u64> {
        self.sinks.iter().map(|s| s.dropped.load(Ordering::Relaxed)).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::EventType;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording(Arc<Mutex<Vec<Event>>>);

    #[async_trait]
    impl EventSink for Recording {
        async fn emit(&self, event: &Event) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_registered_sink() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.register(Box::new(Recording(received.clone())), Backpressure::Block, 8);

        bus.publish(Event::new(EventType::RunStarted)).await;
        bus.publish(Event::new(EventType::RunFinished)).await;

        // Allow the consumer task to drain.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = received.lock().unwrap();
        assert_eq!(events.len(), 2);
    }
}
