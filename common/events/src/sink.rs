use crate::{EventError, EventResult, LowStockEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One-way destination for low-stock notifications.
///
/// Delivery is fire-and-forget from the ledger's point of view: a failing sink is logged and
/// counted by the caller, never turned into a failed stock operation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()>;
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()> {
        (**self).publish(event).await
    }
}

/// Writes each alert to the tracing pipeline. Default sink when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()> {
        tracing::warn!(
            company_id = %event.company_id,
            product_id = %event.product_id,
            qty_available = event.qty_available,
            low_threshold = event.low_threshold,
            reason = %event.reason,
            "Low stock alert"
        );
        Ok(())
    }
}

/// Keeps every published event in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LowStockEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Vec<LowStockEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BufferCounters {
    queued: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub queued: u64,
    pub emitted: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Bounded queue in front of a slower sink. `publish` never waits on the inner sink: the event
/// is queued or, when the queue is full, dropped and counted.
pub struct BufferedEventSink {
    tx: mpsc::Sender<LowStockEvent>,
    counters: Arc<BufferCounters>,
}

impl BufferedEventSink {
    /// Spawns the drain task; must be called inside a tokio runtime.
    pub fn new<S>(inner: S, capacity: usize) -> Self
    where
        S: EventSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<LowStockEvent>(capacity.max(1));
        let counters = Arc::new(BufferCounters::default());
        let drain_counters = counters.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                drain_counters.queued.fetch_sub(1, Ordering::Relaxed);
                let event_id = event.event_id;
                match inner.publish(event).await {
                    Ok(()) => { drain_counters.emitted.fetch_add(1, Ordering::Relaxed); }
                    Err(err) => {
                        drain_counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %err, %event_id, "Failed to deliver low-stock event");
                    }
                }
            }
        });
        Self { tx, counters }
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            queued: self.counters.queued.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl EventSink for BufferedEventSink {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()> {
        // Count before sending so the drain task can never decrement below zero.
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EventError::BufferFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                Err(EventError::Closed)
            }
        }
    }
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
pub struct KafkaEventSink {
    producer: rdkafka::producer::FutureProducer,
    topic: String,
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
impl KafkaEventSink {
    pub fn new(producer: rdkafka::producer::FutureProducer, topic: impl Into<String>) -> Self {
        Self { producer, topic: topic.into() }
    }
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
#[async_trait]
impl EventSink for KafkaEventSink {
    async fn publish(&self, event: LowStockEvent) -> EventResult<()> {
        use rdkafka::producer::FutureRecord;
        let serialized = serde_json::to_vec(&event).map_err(|e| EventError::Serialization(e.to_string()))?;
        let record = FutureRecord::to(&self.topic)
            .key(&event.company_id)
            .payload(&serialized);
        if let Err((e, _)) = self.producer.send(record, std::time::Duration::from_secs(5)).await {
            return Err(EventError::Kafka(e.to_string()));
        }
        Ok(())
    }
}
