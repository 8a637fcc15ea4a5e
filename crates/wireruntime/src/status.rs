use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wirecore::{ExecutionRecord, Journal, NodeError};

/// Capacity of the per-run status channel. Kept small on purpose: a slow
/// consumer suspends the runner at the emission point, and the consumer is
/// the source of truth for what the UI has observed.
pub const STATUS_CHANNEL_CAPACITY: usize = 8;

/// Serialization point for all record emission in one run.
///
/// The consumer keeps draining even after cancellation, so terminal
/// CANCELED records emitted on the way out still land in the journal.
#[derive(Clone)]
pub struct StatusSender {
    tx: mpsc::Sender<ExecutionRecord>,
}

impl StatusSender {
    pub fn channel() -> (Self, mpsc::Receiver<ExecutionRecord>) {
        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Push one record, suspending on backpressure.
    pub async fn send(&self, record: ExecutionRecord) -> Result<(), NodeError> {
        self.tx.send(record).await.map_err(|_| NodeError::Canceled)
    }
}

/// External consumer of the record stream.
#[async_trait]
pub trait RecordSubscriber: Send + Sync {
    /// Deliver one record. An error means the consumer is gone; the run is
    /// canceled in response.
    async fn deliver(&self, record: ExecutionRecord) -> Result<(), NodeError>;
}

/// Consumes the status channel: persists every record to the journal, then
/// forwards it to the subscriber. Returns once the channel closes and all
/// remaining records are drained.
pub async fn pump_status(
    mut rx: mpsc::Receiver<ExecutionRecord>,
    journal: Journal,
    subscriber: Arc<dyn RecordSubscriber>,
    cancel: CancellationToken,
) {
    while let Some(record) = rx.recv().await {
        journal.append(record.clone());
        if let Err(e) = subscriber.deliver(record).await {
            tracing::warn!("record subscriber failed, canceling run: {}", e);
            cancel.cancel();
        }
    }
}

/// Subscriber for runs nobody is watching, such as worker-side single-node
/// dispatch. Records still land in the journal through the pump.
pub struct NullSubscriber;

#[async_trait]
impl RecordSubscriber for NullSubscriber {
    async fn deliver(&self, _record: ExecutionRecord) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Subscriber that collects records in memory. Used by tests and the CLI.
#[derive(Clone, Default)]
pub struct MemorySubscriber {
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl MemorySubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RecordSubscriber for MemorySubscriber {
    async fn deliver(&self, record: ExecutionRecord) -> Result<(), NodeError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }
}
