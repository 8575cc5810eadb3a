use futures::channel::mpsc::UnboundedSender;
use serde::{Deserialize, Serialize};

/// Advisory notification about a running reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub taxpayer_id: Option<String>,
    /// Rows processed so far. Under sharded aggregation this counts the rows of
    /// the shard named by `shard`, not the whole run.
    pub processed: Option<u64>,
    pub shard: Option<usize>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            taxpayer_id: None,
            processed: None,
            shard: None,
        }
    }

    pub fn with_taxpayer(mut self, taxpayer_id: impl Into<String>) -> Self {
        self.taxpayer_id = Some(taxpayer_id.into());
        self
    }

    pub fn with_processed(mut self, processed: u64) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_shard(mut self, shard: usize) -> Self {
        self.shard = Some(shard);
        self
    }
}

/// Receives progress events. Implementations must not block.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn notify(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events to a channel. A closed receiver drops the event.
impl ProgressObserver for UnboundedSender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        let _ = self.unbounded_send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn notify(&self, _event: ProgressEvent) {}
}
