use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::Sink;
use crate::record::Record;

#[derive(Debug, Default)]
pub struct LogSink {
    received: usize,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

impl Sink for LogSink {
    async fn consume(&mut self, mut records: ReceiverStream<Record>) {
        while let Some(record) = records.next().await {
            self.received += 1;
            if record.is_empty() {
                info!(key = record.key(), "Key was not found in the store");
            } else {
                info!(key = record.key(), fields = ?record.sorted_fields(), "Record");
            }
        }
        info!(received = self.received, "Detected end of record channel");
    }
}
