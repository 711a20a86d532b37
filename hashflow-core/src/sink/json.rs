use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::{Output, Sink};
use crate::record::Record;

/// Newline delimited JSON, the same shape the write path accepts, so a read can be piped back
/// into a write.
pub struct JsonSink {
    output: Output,
}

impl JsonSink {
    pub fn new(output: Output) -> Self {
        Self { output }
    }

    pub fn stdout() -> Self {
        Self::new(Output::stdout())
    }
}

impl Sink for JsonSink {
    async fn consume(&mut self, mut records: ReceiverStream<Record>) {
        while let Some(record) = records.next().await {
            match serde_json::to_string(&record) {
                Ok(line) => self.output.emit(&format!("{line}\n")).await,
                Err(e) => warn!(?e, key = record.key(), "Failed to encode record"),
            }
        }
        info!("Detected end of record channel");
    }
}
