use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::{Output, Sink};
use crate::record::Record;

pub struct RawSink {
    output: Output,
}

impl RawSink {
    pub fn new(output: Output) -> Self {
        Self { output }
    }

    pub fn stdout() -> Self {
        Self::new(Output::stdout())
    }
}

impl Sink for RawSink {
    async fn consume(&mut self, mut records: ReceiverStream<Record>) {
        while let Some(record) = records.next().await {
            self.output.emit(&format!("{record}\n")).await;
        }
        info!("Detected end of record channel");
    }
}
