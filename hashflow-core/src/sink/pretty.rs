use std::fmt::Write;

use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::{Output, Sink};
use crate::record::Record;

pub struct PrettySink {
    output: Output,
}

impl PrettySink {
    pub fn new(output: Output) -> Self {
        Self { output }
    }

    pub fn stdout() -> Self {
        Self::new(Output::stdout())
    }

    fn render(record: &Record) -> String {
        if record.is_empty() {
            return format!("Key '{}' was not found in the store.\n", record.key());
        }
        let mut text = format!("{}\n", record.key());
        for (field, value) in record.sorted_fields() {
            // writing to a String cannot fail
            let _ = writeln!(text, "  {field} -> {value}");
        }
        text
    }
}

impl Sink for PrettySink {
    async fn consume(&mut self, mut records: ReceiverStream<Record>) {
        while let Some(record) = records.next().await {
            self.output.emit(&Self::render(&record)).await;
        }
        info!("Detected end of record channel");
    }
}
