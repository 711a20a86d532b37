use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::record::Record;

/// [CollectSink] hands records over to another channel, for callers that aggregate or re-emit.
#[path = "sink/collect.rs"]
mod collect;

/// [JsonSink] writes one JSON object per record.
#[path = "sink/json.rs"]
mod json;

/// [LogSink] emits records through `tracing`.
#[path = "sink/log.rs"]
mod log;

/// [PrettySink] prints the key followed by one indented line per field.
#[path = "sink/pretty.rs"]
mod pretty;

/// [RawSink] prints every record verbatim on a single line.
#[path = "sink/raw.rs"]
mod raw;

#[cfg(test)]
#[path = "sink/test_utils.rs"]
pub(crate) mod test_utils;

pub use collect::CollectSink;
pub use json::JsonSink;
pub use log::LogSink;
pub use pretty::PrettySink;
pub use raw::RawSink;

/// Terminal stage of the read pipeline.
///
/// A sink drains `records` until the channel is closed and does whatever it wants with each
/// [Record]. The pipeline accounts for the sink's completion once `consume` returns, whether it
/// saw any record or not.
#[trait_variant::make(Send)]
pub trait Sink: Send + 'static {
    async fn consume(&mut self, records: ReceiverStream<Record>);
}

/// Destination of the text sinks.
///
/// Writes go through tokio's async I/O, so a slow terminal or a full pipe parks the sink task
/// instead of blocking a runtime worker.
pub struct Output {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Output {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Write `text` and flush. A failing output must not stop the sink from draining its
    /// channel, so failures are only logged.
    pub(crate) async fn emit(&mut self, text: &str) {
        let result = match self.inner.write_all(text.as_bytes()).await {
            Ok(()) => self.inner.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(?e, "Failed to write record to output");
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}
