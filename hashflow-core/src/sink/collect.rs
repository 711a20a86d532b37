use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::Sink;
use crate::record::Record;

pub struct CollectSink {
    tx: mpsc::Sender<Record>,
}

impl CollectSink {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// A sink paired with the receiving end of a channel holding up to `capacity` records.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl Sink for CollectSink {
    async fn consume(&mut self, mut records: ReceiverStream<Record>) {
        let mut dropped = 0usize;
        while let Some(record) = records.next().await {
            // keep draining even if nobody listens anymore, the pipeline waits on us
            if dropped > 0 || self.tx.send(record).await.is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "Collector receiver went away, records were discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_utils::stream_of;

    #[tokio::test]
    async fn test_collect_sink() {
        let (mut sink, mut rx) = CollectSink::channel(4);
        let records = vec![Record::not_found("a"), Record::not_found("b")];
        sink.consume(stream_of(records.clone())).await;
        drop(sink);

        let mut collected = vec![];
        while let Some(record) = rx.recv().await {
            collected.push(record);
        }
        assert_eq!(collected, records);
    }

    #[tokio::test]
    async fn test_collect_sink_drains_without_receiver() {
        let (mut sink, rx) = CollectSink::channel(1);
        drop(rx);
        sink.consume(stream_of(vec![Record::not_found("a"), Record::not_found("b")]))
            .await;
    }
}
