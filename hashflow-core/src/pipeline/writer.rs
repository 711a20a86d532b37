use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::checker::{Ack, ResponseChecker, WriteOutcome};
use super::{PipelineHandle, PipelineState, StateTracker};
use crate::client::{StoreClient, write_record};
use crate::completion::CompletionSignal;
use crate::config::PipelineConfig;
use crate::error::{Result, StageError};
use crate::record::Record;

/// Writer streams [Record]s into the store, one write command per record, in the order they
/// arrive.
///
/// Every invocation of [Writer::streaming_write] spawns two stages: the transfer stage issuing
/// the writes and a response checker inspecting their outcomes. The checker is the terminal
/// stage and is the one that signals the [CompletionSignal].
#[derive(Clone)]
pub struct Writer<C> {
    client: C,
    config: PipelineConfig,
}

impl<C: StoreClient> Writer<C> {
    pub fn new(client: C, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Start writing the records received on `records`, returning as soon as the stages are
    /// spawned.
    ///
    /// Close the sending side of `records` to signal end of input, then wait on `completion`
    /// (or [PipelineHandle::join]) before assuming every write has been attempted. Failed writes
    /// are delivered on `errors`, which the caller must keep draining; the pipeline never closes
    /// it.
    pub fn streaming_write(
        &self,
        records: ReceiverStream<Record>,
        errors: mpsc::Sender<StageError>,
        completion: &CompletionSignal,
    ) -> PipelineHandle {
        // registered before spawning so the caller can never observe a count without the checker
        let guard = completion.register();
        let (state, state_rx) = StateTracker::new();
        let (outcome_tx, outcome_rx) = mpsc::channel(self.config.channel_capacity);
        let cln_token = CancellationToken::new();

        let checker = ResponseChecker::new(self.config.write_policy, errors, cln_token.clone());
        let checker_handle = tokio::spawn(checker.run(ReceiverStream::new(outcome_rx), guard));

        let client = self.client.clone();
        let policy = self.config.write_policy;
        let handle = tokio::spawn(async move {
            state.set(PipelineState::Streaming);
            info!(%policy, "Starting write pipeline");

            let written = transfer(&client, records, &outcome_tx, &cln_token).await;

            state.set(PipelineState::Draining);
            // closing the outcome channel is what ends the response checker
            drop(outcome_tx);
            let result = checker_handle.await;

            info!(written, "Write pipeline finished");
            state.set(PipelineState::Done);
            result?
        });

        PipelineHandle::new(state_rx, handle)
    }
}

/// Issue one write per record until the input closes or the pipeline is aborted. Returns the
/// number of writes issued.
async fn transfer<C: StoreClient>(
    client: &C,
    mut records: ReceiverStream<Record>,
    outcome_tx: &mpsc::Sender<WriteOutcome>,
    cln_token: &CancellationToken,
) -> usize {
    let mut written = 0;
    loop {
        let record = tokio::select! {
            biased;
            _ = cln_token.cancelled() => {
                info!("Write pipeline aborted, no further records will be consumed");
                break;
            }
            record = records.next() => match record {
                Some(record) => record,
                None => break,
            },
        };

        let outcome = match write_record(client, &record).await {
            Ok(response) => Ok(Ack {
                key: record.key().to_string(),
                response,
            }),
            Err(e) => Err(StageError::for_record(record, e)),
        };
        written += 1;

        // blocks while the checker is behind, which keeps us from reading ahead of it
        if outcome_tx.send(outcome).await.is_err() {
            warn!("Response checker stopped, no further records will be consumed");
            break;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::client::in_memory::InMemoryClient;
    use crate::client::{Command, read_record};
    use crate::config::WritePolicy;
    use crate::error::Error;

    fn record(key: &str) -> Record {
        Record::new(
            key,
            HashMap::from([
                ("f1".to_string(), "v1".to_string()),
                ("f2".to_string(), "v2".to_string()),
            ]),
        )
    }

    #[tokio::test]
    async fn test_streaming_write() {
        let client = InMemoryClient::new();
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);
        assert_eq!(completion.outstanding(), 1);

        for i in 0..5 {
            tx.send(record(&format!("key:{i}"))).await.unwrap();
        }
        drop(tx);

        timeout(Duration::from_secs(1), completion.wait())
            .await
            .expect("response checker signaled");
        handle.join().await.unwrap();
        assert!(errors_rx.recv().await.is_none());

        for i in 0..5 {
            let stored = read_record(&client, &format!("key:{i}")).await.unwrap();
            assert_eq!(stored, record(&format!("key:{i}")));
        }
    }

    #[tokio::test]
    async fn test_writes_preserve_input_order() {
        let client = InMemoryClient::new();
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, _errors_rx) = mpsc::channel(1);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        let keys = ["k3", "k1", "k2"];
        for key in keys {
            tx.send(record(key)).await.unwrap();
        }
        drop(tx);
        handle.join().await.unwrap();

        let written: Vec<_> = client
            .history()
            .into_iter()
            .map(|cmd: Command| cmd.arguments()[0].clone())
            .collect();
        assert_eq!(written, keys);
    }

    #[tokio::test]
    async fn test_best_effort_isolates_failed_write() {
        let client = InMemoryClient::new();
        client.error_injector().fail_key("key:2");
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let mut handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        for i in 0..5 {
            tx.send(record(&format!("key:{i}"))).await.unwrap();
        }
        drop(tx);

        assert_eq!(
            handle.wait_for(PipelineState::Done).await,
            PipelineState::Done
        );
        handle.join().await.unwrap();

        let stage_error = errors_rx.recv().await.unwrap();
        assert_eq!(stage_error.key, "key:2");
        assert_eq!(stage_error.record, Some(record("key:2")));
        assert!(matches!(stage_error.error, Error::Command(_)));
        assert!(errors_rx.recv().await.is_none());

        assert_eq!(client.len(), 4);
        assert!(client.snapshot("key:2").is_none());
    }

    #[tokio::test]
    async fn test_empty_record_is_reported_not_fatal() {
        let client = InMemoryClient::new();
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        tx.send(Record::not_found("empty")).await.unwrap();
        tx.send(record("full")).await.unwrap();
        drop(tx);
        handle.join().await.unwrap();

        let stage_error = errors_rx.recv().await.unwrap();
        assert_eq!(stage_error.key, "empty");
        assert!(stage_error.to_string().contains("wrong number of arguments"));
        assert!(client.snapshot("full").is_some());
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_pipeline() {
        let client = InMemoryClient::new();
        client.error_injector().fail_key("key:2");
        let config = PipelineConfig::default().with_write_policy(WritePolicy::FailFast);
        let writer = Writer::new(client.clone(), config).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        // the producer sees the abort as a closed channel
        let producer = tokio::spawn(async move {
            let mut sent = 0;
            for i in 0..10 {
                if tx.send(record(&format!("key:{i}"))).await.is_err() {
                    break;
                }
                sent += 1;
            }
            sent
        });

        let result = timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("aborted pipeline terminates");
        assert!(matches!(result, Err(Error::Pipeline(_))));
        timeout(Duration::from_secs(1), completion.wait())
            .await
            .expect("checker signaled after abort");

        assert_eq!(errors_rx.recv().await.unwrap().key, "key:2");
        assert!(errors_rx.recv().await.is_none());

        let sent = producer.await.unwrap();
        assert!(sent < 10, "producer should be cut off, sent {sent}");
        // at most the writes already in flight when the failure was observed went through
        assert!(client.len() <= 4, "stored {}", client.len());
        assert!(client.snapshot("key:0").is_some());
        assert!(client.snapshot("key:1").is_some());
    }

    #[tokio::test]
    async fn test_transport_failure_is_surfaced() {
        let client = InMemoryClient::new();
        client.error_injector().break_transport();
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        tx.send(record("k1")).await.unwrap();
        tx.send(record("k2")).await.unwrap();
        drop(tx);
        handle.join().await.unwrap();

        for key in ["k1", "k2"] {
            let stage_error = errors_rx.recv().await.unwrap();
            assert_eq!(stage_error.key, key);
            assert!(stage_error.is_transport());
        }
    }

    #[tokio::test]
    async fn test_back_pressure_with_slow_store() {
        let client = InMemoryClient::new();
        client.error_injector().set_write_latency(20);
        let writer = Writer::new(client.clone(), PipelineConfig::default()).unwrap();
        let completion = CompletionSignal::new();

        let (tx, rx) = mpsc::channel(1);
        let (errors_tx, _errors_rx) = mpsc::channel(1);
        let handle = writer.streaming_write(ReceiverStream::new(rx), errors_tx, &completion);

        for i in 0..3 {
            tx.send(record(&format!("key:{i}"))).await.unwrap();
        }
        // the third send only completes once the transfer stage took the second record, which
        // it does after the first write finished
        assert!(client.len() >= 1);
        assert_eq!(handle.state(), PipelineState::Streaming);
        drop(tx);
        handle.join().await.unwrap();
        assert_eq!(client.len(), 3);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PipelineConfig::default().with_channel_capacity(0);
        assert!(Writer::new(InMemoryClient::new(), config).is_err());
    }
}
