use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use super::{PipelineHandle, PipelineState, StateTracker};
use crate::client::{StoreClient, read_record};
use crate::completion::CompletionSignal;
use crate::config::PipelineConfig;
use crate::error::{Error, Result, StageError};
use crate::record::Record;
use crate::sink::Sink;

/// Reader fetches the hash stored under every key it receives and hands the resulting
/// [Record]s to a [Sink], in the order the keys arrived.
///
/// A failed read never stops the pipeline. The failure is reported on the errors channel and
/// the next key is read. A missing key is not a failure, it yields a record without fields.
#[derive(Clone)]
pub struct Reader<C> {
    client: C,
    config: PipelineConfig,
}

impl<C: StoreClient> Reader<C> {
    pub fn new(client: C, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Start reading the keys received on `keys` into `sink`, returning as soon as the stages
    /// are spawned.
    ///
    /// The sink is the terminal stage and signals `completion` once it returned from
    /// [Sink::consume], which happens after `keys` is closed and every record was delivered.
    /// Read failures are delivered on `errors`, which the pipeline never closes.
    pub fn streaming_read<S: Sink>(
        &self,
        keys: ReceiverStream<String>,
        errors: mpsc::Sender<StageError>,
        mut sink: S,
        completion: &CompletionSignal,
    ) -> PipelineHandle {
        let guard = completion.register();
        let (state, state_rx) = StateTracker::new();
        let (record_tx, record_rx) = mpsc::channel(self.config.channel_capacity);

        let sink_handle = tokio::spawn(async move {
            sink.consume(ReceiverStream::new(record_rx)).await;
            guard.done();
        });

        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            state.set(PipelineState::Streaming);
            info!("Starting read pipeline");

            let result = transfer(&client, keys, &record_tx, &errors).await;

            state.set(PipelineState::Draining);
            drop(record_tx);
            let sink_result = sink_handle.await;

            state.set(PipelineState::Done);
            let (read, failed) = result?;
            sink_result?;
            info!(read, failed, "Read pipeline finished");
            Ok(())
        });

        PipelineHandle::new(state_rx, handle)
    }
}

/// Read every key until the input closes. Returns how many keys were read and how many of
/// those reads failed.
async fn transfer<C: StoreClient>(
    client: &C,
    mut keys: ReceiverStream<String>,
    record_tx: &mpsc::Sender<Record>,
    errors: &mpsc::Sender<StageError>,
) -> Result<(usize, usize)> {
    let (mut read, mut failed) = (0, 0);
    while let Some(key) = keys.next().await {
        read += 1;
        match read_record(client, &key).await {
            Ok(record) => {
                if record_tx.send(record).await.is_err() {
                    error!(%key, "Sink stopped before the key channel was closed");
                    return Err(Error::Pipeline(
                        "sink stopped consuming records".to_string(),
                    ));
                }
            }
            Err(e) => {
                failed += 1;
                warn!(%key, ?e, "Failed to read key");
                if errors.send(StageError::for_key(key, e)).await.is_err() {
                    warn!("Errors channel is closed, read failure dropped");
                }
            }
        }
    }
    Ok((read, failed))
}
