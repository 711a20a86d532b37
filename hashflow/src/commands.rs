//! Adapters between the process (stdin, stdout, arguments) and the pipelines.

use std::error::Error;

use hashflow_core::sink::{JsonSink, PrettySink, RawSink};
use hashflow_core::{
    Command, CompletionSignal, PipelineConfig, Reader, Record, Sink, StageError, StoreClient,
    Writer, delete_key,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::cmdline::{FORMAT_PRETTY, FORMAT_RAW};

type CliResult = Result<(), Box<dyn Error>>;

/// Stream the NDJSON records read from `input` through the write pipeline. Fails when any
/// record could not be parsed or written.
pub(crate) async fn write<C, R>(client: &C, config: PipelineConfig, input: R) -> CliResult
where
    C: StoreClient,
    R: AsyncBufRead + Unpin,
{
    let writer = Writer::new(client.clone(), config.clone())?;
    let completion = CompletionSignal::new();

    let (records_tx, records_rx) = mpsc::channel(config.channel_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(config.channel_capacity);
    let handle = writer.streaming_write(ReceiverStream::new(records_rx), errors_tx, &completion);
    let reporter = tokio::spawn(report_errors(errors_rx));

    let malformed = forward_records(input, records_tx).await?;

    completion.wait().await;
    let result = handle.join().await;
    let failed = reporter.await?;
    result?;

    if failed + malformed > 0 {
        return Err(format!("{failed} writes failed, {malformed} malformed records skipped").into());
    }
    Ok(())
}

/// Read the given keys, or one key per line of `input` when none are given, and print the
/// records in `format`.
pub(crate) async fn read<C, R>(
    client: &C,
    config: PipelineConfig,
    format: &str,
    keys: Vec<String>,
    input: R,
) -> CliResult
where
    C: StoreClient,
    R: AsyncBufRead + Unpin,
{
    match format {
        FORMAT_RAW => read_into(client, config, keys, input, RawSink::stdout()).await,
        FORMAT_PRETTY => read_into(client, config, keys, input, PrettySink::stdout()).await,
        _ => read_into(client, config, keys, input, JsonSink::stdout()).await,
    }
}

async fn read_into<C, R, S>(
    client: &C,
    config: PipelineConfig,
    keys: Vec<String>,
    input: R,
    sink: S,
) -> CliResult
where
    C: StoreClient,
    R: AsyncBufRead + Unpin,
    S: Sink,
{
    let reader = Reader::new(client.clone(), config.clone())?;
    let completion = CompletionSignal::new();

    let (keys_tx, keys_rx) = mpsc::channel(config.channel_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(config.channel_capacity);
    let handle = reader.streaming_read(ReceiverStream::new(keys_rx), errors_tx, sink, &completion);
    let reporter = tokio::spawn(report_errors(errors_rx));

    if keys.is_empty() {
        forward_keys(input, keys_tx).await?;
    } else {
        for key in keys {
            if keys_tx.send(key).await.is_err() {
                warn!("Read pipeline stopped accepting keys");
                break;
            }
        }
    }

    completion.wait().await;
    let result = handle.join().await;
    let failed = reporter.await?;
    result?;

    if failed > 0 {
        return Err(format!("{failed} reads failed").into());
    }
    Ok(())
}

pub(crate) async fn delete<C: StoreClient>(client: &C, keys: Vec<String>) -> CliResult {
    for key in keys {
        if delete_key(client, &key).await? {
            println!("{key}: deleted");
        } else {
            println!("{key}: not found");
        }
    }
    Ok(())
}

pub(crate) async fn exec<C: StoreClient>(client: &C, mut words: Vec<String>) -> CliResult {
    if words.is_empty() {
        return Err("missing command name".into());
    }
    let name = words.remove(0);
    let response = client.execute(Command::new(name).args(words)).await?;
    println!("{response}");
    Ok(())
}

/// Parse one record per line and push it into the pipeline. Blank lines are ignored.
/// Returns the number of lines that were not valid records.
async fn forward_records<R: AsyncBufRead + Unpin>(
    input: R,
    records_tx: mpsc::Sender<Record>,
) -> std::io::Result<usize> {
    let mut lines = input.lines();
    let mut malformed = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<Record>(&line) {
            Ok(record) => record,
            Err(e) => {
                error!(?e, %line, "Skipping malformed record");
                malformed += 1;
                continue;
            }
        };
        if records_tx.send(record).await.is_err() {
            // only happens once a fail-fast pipeline aborted
            info!("Write pipeline stopped accepting records");
            break;
        }
    }
    Ok(malformed)
}

async fn forward_keys<R: AsyncBufRead + Unpin>(
    input: R,
    keys_tx: mpsc::Sender<String>,
) -> std::io::Result<()> {
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        if keys_tx.send(key.to_string()).await.is_err() {
            warn!("Read pipeline stopped accepting keys");
            break;
        }
    }
    Ok(())
}

async fn report_errors(mut errors: mpsc::Receiver<StageError>) -> usize {
    let mut failed = 0;
    while let Some(stage_error) = errors.recv().await {
        failed += 1;
        error!(key = %stage_error.key, error = %stage_error.error, "Record failed");
    }
    failed
}
