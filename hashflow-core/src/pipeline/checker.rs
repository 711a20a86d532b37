use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::Response;
use crate::completion::StageGuard;
use crate::config::WritePolicy;
use crate::error::{Error, Result, StageError};

/// Acknowledgement of a successful write.
#[derive(Debug)]
pub(super) struct Ack {
    pub(super) key: String,
    pub(super) response: Response,
}

pub(super) type WriteOutcome = std::result::Result<Ack, StageError>;

/// Consumes write outcomes until the outcome channel is closed, reporting failures on the
/// caller's error channel according to the [WritePolicy].
///
/// Under [WritePolicy::FailFast] the first failure cancels `cln_token`, which stops the transfer
/// stage from taking more records. Outcomes of writes that were already in flight are drained
/// without being reported.
pub(super) struct ResponseChecker {
    policy: WritePolicy,
    errors: mpsc::Sender<StageError>,
    cln_token: CancellationToken,
    acked: usize,
    failed: usize,
    first_error: Option<StageError>,
}

impl ResponseChecker {
    pub(super) fn new(
        policy: WritePolicy,
        errors: mpsc::Sender<StageError>,
        cln_token: CancellationToken,
    ) -> Self {
        Self {
            policy,
            errors,
            cln_token,
            acked: 0,
            failed: 0,
            first_error: None,
        }
    }

    pub(super) async fn run(
        mut self,
        mut outcomes: ReceiverStream<WriteOutcome>,
        guard: StageGuard,
    ) -> Result<()> {
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(ack) => {
                    self.acked += 1;
                    debug!(key = %ack.key, response = %ack.response, "Write acknowledged");
                }
                Err(stage_error) if self.first_error.is_some() => {
                    debug!(%stage_error, "Pipeline already aborted, dropping in-flight failure");
                }
                Err(stage_error) => self.check_failure(stage_error).await,
            }
        }

        info!(
            acked = self.acked,
            failed = self.failed,
            policy = %self.policy,
            "Response checker finished"
        );
        guard.done();

        match self.first_error {
            Some(e) => Err(Error::Pipeline(format!("write pipeline aborted: {e}"))),
            None => Ok(()),
        }
    }

    async fn check_failure(&mut self, stage_error: StageError) {
        self.failed += 1;
        if stage_error.is_transport() {
            error!(%stage_error, "Store connection failed during write");
        } else {
            warn!(%stage_error, "Write failed");
        }

        if self.policy == WritePolicy::FailFast {
            // stop the transfer stage before reporting, the caller may not be draining errors yet
            self.cln_token.cancel();
            self.first_error = Some(stage_error.clone());
        }

        if self.errors.send(stage_error).await.is_err() {
            warn!("Error channel is closed, write failure not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::completion::CompletionSignal;
    use crate::record::Record;

    fn ack(key: &str) -> WriteOutcome {
        Ok(Ack {
            key: key.to_string(),
            response: Response::Integer(1),
        })
    }

    fn failure(key: &str) -> WriteOutcome {
        Err(StageError::for_record(
            Record::new(key, HashMap::new()),
            Error::Command("ERR wrong number of arguments for 'hset' command".into()),
        ))
    }

    #[tokio::test]
    async fn test_best_effort_reports_every_failure() {
        let (outcome_tx, outcome_rx) = mpsc::channel(10);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let signal = CompletionSignal::new();
        let cln_token = CancellationToken::new();

        let checker = ResponseChecker::new(WritePolicy::BestEffort, errors_tx, cln_token.clone());
        let handle = tokio::spawn(checker.run(ReceiverStream::new(outcome_rx), signal.register()));

        for outcome in [ack("a"), failure("b"), ack("c"), failure("d")] {
            outcome_tx.send(outcome).await.unwrap();
        }
        drop(outcome_tx);

        assert!(handle.await.unwrap().is_ok());
        assert!(!cln_token.is_cancelled());
        assert_eq!(signal.outstanding(), 0);

        let mut reported = vec![];
        while let Ok(e) = errors_rx.try_recv() {
            reported.push(e.key);
        }
        assert_eq!(reported, ["b", "d"]);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_first_failure() {
        let (outcome_tx, outcome_rx) = mpsc::channel(10);
        let (errors_tx, mut errors_rx) = mpsc::channel(10);
        let signal = CompletionSignal::new();
        let cln_token = CancellationToken::new();

        let checker = ResponseChecker::new(WritePolicy::FailFast, errors_tx, cln_token.clone());
        let handle = tokio::spawn(checker.run(ReceiverStream::new(outcome_rx), signal.register()));

        for outcome in [ack("a"), failure("b"), ack("c"), failure("d")] {
            outcome_tx.send(outcome).await.unwrap();
        }
        drop(outcome_tx);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Pipeline(_))));
        assert!(cln_token.is_cancelled());
        assert_eq!(signal.outstanding(), 0);

        assert_eq!(errors_rx.try_recv().unwrap().key, "b");
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signals_with_no_outcomes() {
        let (outcome_tx, outcome_rx) = mpsc::channel::<WriteOutcome>(1);
        let (errors_tx, _errors_rx) = mpsc::channel(1);
        let signal = CompletionSignal::new();

        let checker = ResponseChecker::new(
            WritePolicy::BestEffort,
            errors_tx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(checker.run(ReceiverStream::new(outcome_rx), signal.register()));
        drop(outcome_tx);

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(signal.outstanding(), 0);
    }
}
