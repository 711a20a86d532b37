//! Streaming pipelines moving [Record]s between a producer and the store.
//!
//! Both directions have the same shape: a transfer stage reads its input channel, issues one
//! command per item through the [StoreClient], and hands the outcome to a terminal stage over a
//! bounded channel. Closing the input channel is the only way to stop a pipeline; the transfer
//! stage then closes the downstream channel, which in turn ends the terminal stage.
//!
//! ```text
//!   write:  records ──▶ transfer ──outcomes──▶ response checker ──▶ errors
//!   read:   keys    ──▶ transfer ──records───▶ sink
//!                           └──────────────────────────────────────▶ errors
//! ```
//!
//! [Record]: crate::Record
//! [StoreClient]: crate::client::StoreClient

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Response checker, the terminal stage of the write path.
mod checker;

/// Read pipeline feeding a [crate::sink::Sink].
pub mod reader;

/// Write pipeline.
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Lifecycle of one pipeline invocation. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Idle,
    Streaming,
    /// Input is closed (or the pipeline was aborted), in-flight work is completing.
    Draining,
    Done,
}

/// Publishes the state of a pipeline to its [PipelineHandle].
pub(crate) struct StateTracker {
    tx: watch::Sender<PipelineState>,
}

impl StateTracker {
    pub(crate) fn new() -> (Self, watch::Receiver<PipelineState>) {
        let (tx, rx) = watch::channel(PipelineState::Idle);
        (Self { tx }, rx)
    }

    pub(crate) fn set(&self, state: PipelineState) {
        self.tx.send_if_modified(|current| {
            if *current < state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

/// Handle to a running pipeline invocation. Pipelines are single use; start a new invocation
/// for new input.
#[derive(Debug)]
pub struct PipelineHandle {
    state: watch::Receiver<PipelineState>,
    handle: JoinHandle<Result<()>>,
}

impl PipelineHandle {
    pub(crate) fn new(state: watch::Receiver<PipelineState>, handle: JoinHandle<Result<()>>) -> Self {
        Self { state, handle }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Wait until the pipeline reached at least `state` and return the state observed.
    pub async fn wait_for(&mut self, state: PipelineState) -> PipelineState {
        let reached = self
            .state
            .wait_for(|current| *current >= state)
            .await
            .map(|current| *current);
        // the pipeline task is gone when this errs, the last published state is final
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the pipeline to reach [PipelineState::Done] and return its result.
    pub async fn join(self) -> Result<()> {
        self.handle.await?
    }
}
