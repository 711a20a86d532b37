//! Streams hash records between callers and a key/value store.
//!
//! The [Writer] turns a stream of [Record]s into one hash write per record, and the [Reader]
//! turns a stream of keys into the hashes stored under them, delivered to a [Sink]. Both run as
//! a small set of concurrent stages connected by bounded channels, report per-record failures
//! on a caller-owned error channel, and count down a shared [CompletionSignal] once their
//! terminal stage is finished.

/// Commands, responses and the store clients executing them.
pub mod client;

/// Lets an orchestrator wait for every stage it spawned.
pub mod completion;

/// Environment driven configuration.
pub mod config;

mod error;
pub use crate::error::{Error, Result, StageError};

pub mod pipeline;

mod record;
pub use crate::record::Record;

/// Terminal stages of the read pipeline.
pub mod sink;

pub use crate::client::in_memory::InMemoryClient;
pub use crate::client::redis_client::RedisClient;
pub use crate::client::{
    Command, Response, StoreClient, delete_key, ping, read_record, write_record,
};
pub use crate::completion::{CompletionSignal, StageGuard};
pub use crate::config::{PipelineConfig, RedisConfig, WritePolicy};
pub use crate::pipeline::{PipelineHandle, PipelineState, Reader, Writer};
pub use crate::sink::Sink;
