//! The store client contract the pipelines are built on, plus the single-record
//! operations (write, read, delete, ping) expressed on top of it.
//!
//! A [StoreClient] executes one command at a time and returns the store's reply as a
//! [Response]. Connection handling and the wire format are entirely the client's business.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::error::{Error, Result};
use crate::record::Record;

/// In-process store, used for tests and offline runs.
pub mod in_memory;

/// Redis implementation of [StoreClient].
pub mod redis_client;

pub(crate) const HSET: &str = "HSET";
pub(crate) const HMSET: &str = "HMSET";
pub(crate) const HGETALL: &str = "HGETALL";
pub(crate) const DEL: &str = "DEL";
pub(crate) const EXISTS: &str = "EXISTS";
pub(crate) const PING: &str = "PING";

/// A single command: a name and its ordered string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Upsert every field of the record. Fields are emitted in name order so the
    /// same record always produces the same command.
    pub fn hset(record: &Record) -> Self {
        let mut cmd = Self::new(HSET).arg(record.key());
        for (field, value) in record.sorted_fields() {
            cmd = cmd.arg(field).arg(value);
        }
        cmd
    }

    pub fn hgetall(key: impl Into<String>) -> Self {
        Self::new(HGETALL).arg(key)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(DEL).arg(key)
    }

    pub fn ping() -> Self {
        Self::new(PING)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A successful reply from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Nil,
    Ok,
    Integer(i64),
    Text(String),
    Array(Vec<Response>),
    Map(Vec<(Response, Response)>),
}

impl Response {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Response::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Response::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Interpret a hash reply. RESP2 servers send a flat array of alternating
    /// fields and values, RESP3 servers send a map. `Nil` is an absent hash.
    pub fn into_field_map(self) -> Result<HashMap<String, String>> {
        match self {
            Response::Nil => Ok(HashMap::new()),
            Response::Array(items) => {
                if items.len() % 2 != 0 {
                    return Err(Error::Command(format!(
                        "hash reply has an odd number of elements: {}",
                        items.len()
                    )));
                }
                let mut fields = HashMap::with_capacity(items.len() / 2);
                let mut items = items.into_iter();
                while let (Some(field), Some(value)) = (items.next(), items.next()) {
                    fields.insert(into_text(field)?, into_text(value)?);
                }
                Ok(fields)
            }
            Response::Map(pairs) => pairs
                .into_iter()
                .map(|(field, value)| -> Result<(String, String)> {
                    Ok((into_text(field)?, into_text(value)?))
                })
                .collect(),
            other => Err(Error::Command(format!(
                "expected a hash reply, got {other}"
            ))),
        }
    }
}

fn into_text(response: Response) -> Result<String> {
    match response {
        Response::Text(s) => Ok(s),
        Response::Integer(i) => Ok(i.to_string()),
        other => Err(Error::Command(format!(
            "expected a string in hash reply, got {other}"
        ))),
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Nil => write!(f, "(nil)"),
            Response::Ok => write!(f, "OK"),
            Response::Integer(i) => write!(f, "(integer) {i}"),
            Response::Text(s) => write!(f, "{s:?}"),
            Response::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Response::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// StoreClient executes commands against the key-value store. Implementations are cheap to
/// clone and safe to share between the stages of a pipeline.
#[trait_variant::make(Send)]
pub trait StoreClient: Clone + Send + Sync + 'static {
    /// Execute a single command and wait for its reply.
    async fn execute(&self, command: Command) -> Result<Response>;

    /// Release the underlying connection. Closing twice is not an error, commands issued after
    /// close fail with [Error::Transport].
    async fn close(&self) -> Result<()>;
}

/// Write all fields of the record under its key.
pub async fn write_record<C: StoreClient>(client: &C, record: &Record) -> Result<Response> {
    client.execute(Command::hset(record)).await
}

/// Fetch all fields stored under `key`. A missing key yields an empty record, not an error.
pub async fn read_record<C: StoreClient>(client: &C, key: &str) -> Result<Record> {
    let fields = client
        .execute(Command::hgetall(key))
        .await?
        .into_field_map()?;
    Ok(Record::new(key, fields))
}

/// Delete `key`, returning whether something was removed.
pub async fn delete_key<C: StoreClient>(client: &C, key: &str) -> Result<bool> {
    let reply = client.execute(Command::del(key)).await?;
    reply
        .as_integer()
        .map(|removed| removed > 0)
        .ok_or_else(|| Error::Command(format!("unexpected reply to DEL: {reply}")))
}

/// Readiness probe.
pub async fn ping<C: StoreClient>(client: &C) -> bool {
    match client.execute(Command::ping()).await {
        Ok(reply) if reply.as_text() == Some("PONG") => true,
        Ok(other) => {
            warn!(%other, "Unexpected reply to PING");
            false
        }
        Err(e) => {
            warn!(?e, "Store is not ready");
            false
        }
    }
}
