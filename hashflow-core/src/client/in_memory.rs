//! In-memory implementation of [StoreClient] for tests and offline use.
//!
//! Understands the hash subset of the Redis command set (`HSET`, `HMSET`, `HGETALL`, `DEL`,
//! `EXISTS`, `PING`) with the same argument validation and error text a Redis server gives,
//! so pipelines behave the same against it as against a real server.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Command, DEL, EXISTS, HGETALL, HMSET, HSET, PING, Response, StoreClient};
use crate::error::{Error, Result};

mod error_injector;

pub use error_injector::ErrorInjector;
use error_injector::CommandKind;

type Hashes = HashMap<String, HashMap<String, String>>;

#[derive(Clone, Default)]
pub struct InMemoryClient {
    hashes: Arc<RwLock<Hashes>>,
    closed: Arc<AtomicBool>,
    error_injector: Arc<ErrorInjector>,
    /// Every command that reached the store, in execution order.
    history: Arc<Mutex<Vec<Command>>>,
}

impl std::fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryClient")
            .field("keys", &self.hashes.read().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error injector shared by all clones of this client.
    pub fn error_injector(&self) -> &Arc<ErrorInjector> {
        &self.error_injector
    }

    /// Commands executed so far. Commands rejected by injection are not included.
    pub fn history(&self) -> Vec<Command> {
        self.history.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.hashes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.read().is_empty()
    }

    /// Current fields of `key`, bypassing the command path.
    pub fn snapshot(&self, key: &str) -> Option<HashMap<String, String>> {
        self.hashes.read().get(key).cloned()
    }

    fn apply(&self, command: &Command) -> Result<Response> {
        let name = command.name().to_ascii_uppercase();
        let args = command.arguments();
        match name.as_str() {
            HSET | HMSET => {
                let [key, pairs @ ..] = args else {
                    return Err(wrong_arity(&name));
                };
                if pairs.is_empty() || pairs.len() % 2 != 0 {
                    return Err(wrong_arity(&name));
                }
                let mut hashes = self.hashes.write();
                let hash = hashes.entry(key.clone()).or_default();
                let mut added = 0;
                for pair in pairs.chunks_exact(2) {
                    if let [field, value] = pair {
                        if hash.insert(field.clone(), value.clone()).is_none() {
                            added += 1;
                        }
                    }
                }
                if name == HSET {
                    Ok(Response::Integer(added))
                } else {
                    Ok(Response::Ok)
                }
            }
            HGETALL => {
                let [key] = args else {
                    return Err(wrong_arity(&name));
                };
                let hashes = self.hashes.read();
                let mut fields: Vec<_> = hashes
                    .get(key)
                    .map(|hash| hash.iter().collect())
                    .unwrap_or_default();
                fields.sort_unstable();
                Ok(Response::Array(
                    fields
                        .into_iter()
                        .flat_map(|(f, v)| [Response::Text(f.clone()), Response::Text(v.clone())])
                        .collect(),
                ))
            }
            DEL => {
                if args.is_empty() {
                    return Err(wrong_arity(&name));
                }
                let mut hashes = self.hashes.write();
                let removed = args.iter().filter(|k| hashes.remove(*k).is_some()).count();
                Ok(Response::Integer(removed as i64))
            }
            EXISTS => {
                if args.is_empty() {
                    return Err(wrong_arity(&name));
                }
                let hashes = self.hashes.read();
                let found = args.iter().filter(|k| hashes.contains_key(*k)).count();
                Ok(Response::Integer(found as i64))
            }
            PING => match args {
                [] => Ok(Response::Text("PONG".to_string())),
                [message] => Ok(Response::Text(message.clone())),
                _ => Err(wrong_arity(&name)),
            },
            _ => Err(Error::Command(format!(
                "ERR unknown command '{}'",
                command.name()
            ))),
        }
    }
}

fn wrong_arity(name: &str) -> Error {
    Error::Command(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn kind_of(command: &Command) -> CommandKind {
    match command.name().to_ascii_uppercase().as_str() {
        HSET | HMSET => CommandKind::Write,
        HGETALL | EXISTS => CommandKind::Read,
        DEL => CommandKind::Delete,
        _ => CommandKind::Other,
    }
}

impl StoreClient for InMemoryClient {
    async fn execute(&self, command: Command) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection closed".to_string()));
        }

        let kind = kind_of(&command);
        self.error_injector.apply_latency(kind).await;

        if self.error_injector.is_transport_down() {
            return Err(Error::Transport("broken pipe".to_string()));
        }
        if self.error_injector.should_fail(kind) {
            return Err(Error::Command(format!(
                "ERR injected failure for '{}'",
                command.name()
            )));
        }
        if let Some(key) = command.arguments().first() {
            if kind != CommandKind::Other && self.error_injector.fails_key(key) {
                return Err(Error::Command(format!("ERR injected failure for key '{key}'")));
            }
        }

        debug!(%command, "Executing in memory");
        let response = self.apply(&command);
        self.history.lock().push(command);
        response
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hset_and_hgetall() {
        let client = InMemoryClient::new();
        let reply = client
            .execute(Command::new("HSET").args(["k1", "f1", "v1", "f2", "v2"]))
            .await
            .unwrap();
        assert_eq!(reply, Response::Integer(2));

        // overwriting an existing field adds nothing
        let reply = client
            .execute(Command::new("hset").args(["k1", "f1", "v9"]))
            .await
            .unwrap();
        assert_eq!(reply, Response::Integer(0));

        let reply = client.execute(Command::hgetall("k1")).await.unwrap();
        assert_eq!(
            reply,
            Response::Array(vec![
                Response::Text("f1".into()),
                Response::Text("v9".into()),
                Response::Text("f2".into()),
                Response::Text("v2".into()),
            ])
        );

        let reply = client.execute(Command::hgetall("missing")).await.unwrap();
        assert_eq!(reply, Response::Array(vec![]));
    }

    #[tokio::test]
    async fn test_hmset_replies_ok() {
        let client = InMemoryClient::new();
        let reply = client
            .execute(Command::new("HMSET").args(["k1", "f1", "v1"]))
            .await
            .unwrap();
        assert_eq!(reply, Response::Ok);
        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let client = InMemoryClient::new();
        for cmd in [
            Command::new("HSET").arg("k1"),
            Command::new("HSET").args(["k1", "f1"]),
            Command::new("HGETALL"),
            Command::new("HGETALL").args(["k1", "k2"]),
            Command::new("DEL"),
        ] {
            let err = client.execute(cmd.clone()).await.unwrap_err();
            assert!(
                err.to_string().contains("wrong number of arguments"),
                "{cmd}: {err}"
            );
        }
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_del_and_exists() {
        let client = InMemoryClient::new();
        for key in ["a", "b"] {
            client
                .execute(Command::new("HSET").args([key, "f", "v"]))
                .await
                .unwrap();
        }
        let exists = client
            .execute(Command::new("EXISTS").args(["a", "b", "c"]))
            .await
            .unwrap();
        assert_eq!(exists, Response::Integer(2));

        let removed = client
            .execute(Command::new("DEL").args(["a", "c"]))
            .await
            .unwrap();
        assert_eq!(removed, Response::Integer(1));
        assert_eq!(client.snapshot("a"), None);
        assert!(client.snapshot("b").is_some());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = InMemoryClient::new();
        client.error_injector().fail_writes(1);
        let err = client
            .execute(Command::new("HSET").args(["k1", "f", "v"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert!(client.history().is_empty());

        client.error_injector().fail_key("k2");
        assert!(client.execute(Command::hgetall("k2")).await.is_err());
        assert!(client.execute(Command::hgetall("k1")).await.is_ok());

        client.error_injector().break_transport();
        let err = client.execute(Command::ping()).await.unwrap_err();
        assert!(err.is_transport());
        client.error_injector().restore_transport();
        assert!(client.execute(Command::ping()).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let client = InMemoryClient::new();
        let other = client.clone();
        other
            .execute(Command::new("HSET").args(["k1", "f", "v"]))
            .await
            .unwrap();
        assert_eq!(client.len(), 1);
        assert_eq!(client.history().len(), 1);

        other.close().await.unwrap();
        let err = client.execute(Command::hgetall("k1")).await.unwrap_err();
        assert_eq!(err, Error::Transport("connection closed".to_string()));
    }
}
