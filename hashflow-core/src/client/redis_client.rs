use std::sync::Arc;

use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, RedisError, Value};
use tracing::{debug, info};

use super::{Command, Response, StoreClient};
use crate::config::RedisConfig;
use crate::error::{Error, Result};

/// Handle to a Redis server. Clones share one multiplexed connection.
///
/// The connection is never re-established: once the server goes away every command fails with
/// [Error::Transport] and it is up to the caller to build a new client.
#[derive(Clone)]
pub struct RedisClient {
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    config: RedisConfig,
}

impl RedisClient {
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Config(format!("Creating Redis client: {e:?}")))?;

        let conn_config = AsyncConnectionConfig::new()
            .set_connection_timeout(config.connection_timeout)
            .set_response_timeout(config.response_timeout);
        let conn = client
            .get_multiplexed_async_connection_with_config(&conn_config)
            .await
            .map_err(|e| classify(&e))?;

        info!(url = %config.url, "Connected to Redis");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            config,
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn
            .lock()
            .as_ref()
            .cloned()
            .ok_or_else(|| Error::Transport("connection closed".to_string()))
    }
}

impl StoreClient for RedisClient {
    async fn execute(&self, command: Command) -> Result<Response> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd(command.name());
        for arg in command.arguments() {
            cmd.arg(arg);
        }

        debug!(%command, "Executing on Redis");
        let value: Value = cmd.query_async(&mut conn).await.map_err(|e| classify(&e))?;
        Response::try_from(value)
    }

    async fn close(&self) -> Result<()> {
        // dropping the last clone of the multiplexed connection shuts its driver task down
        if self.conn.lock().take().is_some() {
            info!(url = %self.config.url, "Closed Redis connection");
        }
        Ok(())
    }
}

/// Split Redis failures into the ones the server reported for a command and the ones where the
/// connection itself is gone.
fn classify(e: &RedisError) -> Error {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        Error::Transport(e.to_string())
    } else {
        Error::Command(e.to_string())
    }
}

impl TryFrom<Value> for Response {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let response = match value {
            Value::Nil => Response::Nil,
            Value::Okay => Response::Ok,
            Value::Int(i) => Response::Integer(i),
            Value::BulkString(bytes) => Response::Text(
                String::from_utf8(bytes)
                    .map_err(|e| Error::Command(format!("reply is not valid UTF-8: {e}")))?,
            ),
            Value::SimpleString(s) => Response::Text(s),
            Value::VerbatimString { text, .. } => Response::Text(text),
            Value::Double(d) => Response::Text(d.to_string()),
            Value::Boolean(b) => Response::Integer(i64::from(b)),
            Value::Array(items) | Value::Set(items) => Response::Array(
                items
                    .into_iter()
                    .map(Response::try_from)
                    .collect::<Result<_>>()?,
            ),
            Value::Map(pairs) => Response::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| -> Result<(Response, Response)> {
                        Ok((Response::try_from(k)?, Response::try_from(v)?))
                    })
                    .collect::<Result<_>>()?,
            ),
            Value::ServerError(e) => return Err(Error::Command(format!("{e:?}"))),
            other => {
                return Err(Error::Command(format!(
                    "unsupported reply from Redis: {other:?}"
                )));
            }
        };
        Ok(response)
    }
}
