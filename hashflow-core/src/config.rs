//! Runtime configuration, read from environment variables.
//!
//! Loaders take the environment as an iterator of key/value pairs so callers decide where it
//! comes from (`std::env::vars()` in the binary, literal pairs in tests).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const ENV_REDIS_URL: &str = "HASHFLOW_REDIS_URL";
const ENV_REDIS_CONNECTION_TIMEOUT_MS: &str = "HASHFLOW_REDIS_CONNECTION_TIMEOUT_MS";
const ENV_REDIS_RESPONSE_TIMEOUT_MS: &str = "HASHFLOW_REDIS_RESPONSE_TIMEOUT_MS";
const ENV_CHANNEL_CAPACITY: &str = "HASHFLOW_CHANNEL_CAPACITY";
const ENV_WRITE_POLICY: &str = "HASHFLOW_WRITE_POLICY";

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_TIMEOUT_MS: u64 = 5000;
/// Capacity of every channel between stages. tokio channels cannot be zero-sized, one is the
/// closest to a rendezvous hand-off.
const DEFAULT_CHANNEL_CAPACITY: usize = 1;

fn collect_env(
    env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    wanted: &[&str],
) -> HashMap<String, String> {
    env_vars
        .into_iter()
        .map(|(key, val)| (key.into(), val.into()))
        .filter(|(key, _val)| wanted.contains(&key.as_str()))
        .collect()
}

fn parse_var<T>(env_vars: &HashMap<String, String>, var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_vars
        .get(var)
        .map(|val| {
            val.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parsing {var}={val}: {e}")))
        })
        .transpose()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            connection_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            response_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl RedisConfig {
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars = collect_env(
            env_vars,
            &[
                ENV_REDIS_URL,
                ENV_REDIS_CONNECTION_TIMEOUT_MS,
                ENV_REDIS_RESPONSE_TIMEOUT_MS,
            ],
        );

        let mut config = Self::default();
        if let Some(url) = env_vars.get(ENV_REDIS_URL) {
            config.url = url.clone();
        }
        if let Some(ms) = parse_var::<u64>(&env_vars, ENV_REDIS_CONNECTION_TIMEOUT_MS)? {
            config.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&env_vars, ENV_REDIS_RESPONSE_TIMEOUT_MS)? {
            config.response_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// What the write pipeline does with a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Report the failure on the error channel and keep writing.
    #[default]
    BestEffort,
    /// Report the first failure, stop writing, and fail the pipeline.
    FailFast,
}

impl FromStr for WritePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(WritePolicy::BestEffort),
            "fail-fast" | "fail_fast" => Ok(WritePolicy::FailFast),
            other => Err(Error::Config(format!(
                "unknown write policy {other:?}, expected best-effort or fail-fast"
            ))),
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::BestEffort => write!(f, "best-effort"),
            WritePolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub write_policy: WritePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            write_policy: WritePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars = collect_env(env_vars, &[ENV_CHANNEL_CAPACITY, ENV_WRITE_POLICY]);

        let mut config = Self::default();
        if let Some(capacity) = parse_var::<usize>(&env_vars, ENV_CHANNEL_CAPACITY)? {
            config.channel_capacity = capacity;
        }
        if let Some(policy) = env_vars.get(ENV_WRITE_POLICY) {
            config.write_policy = policy.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
