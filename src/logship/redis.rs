//! Redis log sink.
//!
//! Each record is serialized as JSON and written under
//! `{key_prefix}{key_name}[:{level}]` with the command selected by the
//! configured datatype.

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    Client, Cmd, RedisError,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{LogRecord, LogSink, Result, SinkError};

/// Redis data structure receiving the records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedisDatatype {
    /// RPUSH onto a list.
    #[default]
    List,
    /// SADD into a set.
    Set,
    /// ZADD into a sorted set, scored by epoch milliseconds.
    #[serde(alias = "zset")]
    SortedSet,
    /// PUBLISH on a channel.
    Pubsub,
    /// XADD with an auto-generated ID and a single `data` field.
    Stream,
}

impl RedisDatatype {
    /// Build the write command for one serialized record.
    pub fn command(self, key: &str, payload: &str, now_millis: i64) -> Cmd {
        let mut cmd = match self {
            RedisDatatype::List => redis::cmd("RPUSH"),
            RedisDatatype::Set => redis::cmd("SADD"),
            RedisDatatype::SortedSet => redis::cmd("ZADD"),
            RedisDatatype::Pubsub => redis::cmd("PUBLISH"),
            RedisDatatype::Stream => redis::cmd("XADD"),
        };
        cmd.arg(key);
        match self {
            RedisDatatype::SortedSet => {
                cmd.arg(now_millis).arg(payload);
            }
            RedisDatatype::Stream => {
                cmd.arg("*").arg("data").arg(payload);
            }
            _ => {
                cmd.arg(payload);
            }
        }
        cmd
    }
}

/// Redis sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSinkConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for the target key.
    pub key_prefix: String,
    /// Key (or channel) name appended to the prefix.
    pub key_name: String,
    /// Append `:{level}` to the key so each level gets its own key.
    pub use_level_suffix: bool,
    /// Target data structure.
    pub datatype: RedisDatatype,
    /// Replace the numeric level with its name before writing.
    pub level_text: bool,
}

impl Default for RedisSinkConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "LOG:".to_string(),
            key_name: "pino".to_string(),
            use_level_suffix: false,
            datatype: RedisDatatype::List,
            level_text: false,
        }
    }
}

impl RedisSinkConfig {
    /// Target key for a record. The suffix always uses the numeric level,
    /// even when `level_text` is on.
    pub fn key_for(&self, record: &LogRecord) -> String {
        let mut key = format!("{}{}", self.key_prefix, self.key_name);
        if self.use_level_suffix {
            if let Some(level) = record.level() {
                key.push(':');
                key.push_str(&level.to_string());
            }
        }
        key
    }
}

/// Redis log sink.
pub struct RedisLogSink {
    conn: ConnectionManager,
    config: RedisSinkConfig,
}

impl RedisLogSink {
    /// Connect to `config.url`.
    pub async fn new(config: RedisSinkConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(connection_error)?;
        let conn = ConnectionManager::new_with_config(client, manager_config())
            .await
            .map_err(connection_error)?;

        info!(
            url = %config.url,
            datatype = ?config.datatype,
            "Connected to Redis for log shipping"
        );

        Ok(Self::with_connection(conn, config))
    }

    /// Ship over an existing connection; `config.url` is ignored.
    pub fn with_connection(conn: ConnectionManager, config: RedisSinkConfig) -> Self {
        Self { conn, config }
    }
}

/// A single attempt per connect. After a dropped connection the manager
/// reconnects once on the next write; the failed record is not resent.
fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new().set_number_of_retries(0)
}

fn connection_error(e: RedisError) -> SinkError {
    SinkError::Connection(e.to_string())
}

#[async_trait]
impl LogSink for RedisLogSink {
    async fn write(&self, record: LogRecord) -> Result<()> {
        let key = self.config.key_for(&record);
        let record = if self.config.level_text {
            record.with_level_text()
        } else {
            record
        };
        let payload = record.to_json();

        debug!(key = %key, record = %payload, "Shipping log record to Redis");

        let cmd = self
            .config
            .datatype
            .command(&key, &payload, chrono::Utc::now().timestamp_millis());
        let mut conn = self.conn.clone();
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;

        Ok(())
    }
}
