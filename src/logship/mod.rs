//! Log shipping into brokers.
//!
//! This module contains:
//! - `LogRecord`: one structured record (a JSON object with a numeric `level`)
//! - `LogSink` trait: forwards a record with exactly one broker write
//! - `ship`: drives a record stream into a sink
//! - Sink configuration types
//! - Implementations: Redis (list, set, sorted set, pub/sub, stream), AMQP
//!
//! Shipping is fire-and-forget: a failed write is logged and the next
//! record is processed. Nothing is reported back to the record producer.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod redis;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpLogSink, AmqpSinkConfig, ExchangeType};
pub use self::redis::{RedisDatatype, RedisLogSink, RedisSinkConfig};

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors that can occur while shipping logs.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Invalid log record: {0}")]
    InvalidRecord(String),

    #[error("Invalid sink configuration: {0}")]
    Config(String),
}

/// Severity levels carried in the numeric `level` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 10,
    Debug = 20,
    Info = 30,
    Warn = 40,
    Error = 50,
    Fatal = 60,
}

impl Level {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            10 => Some(Level::Trace),
            20 => Some(Level::Debug),
            30 => Some(Level::Info),
            40 => Some(Level::Warn),
            50 => Some(Level::Error),
            60 => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse one line of newline-delimited JSON. Only objects are records.
    pub fn from_json_line(line: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(Self(fields)),
            Ok(other) => Err(SinkError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(SinkError::InvalidRecord(e.to_string())),
        }
    }

    /// Numeric level, if the record carries one.
    pub fn level(&self) -> Option<i64> {
        self.0.get("level").and_then(Value::as_i64)
    }

    /// Replace a known numeric level with its name. Unknown or missing
    /// levels are left untouched.
    pub fn with_level_text(mut self) -> Self {
        if let Some(level) = self.level().and_then(Level::from_number) {
            self.0
                .insert("level".to_string(), Value::String(level.as_str().to_string()));
        }
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Destination for log records.
///
/// Implementations:
/// - `RedisLogSink`: one Redis write per record
/// - `AmqpLogSink`: one exchange publish per record
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Forward a single record.
    async fn write(&self, record: LogRecord) -> Result<()>;
}

/// Counters reported when a record stream is exhausted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShipStats {
    pub forwarded: u64,
    pub failed: u64,
}

/// Forward every record from `source` into `sink`, in order.
pub async fn ship<S>(source: S, sink: &dyn LogSink) -> ShipStats
where
    S: Stream<Item = LogRecord>,
{
    futures::pin_mut!(source);
    let mut stats = ShipStats::default();

    while let Some(record) = source.next().await {
        match sink.write(record).await {
            Ok(()) => stats.forwarded += 1,
            Err(e) => {
                warn!(error = %e, "Failed to ship log record");
                stats.failed += 1;
            }
        }
    }

    info!(
        forwarded = stats.forwarded,
        failed = stats.failed,
        "Log source exhausted"
    );
    stats
}

/// Read newline-delimited JSON records. Blank lines are ignored, and lines
/// that are not UTF-8 JSON objects are skipped with a warning. The stream
/// ends at EOF or on an I/O error.
pub fn records_from_lines<R>(reader: R) -> impl Stream<Item = LogRecord>
where
    R: AsyncBufRead + Unpin,
{
    futures::stream::unfold(reader.split(b'\n'), |mut lines| async move {
        loop {
            match lines.next_segment().await {
                Ok(Some(bytes)) => match parse_line(bytes) {
                    Ok(Some(record)) => return Some((record, lines)),
                    Ok(None) => continue,
                    Err(e) => warn!(error = %e, "Skipping unparseable log line"),
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "Failed to read log input");
                    return None;
                }
            }
        }
    })
}

/// `Ok(None)` for a blank line.
fn parse_line(bytes: Vec<u8>) -> Result<Option<LogRecord>> {
    let line = String::from_utf8(bytes)
        .map_err(|e| SinkError::InvalidRecord(format!("not UTF-8: {}", e)))?;
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }
    LogRecord::from_json_line(line).map(Some)
}

// ============================================================================
// Configuration
// ============================================================================

/// Sink type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    /// Redis data structure or pub/sub channel.
    #[default]
    Redis,
    /// AMQP/RabbitMQ exchange or queue.
    Amqp,
}

/// Log shipping configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogShipConfig {
    /// Sink type discriminator.
    #[serde(rename = "type")]
    pub sink_type: SinkType,
    /// Redis-specific configuration.
    pub redis: RedisSinkConfig,
    /// AMQP-specific configuration.
    #[cfg(feature = "amqp")]
    pub amqp: AmqpSinkConfig,
}

/// Initialize the sink selected by configuration.
pub async fn init_sink(config: &LogShipConfig) -> Result<Box<dyn LogSink>> {
    debug!(sink = ?config.sink_type, "Initializing log sink");

    match config.sink_type {
        SinkType::Redis => Ok(Box::new(RedisLogSink::new(config.redis.clone()).await?)),
        #[cfg(feature = "amqp")]
        SinkType::Amqp => Ok(Box::new(AmqpLogSink::new(config.amqp.clone()).await?)),
        #[cfg(not(feature = "amqp"))]
        SinkType::Amqp => Err(SinkError::Config(
            "AMQP sink requested but 'amqp' feature is not enabled".to_string(),
        )),
    }
}
