//! AMQP (RabbitMQ) log sink.
//!
//! Publishes each record as a JSON message. With an exchange configured the
//! exchange is declared with the configured type and records are routed by
//! `routing_key`; otherwise the queue itself is declared and records go
//! through the default exchange straight to it.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LogRecord, LogSink, Result, SinkError};

/// AMQP exchange type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    #[default]
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeType> for ExchangeKind {
    fn from(t: ExchangeType) -> Self {
        match t {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Headers => ExchangeKind::Headers,
        }
    }
}

/// AMQP sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpSinkConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Exchange to publish to. Empty means the default exchange.
    pub exchange: String,
    /// Type used when declaring `exchange`.
    pub exchange_type: ExchangeType,
    /// Routing key for exchange publishes.
    pub routing_key: String,
    /// Queue declared (and routed to) when no exchange is configured.
    pub queue: String,
    /// Declare the exchange or queue as durable.
    pub durable: bool,
    /// Per-message expiration in milliseconds.
    pub expiration_ms: u64,
    /// Replace the numeric level with its name before publishing.
    pub level_text: bool,
}

impl Default for AmqpSinkConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: String::new(),
            exchange_type: ExchangeType::Fanout,
            routing_key: String::new(),
            queue: String::new(),
            durable: true,
            expiration_ms: 3_600_000,
            level_text: false,
        }
    }
}

impl AmqpSinkConfig {
    /// Create config publishing to a named exchange.
    pub fn exchange(
        url: impl Into<String>,
        exchange: impl Into<String>,
        exchange_type: ExchangeType,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            exchange_type,
            routing_key: routing_key.into(),
            ..Default::default()
        }
    }

    /// Create config publishing straight to a queue.
    pub fn queue(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Routing key used for every publish: `routing_key` when set,
    /// otherwise the queue name.
    pub fn effective_routing_key(&self) -> &str {
        if self.routing_key.is_empty() {
            &self.queue
        } else {
            &self.routing_key
        }
    }

    /// Check that records have somewhere to go.
    pub fn validate(&self) -> Result<()> {
        if self.exchange.is_empty() && self.queue.is_empty() {
            return Err(SinkError::Config(
                "AMQP sink requires an exchange or a queue".to_string(),
            ));
        }
        Ok(())
    }

    fn properties(&self) -> BasicProperties {
        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_expiration(self.expiration_ms.to_string().into())
    }
}

/// AMQP log sink.
///
/// One channel is kept open and reused for every record. It is replaced
/// after a failed publish or when the broker has closed it.
pub struct AmqpLogSink {
    pool: Pool,
    config: AmqpSinkConfig,
    channel: Mutex<Option<Channel>>,
}

impl AmqpLogSink {
    /// Connect and declare the configured exchange or queue.
    pub async fn new(config: AmqpSinkConfig) -> Result<Self> {
        config.validate()?;

        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(4)
            .build()
            .map_err(|e| SinkError::Connection(format!("Failed to create pool: {}", e)))?;

        let sink = Self {
            pool,
            config,
            channel: Mutex::new(None),
        };
        let channel = sink.get_channel().await?;
        sink.declare(&channel).await?;
        *sink.channel.lock().await = Some(channel);

        info!(
            url = %sink.config.url,
            exchange = %sink.config.exchange,
            queue = %sink.config.queue,
            "Connected to AMQP for log shipping"
        );

        Ok(sink)
    }

    /// Get a channel from the pool.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            SinkError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| SinkError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn declare(&self, channel: &Channel) -> Result<()> {
        if self.config.exchange.is_empty() {
            channel
                .queue_declare(
                    &self.config.queue,
                    QueueDeclareOptions {
                        durable: self.config.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| SinkError::Connection(format!("Failed to declare queue: {}", e)))?;
        } else {
            channel
                .exchange_declare(
                    &self.config.exchange,
                    self.config.exchange_type.into(),
                    ExchangeDeclareOptions {
                        durable: self.config.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    SinkError::Connection(format!("Failed to declare exchange: {}", e))
                })?;
        }
        Ok(())
    }

    async fn publish(&self, channel: &Channel, routing_key: &str, payload: &[u8]) -> Result<()> {
        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                self.config.properties(),
            )
            .await
            .map_err(|e| SinkError::Write(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| SinkError::Write(format!("Publish confirmation failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl LogSink for AmqpLogSink {
    async fn write(&self, record: LogRecord) -> Result<()> {
        let record = if self.config.level_text {
            record.with_level_text()
        } else {
            record
        };
        let payload = record.to_json();
        let routing_key = self.config.effective_routing_key();

        debug!(
            exchange = %self.config.exchange,
            routing_key = %routing_key,
            record = %payload,
            "Shipping log record to AMQP"
        );

        let mut cached = self.channel.lock().await;
        let channel = match cached.take() {
            Some(channel) if channel.status().connected() => channel,
            stale => {
                if let Some(channel) = stale {
                    debug!(state = ?channel.status().state(), "Replacing closed AMQP channel");
                }
                self.get_channel().await?
            }
        };

        match self.publish(&channel, routing_key, payload.as_bytes()).await {
            Ok(()) => {
                *cached = Some(channel);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = channel.close(200, "OK").await {
                    debug!(error = %close_err, "Failed to close AMQP channel after publish error");
                }
                Err(e)
            }
        }
    }
}
