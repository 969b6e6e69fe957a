//! Redis broker implementation.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{debug, info};

use super::{Broker, BrokerError, CommandConnection, Notification, NotificationStream, Result};

impl From<RedisError> for BrokerError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            BrokerError::Connection(e.to_string())
        } else {
            BrokerError::Command(e.to_string())
        }
    }
}

/// Redis broker.
///
/// Connections are opened without retry: an unreachable server is
/// reported immediately as [`BrokerError::Connection`].
pub struct RedisBroker {
    client: Client,
    url: String,
}

impl RedisBroker {
    /// Create a broker for the given URL (e.g., redis://localhost:6379).
    ///
    /// Only the URL is validated here; no connection is made until
    /// [`Broker::connect`] or [`Broker::psubscribe`].
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| BrokerError::Connection(format!("Invalid Redis URL {}: {}", url, e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self) -> Result<Box<dyn CommandConnection>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {}", e)))?;

        info!(url = %self.url, "Connected to Redis");

        Ok(Box::new(RedisConnection { conn: Some(conn) }))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {}", e)))?;

        pubsub.psubscribe(pattern).await?;

        info!(url = %self.url, pattern = %pattern, "Subscribed to Redis pattern");

        let stream = pubsub.into_on_message().map(|msg| Notification {
            pattern: msg.get_pattern().unwrap_or_default(),
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(stream.boxed())
    }
}

/// A regular Redis connection used for DEL/SET/GET/PUBLISH.
pub struct RedisConnection {
    conn: Option<MultiplexedConnection>,
}

impl RedisConnection {
    fn conn(&mut self) -> Result<&mut MultiplexedConnection> {
        self.conn.as_mut().ok_or(BrokerError::Closed)
    }
}

#[async_trait]
impl CommandConnection for RedisConnection {
    async fn del(&mut self, key: &str) -> Result<()> {
        let _: () = self.conn()?.del(key).await?;
        debug!(key = %key, "DEL");
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let _: () = self.conn()?.set(key, value).await?;
        debug!(key = %key, bytes = value.len(), "SET");
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self.conn()?.get(key).await?;
        debug!(key = %key, found = value.is_some(), "GET");
        Ok(value)
    }

    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize> {
        let receivers: usize = self.conn()?.publish(channel, message).await?;
        debug!(channel = %channel, receivers = receivers, "PUBLISH");
        Ok(receivers)
    }

    async fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("Closed Redis connection");
        }
    }
}
