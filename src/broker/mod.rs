//! Broker connections for file transfers.
//!
//! This module contains:
//! - `Broker` trait: a connection factory bound to one broker URL
//! - `CommandConnection` trait: the key/value and publish commands a
//!   transfer needs (DEL, SET, GET, PUBLISH)
//! - `Notification`: one pattern-message delivery
//! - Implementations: Redis, in-memory mock
//!
//! A subscribed connection cannot issue regular commands, so a receiver
//! holds two handles: the notification stream returned by
//! [`Broker::psubscribe`] and a separate [`CommandConnection`].

use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod redis;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use self::redis::{RedisBroker, RedisConnection};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBroker;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur while talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Connection already closed")]
    Closed,

    #[error("Subscription ended before a transfer completed")]
    SubscriptionEnded,
}

/// A message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The pattern that matched.
    pub pattern: String,
    /// The concrete channel the message was published on.
    pub channel: String,
    /// Raw message payload.
    pub payload: Vec<u8>,
}

/// Stream of pattern-message deliveries. Dropping it releases the
/// subscription connection.
pub type NotificationStream = BoxStream<'static, Notification>;

/// Commands issued on a regular (non-subscribed) connection.
#[async_trait]
pub trait CommandConnection: Send {
    /// Remove a key. Succeeds whether or not the key existed.
    async fn del(&mut self, key: &str) -> Result<()>;

    /// Store an opaque value, replacing any previous one.
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch an opaque value.
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Publish a message; returns how many subscribers received it.
    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize>;

    /// Release the connection. Calling it again is a no-op; commands
    /// issued afterwards fail with [`BrokerError::Closed`].
    async fn close(&mut self);
}

/// Opens connections to a single broker.
///
/// Implementations:
/// - `RedisBroker`: Redis via redis-rs
/// - `MockBroker`: in-memory, for tests
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection for regular commands.
    async fn connect(&self) -> Result<Box<dyn CommandConnection>>;

    /// Open a dedicated subscription connection and PSUBSCRIBE to `pattern`.
    ///
    /// Returns once the broker has confirmed the subscription, so messages
    /// published after this call completes are delivered.
    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream>;
}
