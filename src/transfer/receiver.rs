//! Receiving side of a transfer.
//!
//! A receiver serves exactly one transfer:
//! `Subscribed -> Fetching -> Writing -> Cleanup -> Terminated`.
//! Notifications with any payload other than the marker are ignored, and
//! notifications whose channel does not decode to a file name are skipped
//! with a warning. If the announced content is already gone when fetched,
//! the notification is skipped too and the receiver keeps listening.

use std::path::PathBuf;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{filename_from_channel, subscription_pattern, Result, TransferError, NEW_FILE_MARKER};
use crate::broker::{Broker, BrokerError, CommandConnection, Notification, NotificationStream};

/// Where a receiver is in its single-transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Subscribed,
    Fetching,
    Writing,
    Cleanup,
    Terminated,
}

/// Summary of a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub filename: String,
    pub channel: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Receiver session: a pattern subscription plus a command connection.
pub struct Receiver {
    notifications: NotificationStream,
    connection: Box<dyn CommandConnection>,
    channel_prefix: String,
    dest_dir: PathBuf,
    state: ReceiverState,
}

impl Receiver {
    /// Open both connections and subscribe to every channel under
    /// `channel_prefix`. Returns once the subscription is active.
    pub async fn subscribe(
        broker: &dyn Broker,
        channel_prefix: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let channel_prefix = channel_prefix.into();
        let notifications = broker
            .psubscribe(&subscription_pattern(&channel_prefix))
            .await?;
        let connection = broker.connect().await?;

        Ok(Self {
            notifications,
            connection,
            channel_prefix,
            dest_dir: dest_dir.into(),
            state: ReceiverState::Subscribed,
        })
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Wait for one announced file and store it in the destination directory.
    pub async fn receive(&mut self) -> Result<ReceivedFile> {
        while let Some(notification) = self.notifications.next().await {
            if notification.payload != NEW_FILE_MARKER.as_bytes() {
                debug!(
                    channel = %notification.channel,
                    "Ignoring notification without file marker"
                );
                continue;
            }

            match self.fetch(&notification).await {
                Ok(file) => {
                    self.state = ReceiverState::Terminated;
                    return Ok(file);
                }
                Err(e) if e.is_skippable() => {
                    warn!(channel = %notification.channel, error = %e, "Skipping notification");
                    self.state = ReceiverState::Subscribed;
                }
                Err(e) => return Err(e),
            }
        }

        Err(BrokerError::SubscriptionEnded.into())
    }

    async fn fetch(&mut self, notification: &Notification) -> Result<ReceivedFile> {
        let channel = notification.channel.as_str();
        let filename = filename_from_channel(&self.channel_prefix, channel)?;
        let path = self.dest_dir.join(&filename);

        info!(filename = %filename, channel = %channel, "Receiving file");

        self.state = ReceiverState::Fetching;
        let content = self
            .connection
            .get(channel)
            .await?
            .ok_or_else(|| TransferError::MissingContent(channel.to_string()))?;

        self.state = ReceiverState::Writing;
        tokio::fs::write(&path, &content)
            .await
            .map_err(|source| TransferError::Io {
                path: path.clone(),
                source,
            })?;

        self.state = ReceiverState::Cleanup;
        self.connection.del(channel).await?;

        info!(path = %path.display(), bytes = content.len(), "File received");

        Ok(ReceivedFile {
            filename,
            channel: channel.to_string(),
            path,
            bytes: content.len(),
        })
    }

    /// Release both connections.
    pub async fn close(mut self) {
        self.connection.close().await;
        // Dropping the stream closes the subscription connection.
    }
}

/// Subscribe, serve exactly one transfer, and release both connections.
pub async fn receive_file(
    broker: &dyn Broker,
    channel_prefix: &str,
    dest_dir: impl Into<PathBuf>,
) -> Result<ReceivedFile> {
    let mut receiver = Receiver::subscribe(broker, channel_prefix, dest_dir).await?;
    let result = receiver.receive().await;
    receiver.close().await;
    result
}
