//! Sending side of a transfer.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{channel_name, Result, TransferError, NEW_FILE_MARKER};
use crate::broker::{Broker, CommandConnection};

/// Summary of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub filename: String,
    pub channel: String,
    pub bytes: usize,
    /// Subscribers that received the notification. Zero means nobody was
    /// listening and the content is left orphaned in the broker.
    pub receivers: usize,
}

/// Sender session holding one command connection.
pub struct Sender {
    connection: Box<dyn CommandConnection>,
    channel_prefix: String,
}

impl Sender {
    /// Open a connection for sending under `channel_prefix`.
    pub async fn connect(broker: &dyn Broker, channel_prefix: impl Into<String>) -> Result<Self> {
        let connection = broker.connect().await?;
        Ok(Self {
            connection,
            channel_prefix: channel_prefix.into(),
        })
    }

    /// Store `path` in the broker and announce it.
    ///
    /// Steps run strictly in order (read, DEL, SET, PUBLISH) so a receiver
    /// woken by the notification never reads a stale value.
    pub async fn send(&mut self, path: &Path) -> Result<SentFile> {
        let filename = base_name(path)?;
        let channel = channel_name(&self.channel_prefix, &filename);

        info!(filename = %filename, channel = %channel, "Sending file");

        let content = tokio::fs::read(path)
            .await
            .map_err(|e| TransferError::io(path, e))?;

        self.connection.del(&channel).await?;
        self.connection.set(&channel, &content).await?;
        let receivers = self.connection.publish(&channel, NEW_FILE_MARKER).await?;

        if receivers == 0 {
            warn!(
                channel = %channel,
                "No receiver was subscribed; content stays in the broker until deleted"
            );
        }

        info!(filename = %filename, bytes = content.len(), receivers = receivers, "File sent");

        Ok(SentFile {
            filename,
            channel,
            bytes: content.len(),
            receivers,
        })
    }

    /// Release the connection.
    pub async fn close(mut self) {
        self.connection.close().await;
    }
}

/// Connect, send one file, and release the connection on every path.
pub async fn send_file(broker: &dyn Broker, channel_prefix: &str, path: &Path) -> Result<SentFile> {
    let mut sender = Sender::connect(broker, channel_prefix).await?;
    let result = sender.send(path).await;
    sender.close().await;
    result
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| TransferError::InvalidFileName(PathBuf::from(path)))
}
