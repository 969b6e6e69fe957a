//! Single-file transfer over broker pub/sub.
//!
//! ## Protocol
//! ```text
//! sender                         broker                        receiver
//!   |                              |  <-- PSUBSCRIBE prefix*  ---  |
//!   | -- DEL  prefix+enc(name) --> |                               |
//!   | -- SET  prefix+enc(name) --> |                               |
//!   | -- PUBLISH ... "newFile" --> | -- pmessage(channel) -------> |
//!   |                              | <-- GET channel ------------- |
//!   |                              |          (write file)         |
//!   |                              | <-- DEL channel ------------- |
//! ```
//!
//! The key and the channel share one name. There is no acknowledgement:
//! a receiver that subscribes after the PUBLISH never sees the transfer,
//! and the stored value stays in the broker until someone deletes it.

use std::io;
use std::path::{Path, PathBuf};

use crate::broker::BrokerError;
use crate::encoding::{self, DecodeError};

mod receiver;
mod sender;

pub use receiver::{receive_file, ReceivedFile, Receiver, ReceiverState};
pub use sender::{send_file, SentFile, Sender};

/// Channel prefix used when none is configured.
pub const DEFAULT_CHANNEL_PREFIX: &str = "REDIS:";

/// Payload announcing that content is waiting under the channel's key.
pub const NEW_FILE_MARKER: &str = "newFile";

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that can occur during a transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path has no usable file name: {}", .0.display())]
    InvalidFileName(PathBuf),

    #[error("Channel {channel:?} does not carry a valid file name: {source}")]
    Decode {
        channel: String,
        #[source]
        source: DecodeError,
    },

    #[error("Channel {0:?} is outside the transfer prefix")]
    ForeignChannel(String),

    #[error("No content stored under {0:?}")]
    MissingContent(String),
}

impl TransferError {
    /// Whether a receiver should drop the offending notification and keep
    /// listening instead of ending the session.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TransferError::Decode { .. }
                | TransferError::ForeignChannel(_)
                | TransferError::MissingContent(_)
        )
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            TransferError::FileNotFound(path.to_path_buf())
        } else {
            TransferError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Channel (and key) name for a file.
pub fn channel_name(prefix: &str, filename: &str) -> String {
    format!("{}{}", prefix, encoding::encode(filename))
}

/// PSUBSCRIBE pattern matching every channel under `prefix`.
///
/// Glob metacharacters in the prefix are escaped so they match literally.
pub fn subscription_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Recover the file name from a delivered channel name.
pub fn filename_from_channel(prefix: &str, channel: &str) -> Result<String> {
    let token = channel
        .strip_prefix(prefix)
        .ok_or_else(|| TransferError::ForeignChannel(channel.to_string()))?;

    encoding::decode(token).map_err(|source| TransferError::Decode {
        channel: channel.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests;
