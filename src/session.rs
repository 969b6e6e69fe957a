//! Session lifecycle: one transfer per process.
//!
//! A [`Session`] holds the resolved broker URL, channel prefix and
//! destination directory. [`run_until_interrupted`] performs exactly one
//! send or one receive and returns early when the interrupt future
//! completes. On interrupt the in-flight operation is dropped as-is:
//! connections are released by drop, and content already stored in the
//! broker is left there.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::broker::Broker;
use crate::config::{TransferConfig, REDIS_URL_ENV_VAR};
use crate::transfer::{self, ReceivedFile, SentFile};

/// What this process invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Send { file: PathBuf },
    Receive,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent(SentFile),
    Received(ReceivedFile),
    Interrupted,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub broker_url: String,
    pub channel_prefix: String,
    pub dest_dir: PathBuf,
}

/// Settings given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub redis_url: Option<String>,
    pub channel_prefix: Option<String>,
    pub dest_dir: Option<PathBuf>,
}

impl Session {
    /// Resolve settings from the command line, `REDIS_SERVER_URL` and
    /// configuration, in that order of precedence.
    pub fn resolve(config: &TransferConfig, overrides: Overrides) -> Self {
        Self::resolve_with_env(config, overrides, std::env::var(REDIS_URL_ENV_VAR).ok())
    }

    pub fn resolve_with_env(
        config: &TransferConfig,
        overrides: Overrides,
        env_url: Option<String>,
    ) -> Self {
        let broker_url = overrides
            .redis_url
            .or(env_url.filter(|url| !url.is_empty()))
            .unwrap_or_else(|| config.redis_url.clone());

        Self {
            broker_url,
            channel_prefix: overrides
                .channel_prefix
                .unwrap_or_else(|| config.channel_prefix.clone()),
            dest_dir: overrides.dest_dir.unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Perform the role's single transfer.
    pub async fn run(&self, broker: &dyn Broker, role: &Role) -> transfer::Result<Outcome> {
        match role {
            Role::Send { file } => {
                info!(url = %self.broker_url, "Sending over broker");
                transfer::send_file(broker, &self.channel_prefix, file)
                    .await
                    .map(Outcome::Sent)
            }
            Role::Receive => {
                info!(
                    url = %self.broker_url,
                    prefix = %self.channel_prefix,
                    dest = %self.dest_dir.display(),
                    "Waiting for a file"
                );
                transfer::receive_file(broker, &self.channel_prefix, self.dest_dir.clone())
                    .await
                    .map(Outcome::Received)
            }
        }
    }
}

/// Run the session's transfer, or stop as soon as `interrupt` completes.
pub async fn run_until_interrupted<I>(
    session: &Session,
    broker: &dyn Broker,
    role: &Role,
    interrupt: I,
) -> transfer::Result<Outcome>
where
    I: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = interrupt => {
            warn!("Interrupted, exiting without cleanup");
            Ok(Outcome::Interrupted)
        }
        result = session.run(broker, role) => result,
    }
}

/// Completes on Ctrl+C. Never completes if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
