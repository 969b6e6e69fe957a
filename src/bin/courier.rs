//! courier: send and receive files using Redis pub/sub
//!
//! ## Usage
//! ```text
//! courier receive [-d <dir>] [-r <url>] [-c <prefix>]   # start first
//! courier send <file> [-r <url>] [-c <prefix>]
//! ```
//!
//! The receiver must already be listening when the sender publishes;
//! a notification sent with nobody subscribed is lost.
//!
//! ## Configuration
//! - REDIS_SERVER_URL: broker URL when `--redis` is not given
//! - COURIER_CONFIG: YAML configuration file
//! - COURIER_LOG: tracing filter (default: info)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use courier::broker::RedisBroker;
use courier::config::Config;
use courier::session::{ctrl_c, run_until_interrupted, Outcome, Overrides, Role, Session};
use courier::utils::bootstrap::init_tracing;

/// Send and receive files using redis pubsub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a file to a listening receiver
    Send {
        /// File to send
        file: PathBuf,

        #[command(flatten)]
        broker: BrokerArgs,
    },
    /// Wait for one file and write it to the destination directory
    Receive {
        /// Destination directory, default is current directory
        #[arg(short, long)]
        dest: Option<PathBuf>,

        #[command(flatten)]
        broker: BrokerArgs,
    },
}

#[derive(clap::Args, Debug)]
struct BrokerArgs {
    /// URL of redis server
    #[arg(short, long)]
    redis: Option<String>,

    /// Channel prefix, default is "REDIS:"
    #[arg(short, long)]
    channel: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "courier failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;

    let (role, overrides) = match args.command {
        Command::Send { file, broker } => (
            Role::Send { file },
            Overrides {
                redis_url: broker.redis,
                channel_prefix: broker.channel,
                dest_dir: None,
            },
        ),
        Command::Receive { dest, broker } => (
            Role::Receive,
            Overrides {
                redis_url: broker.redis,
                channel_prefix: broker.channel,
                dest_dir: dest,
            },
        ),
    };

    let session = Session::resolve(&config.transfer, overrides);
    let broker = RedisBroker::new(&session.broker_url)?;

    match run_until_interrupted(&session, &broker, &role, ctrl_c()).await? {
        Outcome::Sent(sent) => {
            info!(filename = %sent.filename, bytes = sent.bytes, "Done");
        }
        Outcome::Received(received) => {
            info!(path = %received.path.display(), bytes = received.bytes, "Done");
        }
        Outcome::Interrupted => {}
    }

    Ok(())
}
