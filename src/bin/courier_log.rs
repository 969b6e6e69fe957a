//! courier-log: log shipper
//!
//! Reads newline-delimited JSON log records from stdin and forwards each
//! one to the configured sink.
//!
//! ## Architecture
//! ```text
//! [app] --(NDJSON on stdout)--> [courier-log] --> Redis list/set/zset/channel/stream
//!                                             \-> AMQP exchange or queue
//! ```
//!
//! ## Configuration
//! - COURIER_CONFIG / --config: YAML file with a `log_ship` section
//! - COURIER__LOG_SHIP__TYPE: `redis` or `amqp`
//! - COURIER_LOG: tracing filter; `debug` echoes every shipped record

use std::process::ExitCode;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use courier::config::Config;
use courier::logship::{init_sink, records_from_lines, ship};
use courier::utils::bootstrap::init_tracing;

/// Ship structured log records from stdin into Redis or AMQP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "courier-log failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;
    let sink = init_sink(&config.log_ship).await?;

    info!(sink = ?config.log_ship.sink_type, "courier-log started");

    let records = records_from_lines(BufReader::new(tokio::io::stdin()));
    let stats = ship(records, sink.as_ref()).await;

    if stats.failed > 0 {
        warn!(failed = stats.failed, "Some log records were not shipped");
    }

    Ok(())
}
