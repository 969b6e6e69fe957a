//! Courier - file transfer and log shipping over brokers
//!
//! Moves a single file between two processes through Redis pub/sub and
//! key storage, and forwards structured log records into Redis data
//! structures or AMQP exchanges.

pub mod broker;
pub mod config;
pub mod encoding;
pub mod logship;
pub mod session;
pub mod transfer;
pub mod utils;
