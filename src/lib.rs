//! # Inbox Rules
//!
//! Rule-driven automation for a Gmail mailbox: messages are pulled into a
//! local SQLite store, and stored rules mark, star or label the unread ones.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod mail;
pub mod rules;

pub use error::{Error, Result};

use clap::Parser;

/// Process entry point used by the `inbox-rules` binary
pub fn run() {
    // Load .env file for the access token and paths
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            eprintln!("FATAL: Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(cli::execute(cli)) {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
