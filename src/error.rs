//! Crate-level error types
//!
//! Config and store errors are fatal for a run and surface before any
//! remote mutation. Per-action failures never appear here; they are
//! outcomes inside the run report.

use crate::db::DbError;
use crate::mail::RemoteError;
use crate::rules::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reading pending messages or reading/writing rule definitions
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Rule file {path:?}: {source}")]
    RuleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Message store: {0}")]
    Database(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid rules: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Mail service: {0}")]
    Remote(#[from] RemoteError),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Error::Store(StoreError::Database(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
