//! # Inbox Rules - Mail Module
//!
//! The remote mail provider as seen by the rule engine: label listing and
//! per-message marker mutation. `gmail` holds the REST implementation.

pub mod gmail;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use gmail::{GmailClient, GmailMessage};

/// Result type alias for remote mail operations
pub type MailResult<T> = Result<T, RemoteError>;

/// Failure of a single call against the mail provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: access token rejected")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// Provider-side label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// Message state flag or label attachment on the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Marker {
    Unread,
    Starred,
    Label(String),
}

impl Marker {
    /// Provider label id carrying this marker
    pub fn label_id(&self) -> &str {
        match self {
            Marker::Unread => "UNREAD",
            Marker::Starred => "STARRED",
            Marker::Label(id) => id,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_id())
    }
}

/// Remote mail provider operations used by the rule engine
///
/// Every `modify_message` call is one remote mutation. Implementations
/// should apply their own per-call timeout.
#[async_trait]
pub trait MailService: Send + Sync {
    /// All labels currently defined on the account
    async fn list_labels(&self) -> MailResult<Vec<Label>>;

    /// Add and remove markers on one message
    async fn modify_message(&self, id: &str, add: &[Marker], remove: &[Marker]) -> MailResult<()>;
}
