//! Message ingestion
//!
//! Pulls messages from the provider and stores them for the rule engine.

use crate::db::{Database, NewMessage};
use crate::error::Result;
use crate::mail::gmail::{GmailClient, GmailMessage, MessageQuery};
use crate::mail::MailResult;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Provider side of ingestion
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_message_ids(&self, query: &MessageQuery) -> MailResult<Vec<String>>;
    async fn get_message(&self, id: &str) -> MailResult<GmailMessage>;
}

#[async_trait]
impl MessageSource for GmailClient {
    async fn list_message_ids(&self, query: &MessageQuery) -> MailResult<Vec<String>> {
        GmailClient::list_message_ids(self, query).await
    }

    async fn get_message(&self, id: &str) -> MailResult<GmailMessage> {
        GmailClient::get_message(self, id).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub listed: usize,
    pub stored: usize,
    /// Ids whose download failed
    pub skipped: Vec<String>,
}

pub struct Ingestor {
    source: Arc<dyn MessageSource>,
    db: Database,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(source: Arc<dyn MessageSource>, db: Database) -> Self {
        Self {
            source,
            db,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Download the selected messages and upsert them into the store.
    ///
    /// A failed listing aborts; a message that fails to download is skipped
    /// and reported.
    pub async fn fetch(&self, query: &MessageQuery) -> Result<IngestReport> {
        let ids = self.source.list_message_ids(query).await?;
        log::info!("Listed {} messages for {:?}", ids.len(), query);

        let fetched: Vec<(String, MailResult<GmailMessage>)> = stream::iter(ids.iter())
            .map(|id| async move { (id.clone(), self.source.get_message(id).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = IngestReport {
            listed: ids.len(),
            ..Default::default()
        };
        let mut batch: Vec<NewMessage> = Vec::with_capacity(fetched.len());

        for (id, result) in fetched {
            match result {
                Ok(message) => batch.push(message.to_new_message()),
                Err(e) => {
                    log::warn!("Failed to fetch message {}: {}", id, e);
                    report.skipped.push(id);
                }
            }
        }

        report.stored = self.db.batch_upsert_messages(&batch)?;
        log::info!("Stored {} messages ({} skipped)", report.stored, report.skipped.len());

        Ok(report)
    }
}
