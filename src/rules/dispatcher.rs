//! Action dispatcher - turns rule actions into mail service calls

use super::{Action, RunLog};
use crate::mail::{Label, MailService, Marker, RemoteError};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of dispatching one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail")]
pub enum ActionOutcome {
    Applied,
    LabelNotFound,
    RemoteError(String),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

/// Applies actions to messages on the mail service
///
/// One dispatcher serves one run. The label list is fetched the first time a
/// `MoveToLabel` fires and reused until the dispatcher is dropped, so label
/// changes made between runs are always picked up.
pub struct ActionDispatcher {
    mail: Arc<dyn MailService>,
    journal: Arc<dyn RunLog>,
    labels: Cache<(), Arc<Vec<Label>>>,
}

impl ActionDispatcher {
    pub fn new(mail: Arc<dyn MailService>, journal: Arc<dyn RunLog>) -> Self {
        Self {
            mail,
            journal,
            labels: Cache::builder().max_capacity(1).build(),
        }
    }

    /// Apply a single action to a message
    ///
    /// Never fails: label lookups and remote errors become outcomes.
    pub async fn apply(&self, action: &Action, message_id: &str) -> ActionOutcome {
        let (add, remove) = match action {
            Action::MarkAsRead => (vec![], vec![Marker::Unread]),
            Action::MarkAsUnread => (vec![Marker::Unread], vec![]),
            Action::AddStar => (vec![Marker::Starred], vec![]),
            Action::MoveToLabel(name) => match self.resolve_label(name).await {
                Ok(Some(label_id)) => (vec![Marker::Label(label_id)], vec![]),
                Ok(None) => {
                    log::warn!("Label '{}' not found, skipping message {}", name, message_id);
                    self.journal.record(&format!(
                        "Label '{}' not found. Create it on the mail provider first.",
                        name
                    ));
                    return ActionOutcome::LabelNotFound;
                }
                Err(e) => return self.remote_failure(action, message_id, e),
            },
        };

        match self.mail.modify_message(message_id, &add, &remove).await {
            Ok(()) => {
                self.journal.record(&describe(action, message_id));
                ActionOutcome::Applied
            }
            Err(e) => self.remote_failure(action, message_id, e),
        }
    }

    /// Look up a label id by exact name
    async fn resolve_label(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let labels = self
            .labels
            .try_get_with((), async {
                let labels = self.mail.list_labels().await?;
                log::debug!("Fetched {} labels", labels.len());
                Ok::<_, RemoteError>(Arc::new(labels))
            })
            .await
            .map_err(|e| (*e).clone())?;

        Ok(labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.id.clone()))
    }

    fn remote_failure(&self, action: &Action, message_id: &str, err: RemoteError) -> ActionOutcome {
        log::warn!("Action {} failed for message {}: {}", action, message_id, err);
        self.journal.record(&format!(
            "Failed to apply {} to email {}: {}",
            action, message_id, err
        ));
        ActionOutcome::RemoteError(err.to_string())
    }
}

fn describe(action: &Action, message_id: &str) -> String {
    match action {
        Action::MarkAsRead => format!("Marked email {} as read.", message_id),
        Action::MarkAsUnread => format!("Marked email {} as unread.", message_id),
        Action::AddStar => format!("Starred email {}.", message_id),
        Action::MoveToLabel(name) => format!("Moved email {} to label {}.", message_id, name),
    }
}
