//! Rule engine - applies rules to pending messages

use super::{Action, ActionDispatcher, ActionOutcome, CaseSensitivity, Rule, RuleStore, RunLog};
use crate::db::{Message, MessageStore};
use crate::error::{Error, Result};
use crate::mail::MailService;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Matching and dispatch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub case_sensitivity: CaseSensitivity,
    /// Messages whose remote calls may be in flight at once
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::Sensitive,
            concurrency: 1,
        }
    }
}

/// What a front end asks the engine to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub rules_path: PathBuf,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Dispatch every matching rule's actions
    Apply,
    /// Report matches without touching the mail service
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Applied(RunReport),
    Previewed(Vec<RuleMatch>),
}

/// One dispatched action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub message_id: String,
    pub rule_index: usize,
    pub action: Action,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

/// A rule that matched a message, without dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub message_id: String,
    pub subject: String,
    pub rule_index: usize,
    pub actions: Vec<Action>,
}

/// Every outcome of one run, in message, rule, then action order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub messages_processed: usize,
    pub entries: Vec<RunEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub messages_processed: usize,
    pub applied: usize,
    pub label_not_found: usize,
    pub remote_errors: usize,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            messages_processed: self.messages_processed,
            ..Default::default()
        };

        for entry in &self.entries {
            match entry.outcome {
                ActionOutcome::Applied => summary.applied += 1,
                ActionOutcome::LabelNotFound => summary.label_not_found += 1,
                ActionOutcome::RemoteError(_) => summary.remote_errors += 1,
            }
        }

        summary
    }

    /// Entries that did not apply
    pub fn failures(&self) -> impl Iterator<Item = &RunEntry> {
        self.entries.iter().filter(|e| !e.outcome.is_applied())
    }
}

impl RunSummary {
    pub fn has_warnings(&self) -> bool {
        self.label_not_found > 0 || self.remote_errors > 0
    }

    /// Operator-facing warning line, if anything failed
    pub fn warning(&self) -> Option<String> {
        if !self.has_warnings() {
            return None;
        }
        Some(format!(
            "{} action(s) not applied: {} label(s) not found, {} remote error(s)",
            self.label_not_found + self.remote_errors,
            self.label_not_found,
            self.remote_errors
        ))
    }
}

/// Rule engine that applies rules to messages
pub struct RuleEngine {
    mail: Arc<dyn MailService>,
    journal: Arc<dyn RunLog>,
    options: RunOptions,
}

impl RuleEngine {
    /// Create a new rule engine
    pub fn new(mail: Arc<dyn MailService>, journal: Arc<dyn RunLog>) -> Self {
        Self {
            mail,
            journal,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = RunOptions {
            concurrency: options.concurrency.max(1),
            ..options
        };
        self
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Indices of the rules matching a message, in rule order
    pub fn matching_rules(&self, rules: &[Rule], message: &Message) -> Vec<usize> {
        rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(message, self.options.case_sensitivity))
            .map(|(index, _)| index)
            .collect()
    }

    /// Evaluate rules against messages without dispatching anything
    pub fn preview(&self, rules: &[Rule], messages: &[Message]) -> Vec<RuleMatch> {
        messages
            .iter()
            .flat_map(|message| {
                self.matching_rules(rules, message)
                    .into_iter()
                    .map(move |index| RuleMatch {
                        message_id: message.id.clone(),
                        subject: message.subject.clone(),
                        rule_index: index,
                        actions: rules[index].actions().to_vec(),
                    })
            })
            .collect()
    }

    /// Apply all matching rules to every message
    ///
    /// Matching uses the message snapshot as given. Failures are recorded in
    /// the report and never stop later actions, rules or messages. Two rules
    /// issuing opposite actions on one message both run, in rule order, and
    /// the provider keeps whichever state it applied last.
    pub async fn run(&self, rules: &[Rule], messages: &[Message]) -> RunReport {
        let dispatcher = ActionDispatcher::new(self.mail.clone(), self.journal.clone());

        log::info!(
            "Applying {} rules to {} messages",
            rules.len(),
            messages.len()
        );

        // `buffered` keeps message order in the output whatever the width
        let per_message: Vec<Vec<RunEntry>> = stream::iter(messages)
            .map(|message| self.process_message(&dispatcher, rules, message))
            .buffered(self.options.concurrency)
            .collect()
            .await;

        let report = RunReport {
            messages_processed: messages.len(),
            entries: per_message.into_iter().flatten().collect(),
        };

        let summary = report.summary();
        log::info!(
            "Run complete: {} messages, {} applied, {} label(s) not found, {} remote error(s)",
            summary.messages_processed,
            summary.applied,
            summary.label_not_found,
            summary.remote_errors
        );

        report
    }

    async fn process_message(
        &self,
        dispatcher: &ActionDispatcher,
        rules: &[Rule],
        message: &Message,
    ) -> Vec<RunEntry> {
        let mut entries = Vec::new();

        for index in self.matching_rules(rules, message) {
            log::info!(
                "Rule {} matched message '{}' (ID: {})",
                index,
                message.subject,
                message.id
            );

            for action in rules[index].actions() {
                let outcome = dispatcher.apply(action, &message.id).await;
                entries.push(RunEntry {
                    message_id: message.id.clone(),
                    rule_index: index,
                    action: action.clone(),
                    outcome,
                });
            }
        }

        entries
    }

    /// Load rules and pending messages, then apply or preview
    ///
    /// Rule and store errors abort before any remote call is made.
    pub async fn execute(&self, request: &RunRequest, store: &dyn MessageStore) -> Result<RunOutcome> {
        let rules = RuleStore::new(&request.rules_path).load()?;
        let messages = store.list_unread().map_err(Error::from)?;

        if rules.is_empty() {
            log::warn!("No rules defined in {:?}", request.rules_path);
        }

        Ok(match request.mode {
            RunMode::Apply => RunOutcome::Applied(self.run(&rules, &messages).await),
            RunMode::Preview => RunOutcome::Previewed(self.preview(&rules, &messages)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewMessage};
    use crate::mail::testing::{FakeMailService, ModifyCall};
    use crate::mail::Marker;
    use crate::rules::{
        Condition, ConditionField, ConditionOperator, MemoryJournal, Predicate,
    };

    fn message(id: &str, sender: &str, subject: &str, body: &str) -> Message {
        Message {
            id: id.to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            is_read: false,
        }
    }

    fn subject_rule(value: &str, actions: Vec<Action>) -> Rule {
        Rule::new(
            Predicate::Any,
            vec![Condition::new(ConditionField::Subject, ConditionOperator::Contains, value)],
            actions,
        )
        .unwrap()
    }

    fn engine(mail: &Arc<FakeMailService>) -> RuleEngine {
        RuleEngine::new(mail.clone(), Arc::new(MemoryJournal::new()))
    }

    #[tokio::test]
    async fn test_matching_subject_marks_read() {
        let mail = Arc::new(FakeMailService::new());
        let rules = vec![subject_rule("Test", vec![Action::MarkAsRead])];
        let messages = vec![message("email_1", "x@y.com", "This is a Test message", "Hello")];

        let report = engine(&mail).run(&rules, &messages).await;

        assert_eq!(
            mail.calls(),
            vec![ModifyCall {
                id: "email_1".into(),
                add: vec![],
                remove: vec![Marker::Unread],
            }]
        );
        assert_eq!(
            report.entries,
            vec![RunEntry {
                message_id: "email_1".into(),
                rule_index: 0,
                action: Action::MarkAsRead,
                outcome: ActionOutcome::Applied,
            }]
        );
    }

    #[tokio::test]
    async fn test_non_matching_rule_dispatches_nothing() {
        let mail = Arc::new(FakeMailService::with_labels(&[("L1", "nykaa-promotions")]));
        let rules = vec![subject_rule(
            "nykaa-promotions",
            vec![Action::move_to_label("nykaa-promotions")],
        )];
        let messages = vec![message("m1", "x@y.com", "Integration Test Email", "")];

        let report = engine(&mail).run(&rules, &messages).await;

        assert!(mail.calls().is_empty());
        assert!(report.entries.is_empty());
        assert_eq!(report.messages_processed, 1);
        assert_eq!(mail.label_listings(), 0);
    }

    #[tokio::test]
    async fn test_missing_label_does_not_stop_run() {
        let mail = Arc::new(FakeMailService::with_labels(&[("L1", "Travel")]));
        let rules = vec![subject_rule(
            "Order",
            vec![Action::move_to_label("Receipts"), Action::AddStar],
        )];
        let messages = vec![
            message("m1", "shop@a.com", "Order 1", ""),
            message("m2", "shop@a.com", "Order 2", ""),
        ];

        let report = engine(&mail).run(&rules, &messages).await;

        let outcomes: Vec<_> = report
            .entries
            .iter()
            .map(|e| (e.message_id.as_str(), e.outcome.clone()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("m1", ActionOutcome::LabelNotFound),
                ("m1", ActionOutcome::Applied),
                ("m2", ActionOutcome::LabelNotFound),
                ("m2", ActionOutcome::Applied),
            ]
        );
        // only the two star calls reached the provider
        assert_eq!(mail.calls().len(), 2);
        assert!(mail.calls().iter().all(|c| c.add == vec![Marker::Starred]));
    }

    #[tokio::test]
    async fn test_conflicting_rules_both_apply_in_rule_order() {
        let mail = Arc::new(FakeMailService::new());
        mail.seed("m1", &[Marker::Unread]);
        let rules = vec![
            subject_rule("Weekly", vec![Action::MarkAsRead]),
            subject_rule("digest", vec![Action::MarkAsUnread]),
        ];
        let messages = vec![message("m1", "news@a.com", "Weekly digest", "")];

        let report = engine(&mail).run(&rules, &messages).await;

        assert_eq!(report.summary().applied, 2);
        assert_eq!(
            report.entries.iter().map(|e| e.rule_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        let calls = mail.calls();
        assert_eq!(calls[0].remove, vec![Marker::Unread]);
        assert_eq!(calls[1].add, vec![Marker::Unread]);
        // last call wins on the provider
        assert!(mail.markers("m1").contains(&Marker::Unread));
    }

    #[tokio::test]
    async fn test_remote_error_isolated_to_its_message() {
        let mail = Arc::new(FakeMailService::new());
        mail.fail_message("bad");
        let rules = vec![subject_rule("Hi", vec![Action::MarkAsRead, Action::AddStar])];
        let messages = vec![
            message("bad", "a@a.com", "Hi there", ""),
            message("good", "b@b.com", "Hi again", ""),
        ];

        let report = engine(&mail).run(&rules, &messages).await;
        let summary = report.summary();

        assert_eq!(summary.remote_errors, 2);
        assert_eq!(summary.applied, 2);
        assert!(summary.has_warnings());
        assert_eq!(
            summary.warning().unwrap(),
            "2 action(s) not applied: 0 label(s) not found, 2 remote error(s)"
        );
        assert_eq!(report.failures().count(), 2);
        assert_eq!(mail.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_per_message_order() {
        let mail = Arc::new(FakeMailService::with_labels(&[("L1", "Work")]));
        let rules = vec![
            subject_rule("msg", vec![Action::MarkAsRead, Action::move_to_label("Work")]),
            subject_rule("msg", vec![Action::AddStar]),
        ];
        let messages: Vec<Message> = (0..8)
            .map(|i| message(&format!("m{i}"), "a@a.com", "msg", ""))
            .collect();

        let report = engine(&mail)
            .with_options(RunOptions {
                concurrency: 4,
                ..RunOptions::default()
            })
            .run(&rules, &messages)
            .await;

        assert_eq!(report.entries.len(), 24);
        for (i, chunk) in report.entries.chunks(3).enumerate() {
            assert!(chunk.iter().all(|e| e.message_id == format!("m{i}")));
            assert_eq!(
                chunk.iter().map(|e| e.action.tag()).collect::<Vec<_>>(),
                vec!["mark_as_read", "move_to_label", "add_star"]
            );
        }

        let calls = mail.calls();
        for i in 0..8 {
            let id = format!("m{i}");
            let adds: Vec<_> = calls.iter().filter(|c| c.id == id).collect();
            assert_eq!(adds.len(), 3);
            assert_eq!(adds[0].remove, vec![Marker::Unread]);
            assert_eq!(adds[1].add, vec![Marker::Label("L1".into())]);
            assert_eq!(adds[2].add, vec![Marker::Starred]);
        }
        assert_eq!(mail.label_listings(), 1);
    }

    #[tokio::test]
    async fn test_case_insensitive_option() {
        let mail = Arc::new(FakeMailService::new());
        let rules = vec![subject_rule("invoice", vec![Action::AddStar])];
        let messages = vec![message("m1", "a@a.com", "INVOICE #42", "")];

        let strict = engine(&mail).run(&rules, &messages).await;
        assert!(strict.entries.is_empty());

        let relaxed = engine(&mail)
            .with_options(RunOptions {
                case_sensitivity: CaseSensitivity::Insensitive,
                concurrency: 1,
            })
            .run(&rules, &messages)
            .await;
        assert_eq!(relaxed.entries.len(), 1);
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let mail = Arc::new(FakeMailService::new());
        let engine = engine(&mail).with_options(RunOptions {
            concurrency: 0,
            ..RunOptions::default()
        });
        assert_eq!(engine.options().concurrency, 1);
    }

    #[test]
    fn test_preview_lists_matches() {
        let mail = Arc::new(FakeMailService::new());
        let rules = vec![
            subject_rule("Test", vec![Action::MarkAsRead]),
            subject_rule("nope", vec![Action::AddStar]),
            subject_rule("message", vec![Action::move_to_label("X")]),
        ];
        let messages = vec![message("m1", "a@a.com", "This is a Test message", "")];

        let matches = engine(&mail).preview(&rules, &messages);

        assert_eq!(matches.iter().map(|m| m.rule_index).collect::<Vec<_>>(), vec![0, 2]);
        assert!(mail.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_reads_unread_messages() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("rules.json");
        RuleStore::new(&rules_path)
            .save(&[subject_rule("Test", vec![Action::MarkAsRead])])
            .unwrap();

        let db = Database::in_memory().unwrap();
        for (id, is_read) in [("email_1", false), ("email_2", true)] {
            db.upsert_message(&NewMessage {
                id: id.to_string(),
                sender: "someone@example.com".to_string(),
                subject: "This is a Test message".to_string(),
                received_at: "1610000000000".to_string(),
                body: "Hello".to_string(),
                is_read,
            })
            .unwrap();
        }

        let mail = Arc::new(FakeMailService::new());
        let request = RunRequest {
            rules_path,
            mode: RunMode::Apply,
        };
        let outcome = engine(&mail).execute(&request, &db).await.unwrap();

        match outcome {
            RunOutcome::Applied(report) => {
                assert_eq!(report.messages_processed, 1);
                assert_eq!(report.entries[0].message_id, "email_1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(mail.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_fails_fast_on_bad_rules() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("rules.json");
        std::fs::write(
            &rules_path,
            r#"{"rules": [{"predicate": "All", "conditions": [], "actions": ["mark_as_read"]}]}"#,
        )
        .unwrap();

        let db = Database::in_memory().unwrap();
        let mail = Arc::new(FakeMailService::new());
        let request = RunRequest {
            rules_path,
            mode: RunMode::Apply,
        };

        let err = engine(&mail).execute(&request, &db).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(mail.calls().is_empty());
    }
}
