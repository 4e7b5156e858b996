//! Rule engine
//!
//! Rules pair a predicate over conditions with a list of provider-side
//! actions. Rules are loaded and validated once per run, evaluated in
//! stored order against every pending message, and every matching rule's
//! actions are dispatched to the mail service.

pub mod actions;
pub mod conditions;
pub mod dispatcher;
pub mod engine;
pub mod journal;
pub mod store;

pub use actions::Action;
pub use conditions::{CaseSensitivity, Condition, ConditionField, ConditionOperator};
pub use dispatcher::{ActionDispatcher, ActionOutcome};
pub use engine::{
    RuleEngine, RuleMatch, RunEntry, RunMode, RunOptions, RunOutcome, RunReport, RunRequest,
    RunSummary,
};
pub use journal::{LogJournal, MemoryJournal, RunLog};
pub use store::RuleStore;

use crate::db::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Malformed rule definitions, detected before any remote call is made
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("rule {rule}: {message}")]
    InvalidRule { rule: usize, message: String },

    #[error("rule {rule} has no conditions")]
    NoConditions { rule: usize },

    #[error("rule {rule} has no actions")]
    NoActions { rule: usize },

    #[error("malformed rule document: {0}")]
    Document(#[from] serde_json::Error),
}

/// How a rule combines its condition results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    All, // every condition must hold
    Any, // at least one condition must hold
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::All => "All",
            Predicate::Any => "Any",
        }
    }

    /// Combine per-condition results in order
    pub fn combine<I>(&self, mut results: I) -> bool
    where
        I: Iterator<Item = bool>,
    {
        match self {
            Predicate::All => results.all(|matched| matched),
            Predicate::Any => results.any(|matched| matched),
        }
    }
}

impl FromStr for Predicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Predicate::All),
            "any" => Ok(Predicate::Any),
            _ => Err(format!("unknown predicate: {}", s)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated rule
///
/// Only obtainable through [`Rule::new`] or [`Rule::from_definition`], both of
/// which reject empty condition and action lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    predicate: Predicate,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
}

impl Rule {
    /// Build a rule, checking it is structurally complete
    pub fn new(
        predicate: Predicate,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Result<Self, ConfigError> {
        Self::checked(0, predicate, conditions, actions)
    }

    /// Single-condition rule on the sender address
    pub fn from_sender(sender: impl Into<String>, action: Action) -> Result<Self, ConfigError> {
        Self::new(
            Predicate::All,
            vec![Condition::new(ConditionField::From, ConditionOperator::Contains, sender)],
            vec![action],
        )
    }

    fn checked(
        index: usize,
        predicate: Predicate,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Result<Self, ConfigError> {
        if conditions.is_empty() {
            return Err(ConfigError::NoConditions { rule: index });
        }
        if actions.is_empty() {
            return Err(ConfigError::NoActions { rule: index });
        }

        Ok(Self {
            predicate,
            conditions,
            actions,
        })
    }

    /// Validate a stored definition; `index` is its position in the rule set
    pub fn from_definition(index: usize, def: RuleDefinition) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidRule { rule: index, message };

        let predicate = def.predicate.parse::<Predicate>().map_err(invalid)?;

        let conditions = def
            .conditions
            .into_iter()
            .map(|c| {
                Ok(Condition {
                    field: c.field.parse().map_err(invalid)?,
                    operator: c.operator.parse().map_err(invalid)?,
                    value: c.value,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let actions = def
            .actions
            .iter()
            .map(|a| a.parse::<Action>().map_err(invalid))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::checked(index, predicate, conditions, actions)
    }

    /// Storage form of this rule
    pub fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            predicate: self.predicate.as_str().to_string(),
            conditions: self
                .conditions
                .iter()
                .map(|c| ConditionDefinition {
                    field: c.field.as_str().to_string(),
                    operator: c.operator.as_str().to_string(),
                    value: c.value.clone(),
                })
                .collect(),
            actions: self.actions.iter().map(Action::to_string).collect(),
        }
    }

    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Test if this rule matches the given message
    pub fn matches(&self, message: &Message, case: CaseSensitivity) -> bool {
        self.predicate
            .combine(self.conditions.iter().map(|c| c.evaluate(message, case)))
    }
}

// ============================================================================
// Storage format
// ============================================================================

/// Rule document: `{"rules": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub rules: Vec<RuleDefinition>,
}

/// Rule as written in the rule document, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub predicate: String,
    pub conditions: Vec<ConditionDefinition>,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl RuleDocument {
    /// Validate every rule, failing on the first malformed one
    pub fn into_rules(self) -> Result<Vec<Rule>, ConfigError> {
        self.rules
            .into_iter()
            .enumerate()
            .map(|(index, def)| Rule::from_definition(index, def))
            .collect()
    }

    pub fn from_rules(rules: &[Rule]) -> Self {
        Self {
            rules: rules.iter().map(Rule::to_definition).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, subject: &str, body: &str) -> Message {
        Message {
            id: "m1".to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            is_read: false,
        }
    }

    fn subject_contains(value: &str) -> Condition {
        Condition::new(ConditionField::Subject, ConditionOperator::Contains, value)
    }

    #[test]
    fn test_all_requires_every_condition() {
        let msg = message("x@y.com", "Invoice for March", "Total due");
        let rule = Rule::new(
            Predicate::All,
            vec![
                subject_contains("Invoice"),
                Condition::new(ConditionField::Body, ConditionOperator::Contains, "due"),
            ],
            vec![Action::MarkAsRead],
        )
        .unwrap();
        assert!(rule.matches(&msg, CaseSensitivity::Sensitive));

        // flipping any single condition flips the match
        for flip in 0..rule.conditions().len() {
            let mut conditions = rule.conditions().to_vec();
            conditions[flip].operator = conditions[flip].operator.negated();
            let flipped = Rule::new(Predicate::All, conditions, vec![Action::MarkAsRead]).unwrap();
            assert!(!flipped.matches(&msg, CaseSensitivity::Sensitive));
        }
    }

    #[test]
    fn test_any_requires_one_condition() {
        let msg = message("x@y.com", "Weekly digest", "");
        let rule = Rule::new(
            Predicate::Any,
            vec![subject_contains("Invoice"), subject_contains("digest")],
            vec![Action::AddStar],
        )
        .unwrap();
        assert!(rule.matches(&msg, CaseSensitivity::Sensitive));

        let none = Rule::new(
            Predicate::Any,
            vec![subject_contains("Invoice"), subject_contains("Receipt")],
            vec![Action::AddStar],
        )
        .unwrap();
        assert!(!none.matches(&msg, CaseSensitivity::Sensitive));
    }

    #[test]
    fn test_predicate_combine() {
        assert!(Predicate::All.combine([true, true].into_iter()));
        assert!(!Predicate::All.combine([true, false].into_iter()));
        assert!(Predicate::Any.combine([false, true].into_iter()));
        assert!(!Predicate::Any.combine([false, false].into_iter()));
    }

    #[test]
    fn test_empty_rules_are_rejected() {
        let err = Rule::new(Predicate::All, vec![], vec![Action::MarkAsRead]).unwrap_err();
        assert!(matches!(err, ConfigError::NoConditions { rule: 0 }));

        let err = Rule::new(Predicate::Any, vec![subject_contains("x")], vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::NoActions { rule: 0 }));
    }

    #[test]
    fn test_from_definition_reports_rule_index() {
        let doc: RuleDocument = serde_json::from_str(
            r#"{"rules": [
                {"predicate": "Any", "conditions": [{"field": "subject", "operator": "contains", "value": "a"}], "actions": ["mark_as_read"]},
                {"predicate": "Any", "conditions": [{"field": "date", "operator": "contains", "value": "a"}], "actions": ["mark_as_read"]}
            ]}"#,
        )
        .unwrap();

        match doc.into_rules().unwrap_err() {
            ConfigError::InvalidRule { rule, message } => {
                assert_eq!(rule, 1);
                assert!(message.contains("date"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_operator_and_predicate() {
        let mut def = Rule::from_sender("a@b.com", Action::MarkAsRead).unwrap().to_definition();
        def.conditions[0].operator = "matches".to_string();
        assert!(matches!(
            Rule::from_definition(3, def.clone()),
            Err(ConfigError::InvalidRule { rule: 3, .. })
        ));

        def.conditions[0].operator = "contains".to_string();
        def.predicate = "Most".to_string();
        assert!(matches!(
            Rule::from_definition(0, def),
            Err(ConfigError::InvalidRule { rule: 0, .. })
        ));
    }

    #[test]
    fn test_from_sender_shape() {
        let rule = Rule::from_sender("news@shop.com", Action::move_to_label("Promotions")).unwrap();
        let def = rule.to_definition();

        assert_eq!(def.predicate, "All");
        assert_eq!(def.conditions[0].field, "from");
        assert_eq!(def.conditions[0].operator, "contains");
        assert_eq!(def.conditions[0].value, "news@shop.com");
        assert_eq!(def.actions, vec!["move_to_label:Promotions".to_string()]);
    }

    #[test]
    fn test_document_round_trip() {
        let rules = vec![
            Rule::new(
                Predicate::Any,
                vec![subject_contains("Test")],
                vec![Action::MarkAsRead],
            )
            .unwrap(),
            Rule::new(
                Predicate::All,
                vec![
                    Condition::new(ConditionField::From, ConditionOperator::NotEquals, "boss@work.com"),
                    Condition::new(ConditionField::Body, ConditionOperator::NotContains, "urgent"),
                ],
                vec![Action::move_to_label("Foo"), Action::AddStar, Action::MarkAsUnread],
            )
            .unwrap(),
        ];

        let json = serde_json::to_string_pretty(&RuleDocument::from_rules(&rules)).unwrap();
        let doc: RuleDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.into_rules().unwrap(), rules);
        assert!(json.contains(r#""move_to_label:Foo""#));
    }
}
