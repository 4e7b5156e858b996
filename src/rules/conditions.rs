//! Rule condition matching logic

use crate::db::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Condition tested against a single message attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: String,
}

/// Message attributes that can be tested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ConditionField {
    From,
    Subject,
    Body,
}

/// Comparison operators for conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ConditionOperator {
    Contains,
    Equals,
    NotContains,
    NotEquals,
}

/// How string comparisons treat letter case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    /// Raw comparison of both sides
    #[default]
    Sensitive,
    /// Both sides lower-cased before comparing, on every field
    Insensitive,
}

impl ConditionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionField::From => "from",
            ConditionField::Subject => "subject",
            ConditionField::Body => "body",
        }
    }

    /// Resolve this field on a message
    pub fn resolve<'a>(&self, message: &'a Message) -> &'a str {
        match self {
            ConditionField::From => &message.sender,
            ConditionField::Subject => &message.subject,
            ConditionField::Body => &message.body,
        }
    }
}

impl FromStr for ConditionField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "from" | "sender" => Ok(ConditionField::From),
            "subject" => Ok(ConditionField::Subject),
            // older rule files call the body "message"
            "body" | "message" => Ok(ConditionField::Body),
            _ => Err(format!("unknown condition field: {}", s)),
        }
    }
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Contains => "contains",
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotContains => "does_not_contain",
            ConditionOperator::NotEquals => "does_not_equal",
        }
    }

    /// The operator whose result is always the logical complement of this one
    pub fn negated(&self) -> Self {
        match self {
            ConditionOperator::Contains => ConditionOperator::NotContains,
            ConditionOperator::NotContains => ConditionOperator::Contains,
            ConditionOperator::Equals => ConditionOperator::NotEquals,
            ConditionOperator::NotEquals => ConditionOperator::Equals,
        }
    }
}

impl FromStr for ConditionOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contains" => Ok(ConditionOperator::Contains),
            "equals" => Ok(ConditionOperator::Equals),
            "does_not_contain" | "not_contains" => Ok(ConditionOperator::NotContains),
            "does_not_equal" | "not_equals" => Ok(ConditionOperator::NotEquals),
            _ => Err(format!("unknown condition operator: {}", s)),
        }
    }
}

impl fmt::Display for ConditionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.field, self.operator, self.value)
    }
}

impl From<ConditionField> for String {
    fn from(field: ConditionField) -> Self {
        field.as_str().to_string()
    }
}

impl TryFrom<String> for ConditionField {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConditionOperator> for String {
    fn from(operator: ConditionOperator) -> Self {
        operator.as_str().to_string()
    }
}

impl TryFrom<String> for ConditionOperator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Condition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    /// Test if this condition matches the given message
    pub fn evaluate(&self, message: &Message, case: CaseSensitivity) -> bool {
        let field_value = self.field.resolve(message);

        match case {
            CaseSensitivity::Sensitive => compare(self.operator, field_value, &self.value),
            CaseSensitivity::Insensitive => compare(
                self.operator,
                &field_value.to_lowercase(),
                &self.value.to_lowercase(),
            ),
        }
    }
}

fn compare(operator: ConditionOperator, field_value: &str, value: &str) -> bool {
    match operator {
        ConditionOperator::Contains => field_value.contains(value),
        ConditionOperator::Equals => field_value == value,
        ConditionOperator::NotContains => !field_value.contains(value),
        ConditionOperator::NotEquals => field_value != value,
    }
}
