//! Actions to perform on matched messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of the only parameterized action form
const MOVE_TO_LABEL_PREFIX: &str = "move_to_label:";

/// Action to perform when a rule matches
///
/// Stored as a plain string: `mark_as_read`, `mark_as_unread`, `add_star`
/// or `move_to_label:<name>`. Parsing happens once when rules are loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Action {
    /// Remove the unread marker
    MarkAsRead,
    /// Add the unread marker
    MarkAsUnread,
    /// Add the starred marker
    AddStar,
    /// Attach the provider label with this name
    MoveToLabel(String),
}

impl Action {
    /// Create a move to label action
    pub fn move_to_label(label: impl Into<String>) -> Self {
        Action::MoveToLabel(label.into())
    }

    /// Short tag without the label parameter, used in log lines and summaries
    pub fn tag(&self) -> &'static str {
        match self {
            Action::MarkAsRead => "mark_as_read",
            Action::MarkAsUnread => "mark_as_unread",
            Action::AddStar => "add_star",
            Action::MoveToLabel(_) => "move_to_label",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MoveToLabel(label) => write!(f, "{}{}", MOVE_TO_LABEL_PREFIX, label),
            other => f.write_str(other.tag()),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Label names are case-sensitive on the provider, so only the tag is normalized
        if let Some((tag, label)) = s.split_once(':') {
            if tag.trim().eq_ignore_ascii_case("move_to_label") {
                if label.is_empty() {
                    return Err(format!("missing label name in action: {}", s));
                }
                return Ok(Action::MoveToLabel(label.to_string()));
            }
            return Err(format!("unknown action: {}", s));
        }

        match s.trim().to_lowercase().as_str() {
            "mark_as_read" => Ok(Action::MarkAsRead),
            "mark_as_unread" => Ok(Action::MarkAsUnread),
            "add_star" => Ok(Action::AddStar),
            "move_to_label" => Err(format!("missing label name in action: {}", s)),
            _ => Err(format!("unknown action: {}", s)),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
