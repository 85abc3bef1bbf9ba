//! Oracle queries (WIDs) and their answers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::Result;

use super::binder::BoundText;
use super::stack::Stack;

/// MMI styles the oracle tags each query with
pub mod style {
    pub const OK_CANCEL1: u32 = 0x11041;
    pub const OK_CANCEL2: u32 = 0x11141;
    pub const OK1: u32 = 0x11040;
    pub const YES_NO1: u32 = 0x11044;
    pub const YES_NO_CANCEL1: u32 = 0x11043;
    pub const ABORT_RETRY1: u32 = 0x11042;
    pub const EDIT1: u32 = 0x12040;
    pub const EDIT2: u32 = 0x12140;

    /// Whether the query expects free text rather than a confirmation
    pub fn is_edit(style: u32) -> bool {
        matches!(style, EDIT1 | EDIT2)
    }

    pub fn is_yes_no(style: u32) -> bool {
        matches!(style, YES_NO1 | YES_NO_CANCEL1)
    }
}

/// One query raised by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidEvent {
    pub wid: u32,
    pub style: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub test_case: String,
}

impl WidEvent {
    pub fn new(wid: u32, style: u32, description: impl Into<String>) -> Self {
        Self {
            wid,
            style,
            description: description.into(),
            payload: None,
            test_case: String::new(),
        }
    }
}

/// Answer to a WID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Text(String),
    Confirm(bool),
}

impl Answer {
    /// Render in the form the oracle expects for the query's style
    pub fn render(&self, query_style: u32) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Confirm(ok) if style::is_yes_no(query_style) => {
                String::from(if *ok { "Yes" } else { "No" })
            }
            Self::Confirm(ok) => String::from(if *ok { "OK" } else { "Cancel" }),
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{:?}", text),
            Self::Confirm(ok) => write!(f, "{}", ok),
        }
    }
}

/// Profile-level last-resort WID handler
///
/// Handlers only read the stack; they may run while a command is in flight.
pub trait WidHandler: Send + Sync {
    fn handle(&self, event: &WidEvent, stack: &Stack) -> Result<Answer>;
}

impl<F> WidHandler for F
where
    F: Fn(&WidEvent, &Stack) -> Result<Answer> + Send + Sync,
{
    fn handle(&self, event: &WidEvent, stack: &Stack) -> Result<Answer> {
        self(event, stack)
    }
}

/// Per-scenario boolean answer for a verification query
#[derive(Debug, Clone)]
pub enum Verify {
    /// Always give this answer
    Fixed(bool),
    /// Confirm when the query text mentions every value (case-insensitive)
    DescriptionContains(Vec<BoundText>),
    /// Custom check
    Predicate(fn(&WidEvent, &Stack) -> bool),
}

impl Verify {
    pub fn check(&self, event: &WidEvent, stack: &Stack) -> Result<bool> {
        match self {
            Self::Fixed(answer) => Ok(*answer),
            Self::DescriptionContains(values) => {
                let description = event.description.to_uppercase();
                for value in values {
                    let expected = value.render(stack)?.to_uppercase();
                    if !description.contains(&expected) {
                        tracing::debug!(
                            wid = event.wid,
                            expected = %expected,
                            "Verification value missing from description"
                        );
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Predicate(check) => Ok(check(event, stack)),
        }
    }
}
