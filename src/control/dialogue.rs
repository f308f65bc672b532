//! The step-by-step configuration dialogue, one state machine per operator.

use super::context::Account;
use crate::job::Message;
use crate::session::TargetSummary;

/// Where an operator currently is in the dialogue. Each variant carries only what the
/// following steps need.
#[derive(Debug, Clone, Default)]
pub enum DialogueState {
    #[default]
    Idle,
    AwaitingUsername,
    AwaitingPassword {
        username: String,
    },
    AwaitingToken {
        label: String,
    },
    AwaitingTargets {
        account: Account,
        candidates: Vec<TargetSummary>,
    },
    AwaitingPayload {
        account: Account,
        targets: Vec<TargetSummary>,
    },
    AwaitingCount {
        account: Account,
        targets: Vec<TargetSummary>,
        messages: Vec<Message>,
    },
}

impl DialogueState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DialogueState::Idle)
    }

    /// Short name for logs and `/cancel` replies.
    pub fn step(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::AwaitingUsername => "username",
            DialogueState::AwaitingPassword { .. } => "password",
            DialogueState::AwaitingToken { .. } => "token",
            DialogueState::AwaitingTargets { .. } => "targets",
            DialogueState::AwaitingPayload { .. } => "payload",
            DialogueState::AwaitingCount { .. } => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("invalid selection `{0}`; use numbers like 1,3,5 or 1-3 or all")]
    Malformed(String),
    #[error("selection matched no listed target")]
    Empty,
}

/// Parses a 1-based selection (`1,3,5`, `1-3`, a mix of both, or `all`) into 0-based indices
/// below `len`. Out-of-range numbers are dropped; order and repeats are kept.
pub fn parse_selection(input: &str, len: usize) -> Result<Vec<usize>, SelectionError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.eq_ignore_ascii_case("all") {
        return if len == 0 {
            Err(SelectionError::Empty)
        } else {
            Ok((0..len).collect())
        };
    }

    let malformed = || SelectionError::Malformed(input.trim().to_string());
    let mut selected = Vec::new();

    for part in compact.split(',').filter(|part| !part.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (
                start.parse::<usize>().map_err(|_| malformed())?,
                end.parse::<usize>().map_err(|_| malformed())?,
            ),
            None => {
                let value = part.parse::<usize>().map_err(|_| malformed())?;
                (value, value)
            }
        };

        let (low, high) = (start.max(1), end.min(len));
        if low <= high {
            selected.extend((low..=high).map(|position| position - 1));
        }
    }

    if selected.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(selected)
}
