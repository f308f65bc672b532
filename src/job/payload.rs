//! Message payload ingestion.
//!
//! Payloads arrive as a literal text block or as an uploaded text document. Blocks are split
//! only on an explicit separator (`&` or the standalone word `and`, case-insensitive), never on
//! newlines, so multi-line art survives as a single message.

use super::spec::Message;
use regex::Regex;
use std::sync::LazyLock;

const SEPARATOR_PATTERN: &str = r"(?i)\s*(?:&|\band\b)\s*";

/// Characters that render like an ampersand and are treated as the separator.
const AMPERSAND_LOOKALIKES: [char; 5] = ['\u{FE60}', '\u{FF06}', '\u{214B}', '\u{A4F8}', '\u{FE54}'];

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SEPARATOR_PATTERN).expect("valid separator regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("document is not valid UTF-8")]
    InvalidEncoding,
    #[error("payload contains no messages")]
    Empty,
}

/// Splits a literal text block into messages.
pub fn parse_text(block: &str) -> Result<Vec<Message>, PayloadError> {
    let messages = split_block(block);
    if messages.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(messages)
}

/// Parses an uploaded document.
///
/// A document where every non-blank line is a JSON string is read as one message per line
/// (escaped `\n` allowed); anything else falls back to block splitting.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<Message>, PayloadError> {
    let content = std::str::from_utf8(bytes).map_err(|_| PayloadError::InvalidEncoding)?;
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);

    if let Some(messages) = parse_json_lines(content) {
        return Ok(messages);
    }

    parse_text(content)
}

fn parse_json_lines(content: &str) -> Option<Vec<Message>> {
    let mut messages = Vec::new();
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let text: String = serde_json::from_str(line).ok()?;
        if !text.trim().is_empty() {
            messages.push(Message::new(text));
        }
    }

    if messages.is_empty() {
        None
    } else {
        Some(messages)
    }
}

fn split_block(block: &str) -> Vec<Message> {
    let normalized: String = block
        .chars()
        .map(|c| {
            if AMPERSAND_LOOKALIKES.contains(&c) {
                '&'
            } else {
                c
            }
        })
        .collect();

    SEPARATOR_RE
        .split(&normalized)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Message::from)
        .collect()
}
