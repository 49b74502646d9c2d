// ABOUTME: Renders LogRecords as single sink lines and parses them back
// ABOUTME: Line format: [<utc timestamp>] <level>: id=<id> message=<json string>

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use super::record::LogRecord;

/// Errors returned by [`parse_line`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineParseError {
    #[error("line does not start with a bracketed timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("missing ': id=' after the level")]
    MissingId,
    #[error("invalid level: {0}")]
    InvalidLevel(String),
    #[error("invalid id {0:?}")]
    InvalidId(String),
    #[error("missing ' message=' field")]
    MissingMessage,
    #[error("invalid message encoding: {0}")]
    InvalidMessage(String),
}

/// A sink line split back into its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub id: i64,
    pub message: String,
}

impl From<ParsedLine> for LogRecord {
    fn from(line: ParsedLine) -> Self {
        LogRecord {
            id: line.id,
            level: line.level,
            message: line.message,
            timestamp: line.timestamp,
        }
    }
}

/// Render a timestamp the way it appears in sink lines:
/// `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Render one record as a single line with no line terminator.
///
/// The message is always a JSON string literal, so embedded newlines, quotes
/// and control characters are escaped and the line stays self-delimiting. The
/// level is written bare when it is a plain token and JSON-quoted otherwise.
pub fn format_record(record: &LogRecord) -> String {
    format!(
        "[{}] {}: id={} message={}",
        format_timestamp(&record.timestamp),
        format_level(&record.level),
        record.id,
        json_string(&record.message)
    )
}

/// Inverse of [`format_record`].
pub fn parse_line(line: &str) -> Result<ParsedLine, LineParseError> {
    let rest = line
        .strip_prefix('[')
        .ok_or(LineParseError::MissingTimestamp)?;
    let (raw_ts, rest) = rest
        .split_once("] ")
        .ok_or(LineParseError::MissingTimestamp)?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|_| LineParseError::InvalidTimestamp(raw_ts.to_string()))?
        .with_timezone(&Utc);

    let (level, rest) = if rest.starts_with('"') {
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<String>();
        let level = match stream.next() {
            Some(Ok(level)) => level,
            Some(Err(e)) => return Err(LineParseError::InvalidLevel(e.to_string())),
            None => return Err(LineParseError::InvalidLevel("empty".to_string())),
        };
        (level, &rest[stream.byte_offset()..])
    } else {
        let end = rest.find(':').ok_or(LineParseError::MissingId)?;
        let level = &rest[..end];
        if !is_plain_level(level) {
            return Err(LineParseError::InvalidLevel(level.to_string()));
        }
        (level.to_string(), &rest[end..])
    };

    let rest = rest
        .strip_prefix(": id=")
        .ok_or(LineParseError::MissingId)?;
    let (raw_id, raw_message) = rest
        .split_once(' ')
        .ok_or(LineParseError::MissingMessage)?;
    let id = raw_id
        .parse::<i64>()
        .map_err(|_| LineParseError::InvalidId(raw_id.to_string()))?;

    let raw_message = raw_message
        .strip_prefix("message=")
        .ok_or(LineParseError::MissingMessage)?;
    let message: String = serde_json::from_str(raw_message)
        .map_err(|e| LineParseError::InvalidMessage(e.to_string()))?;

    Ok(ParsedLine {
        timestamp,
        level,
        id,
        message,
    })
}

fn format_level(level: &str) -> String {
    if is_plain_level(level) {
        level.to_string()
    } else {
        json_string(level)
    }
}

fn is_plain_level(level: &str) -> bool {
    !level.is_empty()
        && level
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// JSON string literal with every control character and Unicode line
/// separator written as `\uXXXX`.
///
/// serde_json only escapes U+0000..U+001F. DEL, the C1 range (NEL included)
/// and U+2028/U+2029 would otherwise land raw in the sink and can be read as
/// line boundaries downstream.
fn json_string(value: &str) -> String {
    // Serializing a str cannot fail.
    let encoded = serde_json::to_string(value).unwrap_or_default();
    if !encoded.chars().any(needs_unicode_escape) {
        return encoded;
    }

    let mut escaped = String::with_capacity(encoded.len() + 16);
    for c in encoded.chars() {
        if needs_unicode_escape(c) {
            escaped.push_str(&format!("\\u{:04x}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn needs_unicode_escape(c: char) -> bool {
    c.is_control() || matches!(c, '\u{2028}' | '\u{2029}')
}
