// ABOUTME: LogRecord and Watermark types shared by every stage of the tailer
// ABOUTME: Watermark is the highest timestamp already emitted to the sink

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use tokio_postgres::Row;

/// One row of the source log table.
///
/// Records are produced by the application writing into the log table and are
/// never modified by the tailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Build a record from a row shaped `(id, level, message, timestamp)`.
    ///
    /// `id` may be `integer` or `bigint`. Any other shape (missing column, NULL,
    /// unexpected type) is an error: a malformed row must stop the tailer
    /// rather than be skipped.
    pub fn from_row(row: &Row) -> Result<Self> {
        let id = match row.try_get::<_, i64>("id") {
            Ok(id) => id,
            Err(_) => row
                .try_get::<_, i32>("id")
                .map(i64::from)
                .context("Column 'id' is not an integer")?,
        };
        let level: String = row
            .try_get("level")
            .with_context(|| format!("Row {} has an invalid 'level' column", id))?;
        let message: String = row
            .try_get("message")
            .with_context(|| format!("Row {} has an invalid 'message' column", id))?;
        let timestamp: DateTime<Utc> = row
            .try_get("timestamp")
            .with_context(|| format!("Row {} has an invalid 'timestamp' column", id))?;

        Ok(Self {
            id,
            level,
            message,
            timestamp,
        })
    }
}

/// Highest record timestamp already durably written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Watermark used when no checkpoint exists: `1970-01-01T00:00:00Z`.
    pub const EPOCH: Watermark = Watermark(DateTime::<Utc>::UNIX_EPOCH);

    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Move forward to `at` if it is newer. Never moves backwards.
    ///
    /// Returns `true` if the watermark changed.
    pub fn advance(&mut self, at: DateTime<Utc>) -> bool {
        if at > self.0 {
            self.0 = at;
            true
        } else {
            false
        }
    }

    /// Whether a record at `at` lies strictly after this watermark.
    pub fn admits(&self, at: DateTime<Utc>) -> bool {
        at > self.0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // AutoSi keeps microseconds when present, so a save/load round trip is exact.
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl FromStr for Watermark {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            bail!("Watermark cannot be empty");
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(Self(parsed.with_timezone(&Utc)));
        }

        // Older checkpoint files carry no offset and are UTC.
        let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
            .with_context(|| format!("Invalid watermark timestamp: {:?}", value))?;
        Ok(Self(Utc.from_utc_datetime(&naive)))
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_epoch_display() {
        assert_eq!(Watermark::EPOCH.to_string(), "1970-01-01T00:00:00Z");
        assert_eq!(Watermark::default(), Watermark::EPOCH);
    }

    #[test]
    fn test_display_whole_seconds() {
        let w = Watermark::new(ts("2024-01-01T00:00:03Z"));
        assert_eq!(w.to_string(), "2024-01-01T00:00:03Z");
    }

    #[test]
    fn test_display_keeps_microseconds() {
        let w = Watermark::new(ts("2024-01-01T00:00:03.123456Z"));
        assert_eq!(w.to_string(), "2024-01-01T00:00:03.123456Z");
        assert_eq!(w.to_string().parse::<Watermark>().unwrap(), w);
    }

    #[test]
    fn test_parse_with_offset_normalizes_to_utc() {
        let w: Watermark = "2024-01-01T02:00:00+02:00".parse().unwrap();
        assert_eq!(w.to_string(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let w: Watermark = "2024-05-06T07:08:09.250000".parse().unwrap();
        assert_eq!(w, Watermark::new(ts("2024-05-06T07:08:09.25Z")));

        let w: Watermark = "2024-05-06 07:08:09".parse().unwrap();
        assert_eq!(w, Watermark::new(ts("2024-05-06T07:08:09Z")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Watermark>().is_err());
        assert!("   ".parse::<Watermark>().is_err());
        assert!("yesterday".parse::<Watermark>().is_err());
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut w = Watermark::new(ts("2024-01-01T00:00:02Z"));
        assert!(!w.advance(ts("2024-01-01T00:00:01Z")));
        assert!(!w.advance(ts("2024-01-01T00:00:02Z")));
        assert_eq!(w, Watermark::new(ts("2024-01-01T00:00:02Z")));

        assert!(w.advance(ts("2024-01-01T00:00:05Z")));
        assert_eq!(w, Watermark::new(ts("2024-01-01T00:00:05Z")));
    }

    #[test]
    fn test_admits_is_strict() {
        let at = ts("2024-01-01T00:00:02Z");
        let w = Watermark::new(at);
        assert!(!w.admits(at));
        assert!(w.admits(at + Duration::milliseconds(1)));
        assert!(!w.admits(at - Duration::milliseconds(1)));
    }
}
