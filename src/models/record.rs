//! Extracted message records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::content_hash;

/// Format used when a page carries no timestamp of its own.
pub const OBSERVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Content-derived identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Hash a sequence of text parts into an identity.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(content_hash(parts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message scraped from the inbox.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Record {
    pub sender: String,
    pub body: String,
    /// Timestamp as shown by the portal, or the observation time
    pub timestamp: String,
    pub observed_at: DateTime<Utc>,
    pub identity: RecordId,
    /// Name of the strategy that produced this record
    pub strategy: &'static str,
}

impl Record {
    /// Build a record, falling back to `observed_at` for a missing timestamp.
    pub fn new(
        sender: impl Into<String>,
        body: impl Into<String>,
        timestamp: Option<String>,
        observed_at: DateTime<Utc>,
        identity: RecordId,
        strategy: &'static str,
    ) -> Self {
        let timestamp = timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| observed_at.format(OBSERVED_AT_FORMAT).to_string());
        Self {
            sender: sender.into(),
            body: body.into(),
            timestamp,
            observed_at,
            identity,
            strategy,
        }
    }

    /// Format the record for a notification using a template.
    ///
    /// Supported placeholders:
    /// - `{sender}`, `{body}`, `{timestamp}`, `{id}`, `{strategy}`
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{sender}", &self.sender)
            .replace("{body}", &self.body)
            .replace("{timestamp}", &self.timestamp)
            .replace("{id}", self.identity.as_str())
            .replace("{strategy}", self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_observation() {
        let record = Record::new(
            "Bank",
            "Your code is 1234",
            Some("  ".into()),
            observed(),
            RecordId::from_parts(["Bank", "Your code is 1234"]),
            "tabular",
        );
        assert_eq!(record.timestamp, "2025-03-14 09:26:53");
    }

    #[test]
    fn test_format() {
        let record = Record::new(
            "Bank",
            "Your code is 1234",
            Some("10:00".into()),
            observed(),
            RecordId::from_parts(["x"]),
            "tabular",
        );
        assert_eq!(
            record.format("[{sender}] {body} @ {timestamp}"),
            "[Bank] Your code is 1234 @ 10:00"
        );
    }

    #[test]
    fn test_identity_depends_on_content_only() {
        assert_eq!(
            RecordId::from_parts(["a", "b"]),
            RecordId::from_parts(vec!["a".to_string(), "b".to_string()])
        );
        assert_ne!(RecordId::from_parts(["a", "b"]), RecordId::from_parts(["ab"]));
    }
}
