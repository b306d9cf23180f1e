// src/services/extract.rs

//! Record extraction from inbox pages.
//!
//! The inbox markup is not a stable contract, so several heuristics live
//! side by side. An [`Extractor`] tries its strategies in order and keeps
//! the first non-empty result. Adding a strategy for a new page shape does
//! not touch the polling loop.

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::error::{ExtractionError, Result};
use crate::models::{ExtractionConfig, Record, RecordId, StrategyKind};
use crate::utils::{char_prefix, http, normalize_whitespace, truncate_graphemes};

/// Sender used when a page does not name one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// One way of turning a page body into records.
///
/// Implementations must be deterministic and side-effect free, and must
/// derive identities from extracted text only.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name recorded on every record this strategy produces.
    fn name(&self) -> &'static str;

    /// Extract candidate records; unexpected markup yields `Ok(vec![])`.
    fn extract(
        &self,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<Record>, ExtractionError>;
}

/// Rows with at least three cells: sender, body, timestamp.
pub struct TabularStrategy {
    rows: Selector,
}

impl TabularStrategy {
    pub const NAME: &'static str = "tabular";
    const MIN_CELLS: usize = 3;

    pub fn new() -> Result<Self> {
        Ok(Self {
            rows: http::parse_selector("tr")?,
        })
    }

    fn cells(row: ElementRef<'_>) -> Vec<String> {
        row.children()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "td")
            .map(|cell| normalize_whitespace(&cell.text().collect::<String>()))
            .collect()
    }
}

impl ExtractionStrategy for TabularStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn extract(
        &self,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<Record>, ExtractionError> {
        let document = Html::parse_document(body);
        let records = document
            .select(&self.rows)
            .map(Self::cells)
            .filter(|cells| cells.len() >= Self::MIN_CELLS)
            .map(|cells| {
                let identity = RecordId::from_parts(&cells);
                let sender = non_empty_or_unknown(&cells[0]);
                Record::new(
                    sender,
                    cells[1].clone(),
                    Some(cells[2].clone()),
                    observed_at,
                    identity,
                    Self::NAME,
                )
            })
            .collect();
        Ok(records)
    }
}

/// Free-form message blocks, used when the inbox is not a table.
pub struct CardStrategy {
    cards: Selector,
    sender_pattern: Regex,
    min_text_len: usize,
    identity_prefix_len: usize,
    body_max_len: usize,
}

impl CardStrategy {
    pub const NAME: &'static str = "card";

    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            cards: http::parse_selector(&config.card_selector)?,
            sender_pattern: Regex::new(&config.sender_pattern)?,
            min_text_len: config.min_card_text_len,
            identity_prefix_len: config.card_identity_prefix_len,
            body_max_len: config.card_body_max_len,
        })
    }

    /// Length of the rendered text: stripped text nodes, no separators.
    fn rendered_len(card: ElementRef<'_>) -> usize {
        card.text().map(|node| node.trim().chars().count()).sum()
    }

    fn is_message(&self, card: ElementRef<'_>) -> bool {
        Self::rendered_len(card) > self.min_text_len
    }

    /// A card wrapping another message-sized card is a container. Short
    /// nested matches (badges, meta lines) leave the wrapper a message.
    fn is_container(&self, card: ElementRef<'_>) -> bool {
        card.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|el| self.cards.matches(&el) && self.is_message(el))
    }

    /// Text nodes trimmed and joined line by line.
    fn card_text(card: ElementRef<'_>) -> String {
        card.text()
            .map(normalize_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn sender(&self, text: &str) -> String {
        self.sender_pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
    }
}

impl ExtractionStrategy for CardStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn extract(
        &self,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<Record>, ExtractionError> {
        let document = Html::parse_document(body);
        let records = document
            .select(&self.cards)
            .filter(|card| self.is_message(*card) && !self.is_container(*card))
            .map(Self::card_text)
            .map(|text| {
                let identity = RecordId::from_parts([char_prefix(&text, self.identity_prefix_len)]);
                Record::new(
                    self.sender(&text),
                    truncate_graphemes(&text, self.body_max_len),
                    None,
                    observed_at,
                    identity,
                    Self::NAME,
                )
            })
            .collect();
        Ok(records)
    }
}

/// JSON array of message objects, as served by the portal's XHR endpoints.
#[derive(Debug, Default)]
pub struct JsonListStrategy;

impl JsonListStrategy {
    pub const NAME: &'static str = "json";

    fn field(item: &Value, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match item.get(*key)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }
}

impl ExtractionStrategy for JsonListStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn extract(
        &self,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<Record>, ExtractionError> {
        let trimmed = body.trim_start();
        if !trimmed.starts_with('[') {
            return Ok(Vec::new());
        }
        let items: Vec<Value> = serde_json::from_str(trimmed)
            .map_err(|e| ExtractionError::new(Self::NAME, e))?;

        let records = items
            .iter()
            .filter(|item| item.is_object())
            .filter_map(|item| {
                let sender = Self::field(item, &["sender", "from"]).unwrap_or_default();
                let text = Self::field(item, &["message", "text"])?;
                let time = Self::field(item, &["created_at", "time"]);
                let identity = RecordId::from_parts([
                    sender.as_str(),
                    text.as_str(),
                    time.as_deref().unwrap_or(""),
                ]);
                Some(Record::new(
                    non_empty_or_unknown(&sender),
                    text,
                    time,
                    observed_at,
                    identity,
                    Self::NAME,
                ))
            })
            .collect();
        Ok(records)
    }
}

fn non_empty_or_unknown(sender: &str) -> String {
    if sender.is_empty() {
        UNKNOWN_SENDER.to_string()
    } else {
        sender.to_string()
    }
}

/// Ordered list of strategies; the first non-empty result wins.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Build the strategies named in the config, in config order.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let strategies = config
            .strategies
            .iter()
            .map(|kind| -> Result<Box<dyn ExtractionStrategy>> {
                Ok(match kind {
                    StrategyKind::Json => Box::new(JsonListStrategy),
                    StrategyKind::Tabular => Box::new(TabularStrategy::new()?),
                    StrategyKind::Card => Box::new(CardStrategy::new(config)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(strategies))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the strategies in order. Never fails: a strategy error counts as
    /// zero records and the next strategy gets its turn.
    pub fn extract(&self, body: &str, observed_at: DateTime<Utc>) -> Vec<Record> {
        for strategy in &self.strategies {
            match strategy.extract(body, observed_at) {
                Ok(records) if !records.is_empty() => {
                    log::debug!(
                        "Strategy '{}' extracted {} records",
                        strategy.name(),
                        records.len()
                    );
                    return records;
                }
                Ok(_) => {}
                Err(error) => log::warn!("{error}"),
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    fn default_extractor() -> Extractor {
        Extractor::from_config(&ExtractionConfig::default()).unwrap()
    }

    const INBOX_TABLE: &str = r#"
        <table>
          <tr><th>Number</th><th>Message</th><th>Time</th></tr>
          <tr><td>+4915100001</td><td>Code 1111</td><td>2025-03-14 09:00</td></tr>
          <tr><td>+4915100002</td><td>Code 2222</td><td>2025-03-14 09:05</td></tr>
          <tr><td>+4915100003</td><td>Code 3333</td><td>2025-03-14 09:10</td></tr>
          <tr><td colspan="3">Showing 3 of 3</td></tr>
        </table>"#;

    #[test]
    fn test_tabular_three_rows() {
        let records = TabularStrategy::new()
            .unwrap()
            .extract(INBOX_TABLE, observed())
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sender, "+4915100001");
        assert_eq!(records[0].body, "Code 1111");
        assert_eq!(records[0].timestamp, "2025-03-14 09:00");
        assert_eq!(records[2].sender, "+4915100003");
        assert_eq!(records[2].body, "Code 3333");
        assert_eq!(records[1].strategy, "tabular");
    }

    #[test]
    fn test_tabular_identity_stable_and_content_sensitive() {
        let strategy = TabularStrategy::new().unwrap();
        let first = strategy.extract(INBOX_TABLE, observed()).unwrap();
        let again = strategy
            .extract(INBOX_TABLE, observed() + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(first[0].identity, again[0].identity);

        let edited = INBOX_TABLE.replace("Code 1111", "Code 1112");
        let changed = strategy.extract(&edited, observed()).unwrap();
        assert_ne!(first[0].identity, changed[0].identity);
        assert_eq!(first[1].identity, changed[1].identity);
    }

    #[test]
    fn test_tabular_empty_timestamp_uses_observation_time() {
        let html = "<table><tr><td>Bank</td><td>Hello</td><td> </td></tr></table>";
        let records = TabularStrategy::new().unwrap().extract(html, observed()).unwrap();
        assert_eq!(records[0].timestamp, "2025-03-14 09:26:53");
    }

    #[test]
    fn test_tabular_ignores_nested_table_cells() {
        let html = r#"
            <table><tr><td>
              <table><tr><td>a</td><td>b</td><td>c</td></tr></table>
            </td></tr></table>"#;
        let records = TabularStrategy::new().unwrap().extract(html, observed()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender, "a");
    }

    #[test]
    fn test_card_sender_and_threshold() {
        let html = r#"
            <div class="sms-list">
              <div class="sms-item">From: +4915100009
                <p>Your verification code is 4242</p></div>
              <div class="message">tiny</div>
              <div class="card-body">Sender: ACME Bank
                <span>Login from a new device</span></div>
              <div class="card"><span>No sender line, but long enough</span></div>
            </div>"#;
        let strategy = CardStrategy::new(&ExtractionConfig::default()).unwrap();
        let records = strategy.extract(html, observed()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sender, "+4915100009");
        assert!(records[0].body.contains("4242"));
        assert_eq!(records[1].sender, "ACME Bank");
        assert_eq!(records[2].sender, UNKNOWN_SENDER);
        assert_eq!(records[2].timestamp, "2025-03-14 09:26:53");
    }

    #[test]
    fn test_card_skips_message_containers() {
        let html = r#"
            <div class="card">
              <div class="card-body">From: Alice
                <p>First message body text</p></div>
              <div class="card-body">From: Bob
                <p>Second message body text</p></div>
            </div>"#;
        let strategy = CardStrategy::new(&ExtractionConfig::default()).unwrap();
        let records = strategy.extract(html, observed()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sender, "Alice");
        assert_eq!(records[1].sender, "Bob");
    }

    #[test]
    fn test_card_with_short_nested_match_is_kept() {
        let html = r#"<div class="message"><div class="message-meta">From: X</div><p>Your verification code is 987654</p></div>"#;
        let strategy = CardStrategy::new(&ExtractionConfig::default()).unwrap();
        let records = strategy.extract(html, observed()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender, "X");
        assert!(records[0].body.contains("987654"));
    }

    #[test]
    fn test_card_length_ignores_node_separators() {
        let strategy = CardStrategy::new(&ExtractionConfig::default()).unwrap();
        let ten = r#"<div class="card"><span>abcde</span><span>fghij</span></div>"#;
        assert!(strategy.extract(ten, observed()).unwrap().is_empty());

        let eleven = r#"<div class="card"><span>abcde</span><span>fghijk</span></div>"#;
        assert_eq!(strategy.extract(eleven, observed()).unwrap().len(), 1);
    }

    #[test]
    fn test_card_identity_uses_bounded_prefix() {
        let config = ExtractionConfig {
            card_identity_prefix_len: 20,
            ..ExtractionConfig::default()
        };
        let strategy = CardStrategy::new(&config).unwrap();
        let a = r#"<div class="card">From: Alice, message body here. Views: 10</div>"#;
        let b = r#"<div class="card">From: Alice, message body here. Views: 11</div>"#;
        let ra = strategy.extract(a, observed()).unwrap();
        let rb = strategy.extract(b, observed()).unwrap();
        assert_eq!(ra[0].identity, rb[0].identity);
    }

    #[test]
    fn test_card_body_truncated() {
        let config = ExtractionConfig {
            card_body_max_len: 12,
            ..ExtractionConfig::default()
        };
        let strategy = CardStrategy::new(&config).unwrap();
        let html = r#"<div class="card">abcdefghijklmnopqrstuvwxyz</div>"#;
        let records = strategy.extract(html, observed()).unwrap();
        assert_eq!(records[0].body, "abcdefghijkl...");
    }

    #[test]
    fn test_json_list() {
        let body = r#"[
            {"id": 7, "sender": "+4915100001", "message": "Code 1111", "created_at": "09:00"},
            {"from": "Bank", "text": "Code 2222"},
            {"sender": "nobody"},
            "stray"
        ]"#;
        let records = JsonListStrategy.extract(body, observed()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sender, "+4915100001");
        assert_eq!(records[0].timestamp, "09:00");
        assert_eq!(records[1].sender, "Bank");
        assert_eq!(records[1].timestamp, "2025-03-14 09:26:53");
    }

    #[test]
    fn test_json_ignores_html_and_reports_broken_json() {
        assert!(JsonListStrategy.extract(INBOX_TABLE, observed()).unwrap().is_empty());
        assert!(JsonListStrategy.extract("[{\"message\":", observed()).is_err());
    }

    #[test]
    fn test_extractor_prefers_tabular_over_card() {
        let html = format!(r#"<div class="card">From: Someone, a long card text</div>{INBOX_TABLE}"#);
        let records = default_extractor().extract(&html, observed());
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.strategy == "tabular"));
    }

    #[test]
    fn test_extractor_falls_back_to_card() {
        let html = r#"<div class="card">From: Someone
            <p>a long enough card text</p></div>"#;
        let records = default_extractor().extract(html, observed());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].strategy, "card");
    }

    #[test]
    fn test_extractor_swallows_errors() {
        let records = default_extractor().extract("[{\"message\":", observed());
        assert!(records.is_empty());
    }

    #[test]
    fn test_extractor_empty_page() {
        assert!(default_extractor().extract("", observed()).is_empty());
        assert!(default_extractor()
            .extract("<html><body><p>No messages</p></body></html>", observed())
            .is_empty());
    }

    #[test]
    fn test_strategy_order_follows_config() {
        let config = ExtractionConfig {
            strategies: vec![StrategyKind::Card, StrategyKind::Tabular],
            ..ExtractionConfig::default()
        };
        let extractor = Extractor::from_config(&config).unwrap();
        assert_eq!(extractor.strategy_names(), vec!["card", "tabular"]);
    }
}
