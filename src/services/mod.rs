//! Service layer for the watcher.
//!
//! This module contains:
//! - Portal login and session tracking (`SessionManager`)
//! - Record extraction heuristics (`Extractor` and its strategies)
//! - Recipient fan-out (`Dispatcher`, `NotificationSink`, `RecipientRegistry`)

mod extract;
mod notify;
mod session;

pub use extract::{
    CardStrategy, ExtractionStrategy, Extractor, JsonListStrategy, TabularStrategy,
    UNKNOWN_SENDER,
};
pub use notify::{
    DeliveryReport, Dispatcher, LogSink, NotificationSink, RecipientRegistry, WebhookSink,
};
pub use session::{AccountSummary, Session, SessionManager};
