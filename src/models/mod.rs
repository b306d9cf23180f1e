// src/models/mod.rs

//! Domain models for the watcher.

pub(crate) mod credentials;
mod config;
mod record;

// Re-export all public types
pub use config::{
    Config, CredentialsConfig, DeliveryConfig, ExtractionConfig, FormField, IDENTIFIER_ENV,
    PollerConfig, PortalConfig, SECRET_ENV, StrategyKind,
};
pub use credentials::Credentials;
pub use record::{OBSERVED_AT_FORMAT, Record, RecordId};
