//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Credentials;

/// Environment variable that overrides `credentials.identifier`.
pub const IDENTIFIER_ENV: &str = "PORTALWATCH_IDENTIFIER";
/// Environment variable that overrides `credentials.secret`.
pub const SECRET_ENV: &str = "PORTALWATCH_SECRET";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Portal endpoints, markers and HTTP client settings
    #[serde(default)]
    pub portal: PortalConfig,

    /// Login identifier and secret
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Schedule, dedup capacity and backoff settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Record extraction heuristics
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Recipient fan-out settings
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Resolve credentials, preferring the environment over the file.
    pub fn credentials(&self) -> Result<Credentials> {
        let identifier = std::env::var(IDENTIFIER_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.credentials.identifier.clone());
        let secret = std::env::var(SECRET_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.credentials.secret.clone());

        if identifier.trim().is_empty() {
            return Err(AppError::config(format!(
                "credentials.identifier is empty (set it or {IDENTIFIER_ENV})"
            )));
        }
        if secret.is_empty() {
            return Err(AppError::config(format!(
                "credentials.secret is empty (set it or {SECRET_ENV})"
            )));
        }
        Ok(Credentials::new(identifier.trim(), secret))
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.portal.base_url.trim().is_empty() {
            return Err(AppError::validation("portal.base_url is empty"));
        }
        self.portal.login_url()?;
        self.portal.inbox_url()?;
        self.portal.dashboard_url()?;
        if self.portal.user_agent.trim().is_empty() {
            return Err(AppError::validation("portal.user_agent is empty"));
        }
        if self.portal.token_field.trim().is_empty() {
            return Err(AppError::validation("portal.token_field is empty"));
        }
        if self.portal.timeout_secs == 0 {
            return Err(AppError::validation("portal.timeout_secs must be > 0"));
        }
        if self.portal.authenticated_path_markers.is_empty()
            && self.portal.authenticated_body_markers.is_empty()
        {
            return Err(AppError::validation(
                "portal needs at least one authenticated path or body marker",
            ));
        }

        let poller = &self.poller;
        if poller.interval_min_secs > poller.interval_max_secs {
            return Err(AppError::validation(
                "poller.interval_min_secs must be <= poller.interval_max_secs",
            ));
        }
        if poller.dedup_capacity == 0 {
            return Err(AppError::validation("poller.dedup_capacity must be > 0"));
        }
        if poller.auth_failure_ceiling == 0 {
            return Err(AppError::validation(
                "poller.auth_failure_ceiling must be > 0",
            ));
        }

        if self.extraction.strategies.is_empty() {
            return Err(AppError::validation("extraction.strategies is empty"));
        }
        if self.extraction.card_identity_prefix_len == 0 {
            return Err(AppError::validation(
                "extraction.card_identity_prefix_len must be > 0",
            ));
        }

        if self.delivery.max_concurrent == 0 {
            return Err(AppError::validation("delivery.max_concurrent must be > 0"));
        }
        if self.delivery.send_timeout_secs == 0 {
            return Err(AppError::validation(
                "delivery.send_timeout_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// Portal endpoints and the markers used to read its responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Origin of the portal, e.g. `https://portal.example.com`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the HTML login form
    #[serde(default = "defaults::login_path")]
    pub login_path: String,

    /// Path of the inbox page that lists received messages
    #[serde(default = "defaults::inbox_path")]
    pub inbox_path: String,

    /// Path of the landing page after login
    #[serde(default = "defaults::dashboard_path")]
    pub dashboard_path: String,

    /// JSON endpoints probed before the inbox page
    #[serde(default)]
    pub api_paths: Vec<String>,

    /// Name of the hidden anti-forgery input on the login form
    #[serde(default = "defaults::token_field")]
    pub token_field: String,

    /// Form field that carries the identifier
    #[serde(default = "defaults::identifier_field")]
    pub identifier_field: String,

    /// Form field that carries the secret
    #[serde(default = "defaults::secret_field")]
    pub secret_field: String,

    /// Extra static fields submitted with the login form
    #[serde(default = "defaults::extra_login_fields")]
    pub extra_login_fields: Vec<FormField>,

    /// Path fragments that mean the login landed in the authenticated area
    #[serde(default = "defaults::authenticated_path_markers")]
    pub authenticated_path_markers: Vec<String>,

    /// Body fragments that mean the login landed in the authenticated area
    #[serde(default)]
    pub authenticated_body_markers: Vec<String>,

    /// Body fragments that mean a page is the login form, not the inbox.
    ///
    /// Landing on the login path is the primary expiry signal; these are
    /// checked in addition. A fragment that also appears on authenticated
    /// pages (a password field in a settings modal, say) turns every fetch
    /// into an expired session and a re-login loop, so pick one unique to
    /// the login form. Empty by default.
    #[serde(default)]
    pub unauthenticated_markers: Vec<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header for HTTP requests
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl PortalConfig {
    fn url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?.join(path)?)
    }

    pub fn login_url(&self) -> Result<Url> {
        self.url(&self.login_path)
    }

    pub fn inbox_url(&self) -> Result<Url> {
        self.url(&self.inbox_path)
    }

    pub fn dashboard_url(&self) -> Result<Url> {
        self.url(&self.dashboard_path)
    }

    pub fn api_urls(&self) -> Result<Vec<Url>> {
        self.api_paths.iter().map(|p| self.url(p)).collect()
    }

    /// Scheme, host and port of the portal, as sent in the `Origin` header.
    pub fn origin(&self) -> Result<String> {
        Ok(Url::parse(&self.base_url)?.origin().ascii_serialization())
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            login_path: defaults::login_path(),
            inbox_path: defaults::inbox_path(),
            dashboard_path: defaults::dashboard_path(),
            api_paths: Vec::new(),
            token_field: defaults::token_field(),
            identifier_field: defaults::identifier_field(),
            secret_field: defaults::secret_field(),
            extra_login_fields: defaults::extra_login_fields(),
            authenticated_path_markers: defaults::authenticated_path_markers(),
            authenticated_body_markers: Vec::new(),
            unauthenticated_markers: Vec::new(),
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// A static name/value pair posted with the login form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

/// Credentials as written in the config file.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub secret: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("identifier", &crate::models::credentials::mask(&self.identifier))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Polling schedule and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Lower bound of the jittered delay between clean cycles
    #[serde(default = "defaults::interval_min")]
    pub interval_min_secs: u64,

    /// Upper bound of the jittered delay between clean cycles
    #[serde(default = "defaults::interval_max")]
    pub interval_max_secs: u64,

    /// Maximum number of remembered record identities
    #[serde(default = "defaults::dedup_capacity")]
    pub dedup_capacity: usize,

    /// Consecutive auth failures before the long cooldown
    #[serde(default = "defaults::auth_failure_ceiling")]
    pub auth_failure_ceiling: u32,

    /// Delay after an auth failure below the ceiling
    #[serde(default = "defaults::auth_retry_delay")]
    pub auth_retry_delay_secs: u64,

    /// Delay once the auth failure ceiling is reached
    #[serde(default = "defaults::auth_cooldown")]
    pub auth_cooldown_secs: u64,

    /// Delay after a network failure
    #[serde(default = "defaults::transient_retry_delay")]
    pub transient_retry_delay_secs: u64,

    /// Delay before the first cycle
    #[serde(default = "defaults::startup_delay")]
    pub startup_delay_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_min_secs: defaults::interval_min(),
            interval_max_secs: defaults::interval_max(),
            dedup_capacity: defaults::dedup_capacity(),
            auth_failure_ceiling: defaults::auth_failure_ceiling(),
            auth_retry_delay_secs: defaults::auth_retry_delay(),
            auth_cooldown_secs: defaults::auth_cooldown(),
            transient_retry_delay_secs: defaults::transient_retry_delay(),
            startup_delay_secs: defaults::startup_delay(),
        }
    }
}

/// Names of the available extraction strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Json,
    Tabular,
    Card,
}

/// Record extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Strategies to try, in order; the first non-empty result wins
    #[serde(default = "defaults::strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Selector for card-like message blocks
    #[serde(default = "defaults::card_selector")]
    pub card_selector: String,

    /// Cards with this many characters or fewer are ignored
    #[serde(default = "defaults::min_card_text_len")]
    pub min_card_text_len: usize,

    /// Number of leading characters hashed into a card identity
    #[serde(default = "defaults::card_identity_prefix_len")]
    pub card_identity_prefix_len: usize,

    /// Card bodies longer than this are truncated
    #[serde(default = "defaults::card_body_max_len")]
    pub card_body_max_len: usize,

    /// Pattern whose first group is the sender inside a card
    #[serde(default = "defaults::sender_pattern")]
    pub sender_pattern: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategies: defaults::strategies(),
            card_selector: defaults::card_selector(),
            min_card_text_len: defaults::min_card_text_len(),
            card_identity_prefix_len: defaults::card_identity_prefix_len(),
            card_body_max_len: defaults::card_body_max_len(),
            sender_pattern: defaults::sender_pattern(),
        }
    }
}

/// Recipient fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Initial recipient identifiers
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Stagger between sends to the same transport, in milliseconds
    #[serde(default = "defaults::send_delay")]
    pub send_delay_ms: u64,

    /// Per-recipient send timeout in seconds
    #[serde(default = "defaults::send_timeout")]
    pub send_timeout_secs: u64,

    /// Maximum sends in flight at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Notification text template (see `Record::format`)
    #[serde(default = "defaults::message_template")]
    pub message_template: String,

    /// When set, records are POSTed here instead of only being logged
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            send_delay_ms: defaults::send_delay(),
            send_timeout_secs: defaults::send_timeout(),
            max_concurrent: defaults::max_concurrent(),
            message_template: defaults::message_template(),
            webhook_url: None,
        }
    }
}

mod defaults {
    use super::{FormField, StrategyKind};

    // Portal defaults
    pub fn base_url() -> String {
        "https://www.ivasms.com".into()
    }
    pub fn login_path() -> String {
        "/login".into()
    }
    pub fn inbox_path() -> String {
        "/portal/sms/received".into()
    }
    pub fn dashboard_path() -> String {
        "/portal".into()
    }
    pub fn token_field() -> String {
        "_token".into()
    }
    pub fn identifier_field() -> String {
        "email".into()
    }
    pub fn secret_field() -> String {
        "password".into()
    }
    pub fn extra_login_fields() -> Vec<FormField> {
        vec![FormField {
            name: "remember".into(),
            value: "on".into(),
        }]
    }
    pub fn authenticated_path_markers() -> Vec<String> {
        vec!["dashboard".into(), "portal".into()]
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            .into()
    }
    pub fn accept_language() -> String {
        "en-US,en;q=0.5".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Poller defaults
    pub fn interval_min() -> u64 {
        30
    }
    pub fn interval_max() -> u64 {
        90
    }
    pub fn dedup_capacity() -> usize {
        1000
    }
    pub fn auth_failure_ceiling() -> u32 {
        5
    }
    pub fn auth_retry_delay() -> u64 {
        30
    }
    pub fn auth_cooldown() -> u64 {
        600
    }
    pub fn transient_retry_delay() -> u64 {
        60
    }
    pub fn startup_delay() -> u64 {
        10
    }

    // Extraction defaults
    pub fn strategies() -> Vec<StrategyKind> {
        vec![StrategyKind::Json, StrategyKind::Tabular, StrategyKind::Card]
    }
    pub fn card_selector() -> String {
        r#"div[class*="card"], div[class*="sms-item"], div[class*="message"]"#.into()
    }
    pub fn min_card_text_len() -> usize {
        10
    }
    pub fn card_identity_prefix_len() -> usize {
        100
    }
    pub fn card_body_max_len() -> usize {
        200
    }
    pub fn sender_pattern() -> String {
        r"(?:From|Sender)[:\s]+(.+)".into()
    }

    // Delivery defaults
    pub fn send_delay() -> u64 {
        500
    }
    pub fn send_timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn message_template() -> String {
        "New message\nFrom: {sender}\nMessage: {body}\nTime: {timestamp}".into()
    }
}
