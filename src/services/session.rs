// src/services/session.rs

//! Portal session management.
//!
//! Owns the one authenticated connection to the portal. A session is the
//! HTTP client whose cookie jar carries the login, together with the
//! anti-forgery token the portal handed out. The polling engine only ever
//! calls [`SessionManager::ensure_valid`] and [`SessionManager::invalidate`].

use chrono::{DateTime, Utc};
use reqwest::header::{ORIGIN, REFERER};
use reqwest::{Client, Response, StatusCode};
use scraper::Html;
use url::Url;

use crate::error::{AuthError, Result};
use crate::models::{Credentials, PortalConfig};
use crate::utils::{http, normalize_whitespace, same_origin};

/// Name of the meta tag the dashboard uses to publish a fresh token.
const CSRF_META: &str = "csrf-token";

/// An authenticated connection to the portal.
#[derive(Debug)]
pub struct Session {
    client: Client,
    token: String,
    valid: bool,
    authenticated_at: DateTime<Utc>,
}

impl Session {
    /// Client carrying the session cookies.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Anti-forgery token currently in use.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }
}

/// Balance and login state shown on the portal dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    /// Masked account identifier
    pub account: String,
    pub balance: String,
    pub session_valid: bool,
}

/// Produces and maintains one authenticated session against the portal.
pub struct SessionManager {
    portal: PortalConfig,
    credentials: Credentials,
    login_url: Url,
    dashboard_url: Url,
    origin: String,
    session: Option<Session>,
    consecutive_failures: u32,
    login_attempts: u64,
}

impl SessionManager {
    /// Create a manager; no network I/O happens until the first login.
    pub fn new(portal: PortalConfig, credentials: Credentials) -> Result<Self> {
        let login_url = portal.login_url()?;
        let dashboard_url = portal.dashboard_url()?;
        let origin = portal.origin()?;
        Ok(Self {
            portal,
            credentials,
            login_url,
            dashboard_url,
            origin,
            session: None,
            consecutive_failures: 0,
            login_attempts: 0,
        })
    }

    /// Log in from scratch with a fresh cookie jar.
    pub async fn authenticate(&mut self) -> std::result::Result<&Session, AuthError> {
        self.login_attempts += 1;
        log::info!("Logging in to {} as {}", self.origin, self.credentials);

        match self.login().await {
            Ok(session) => {
                self.consecutive_failures = 0;
                log::info!("Login succeeded");
                Ok(self.session.insert(session))
            }
            Err(error) => {
                self.consecutive_failures += 1;
                if let Some(session) = self.session.as_mut() {
                    session.valid = false;
                }
                log::warn!(
                    "Login failed ({} in a row): {}",
                    self.consecutive_failures,
                    error
                );
                Err(error)
            }
        }
    }

    /// Local validity check; never touches the network.
    pub fn is_valid(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_valid)
    }

    /// Mark the held session as expired.
    pub fn invalidate(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.valid {
                log::info!("Session invalidated");
            }
            session.valid = false;
        }
    }

    /// Return the held session if it is valid, otherwise log in again.
    pub async fn ensure_valid(&mut self) -> std::result::Result<&Session, AuthError> {
        if !self.is_valid() {
            self.authenticate().await?;
        }
        self.session
            .as_ref()
            .ok_or_else(|| AuthError::Credentials("no session after login".into()))
    }

    /// Login failures since the last successful login.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Total number of login attempts made by this manager.
    pub fn login_attempts(&self) -> u64 {
        self.login_attempts
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether a response is the login form rather than an authenticated page.
    pub fn is_login_page(&self, url: &Url, body: &str) -> bool {
        url.path() == self.login_url.path()
            || self
                .portal
                .unauthenticated_markers
                .iter()
                .any(|marker| body.contains(marker.as_str()))
    }

    /// Read the account balance from the dashboard.
    pub async fn account_summary(&mut self) -> Result<AccountSummary> {
        let dashboard_url = self.dashboard_url.clone();
        let client = self.ensure_valid().await?.client().clone();

        let response = client.get(dashboard_url).send().await?;
        let final_url = response.url().clone();
        let page = response.text().await?;
        if self.is_login_page(&final_url, &page) {
            self.invalidate();
        }

        Ok(AccountSummary {
            account: self.credentials.masked_identifier(),
            balance: extract_balance(&page).unwrap_or_else(|| "N/A".to_string()),
            session_valid: self.is_valid(),
        })
    }

    async fn login(&self) -> std::result::Result<Session, AuthError> {
        let client = http::create_async_client(&self.portal).map_err(AuthError::network)?;

        let response = client
            .get(self.login_url.clone())
            .send()
            .await
            .map_err(AuthError::network)?;
        self.check_response(&response)?;
        let page = response.text().await.map_err(AuthError::network)?;

        let token = extract_token(&page, &self.portal.token_field).ok_or_else(|| {
            AuthError::Extraction(format!(
                "no `{}` field on the login page",
                self.portal.token_field
            ))
        })?;

        let mut form: Vec<(&str, &str)> = vec![
            (self.portal.token_field.as_str(), token.as_str()),
            (
                self.portal.identifier_field.as_str(),
                self.credentials.identifier(),
            ),
            (self.portal.secret_field.as_str(), self.credentials.secret()),
        ];
        form.extend(
            self.portal
                .extra_login_fields
                .iter()
                .map(|field| (field.name.as_str(), field.value.as_str())),
        );

        let response = client
            .post(self.login_url.clone())
            .header(ORIGIN, &self.origin)
            .header(REFERER, self.login_url.as_str())
            .form(&form)
            .send()
            .await
            .map_err(AuthError::network)?;
        self.check_response(&response)?;
        let landed = response.url().clone();
        let body = response.text().await.map_err(AuthError::network)?;

        if !self.is_authenticated(&landed, &body) {
            return Err(AuthError::Credentials(format!(
                "landed on {} instead of the authenticated area",
                landed.path()
            )));
        }

        let token = self.refresh_token(&client).await.unwrap_or(token);

        Ok(Session {
            client,
            token,
            valid: true,
            authenticated_at: Utc::now(),
        })
    }

    /// Non-200 answers and redirects off the portal are transport problems,
    /// not credential problems.
    fn check_response(&self, response: &Response) -> std::result::Result<(), AuthError> {
        if !same_origin(&self.login_url, response.url()) {
            return Err(AuthError::Network(format!(
                "unexpected redirect to {}",
                response.url().host_str().unwrap_or("<no host>")
            )));
        }
        if response.status() != StatusCode::OK {
            return Err(AuthError::Network(format!(
                "{} answered {}",
                response.url().path(),
                response.status()
            )));
        }
        Ok(())
    }

    fn is_authenticated(&self, landed: &Url, body: &str) -> bool {
        let path = landed.path();
        self.portal
            .authenticated_path_markers
            .iter()
            .any(|marker| path.contains(marker.as_str()))
            || self
                .portal
                .authenticated_body_markers
                .iter()
                .any(|marker| body.contains(marker.as_str()))
    }

    /// Pick up the token the dashboard publishes, if any.
    async fn refresh_token(&self, client: &Client) -> Option<String> {
        let response = match client.get(self.dashboard_url.clone()).send().await {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                log::debug!("Dashboard answered {}; keeping login token", response.status());
                return None;
            }
            Err(error) => {
                log::debug!("Dashboard fetch failed: {error}; keeping login token");
                return None;
            }
        };
        let page = response.text().await.ok()?;
        let document = Html::parse_document(&page);
        http::meta_content(&document, CSRF_META)
    }
}

fn extract_token(page: &str, field: &str) -> Option<String> {
    let document = Html::parse_document(page);
    http::hidden_input_value(&document, field)
}

fn extract_balance(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = http::parse_selector("span.balance").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|balance| !balance.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            PortalConfig::default(),
            Credentials::new("someone@example.com", "hunter2"),
        )
        .unwrap()
    }

    #[test]
    fn test_new_manager_has_no_session() {
        let manager = manager();
        assert!(!manager.is_valid());
        assert_eq!(manager.consecutive_failures(), 0);
        assert_eq!(manager.login_attempts(), 0);
    }

    #[test]
    fn test_invalidate_without_session_is_noop() {
        let mut manager = manager();
        manager.invalidate();
        assert!(!manager.is_valid());
    }

    #[test]
    fn test_is_login_page() {
        let manager = manager();
        let login = Url::parse("https://www.ivasms.com/login").unwrap();
        let inbox = Url::parse("https://www.ivasms.com/portal/sms/received").unwrap();
        assert!(manager.is_login_page(&login, "<html></html>"));
        assert!(!manager.is_login_page(&inbox, "<table></table>"));
    }

    #[test]
    fn test_password_field_on_inbox_is_not_a_login_page() {
        let manager = manager();
        let inbox = Url::parse("https://www.ivasms.com/portal/sms/received").unwrap();
        let page = r#"<div class="modal"><input type="password" name="password"></div>
            <table><tr><td>+100</td><td>hi</td><td>09:00</td></tr></table>"#;
        assert!(!manager.is_login_page(&inbox, page));
    }

    #[test]
    fn test_configured_body_marker_detects_login_page() {
        let portal = PortalConfig {
            unauthenticated_markers: vec![r#"id="login-form""#.into()],
            ..PortalConfig::default()
        };
        let manager =
            SessionManager::new(portal, Credentials::new("someone@example.com", "hunter2")).unwrap();
        let inbox = Url::parse("https://www.ivasms.com/portal/sms/received").unwrap();
        assert!(manager.is_login_page(&inbox, r#"<form id="login-form"></form>"#));
        assert!(!manager.is_login_page(&inbox, "<table></table>"));
    }

    #[test]
    fn test_is_authenticated_checks_path_not_host() {
        let manager = manager();
        let portal = Url::parse("https://www.ivasms.com/portal").unwrap();
        let login = Url::parse("https://www.ivasms.com/login").unwrap();
        assert!(manager.is_authenticated(&portal, ""));
        assert!(!manager.is_authenticated(&login, "welcome to the portal"));
    }

    #[test]
    fn test_extract_balance() {
        assert_eq!(
            extract_balance(r#"<div>Balance: <span class="balance"> $ 4.20 </span></div>"#)
                .as_deref(),
            Some("$ 4.20")
        );
        assert_eq!(extract_balance("<div></div>"), None);
    }
}
