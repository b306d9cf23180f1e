// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::PortalConfig;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Headers every request to the portal carries.
pub fn default_headers(config: &PortalConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .map_err(|e| AppError::config(format!("portal.accept_language: {e}")))?,
    );
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    Ok(headers)
}

/// Create a configured asynchronous HTTP client with its own cookie jar.
pub fn create_async_client(config: &PortalConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(default_headers(config)?)
        .cookie_store(true)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Parse a CSS selector, mapping failures to `AppError::Selector`.
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Value of the `value` attribute of the first `<input name="{field}">`.
pub fn hidden_input_value(document: &Html, field: &str) -> Option<String> {
    let selector = parse_selector(&format!(r#"input[name="{field}"]"#)).ok()?;
    document
        .select(&selector)
        .find_map(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Content of `<meta name="{name}" content="...">`.
pub fn meta_content(document: &Html, name: &str) -> Option<String> {
    let selector = parse_selector(&format!(r#"meta[name="{name}"]"#)).ok()?;
    document
        .select(&selector)
        .find_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selector_valid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector(r#"div[class*="card"]"#).is_ok());
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
    }

    #[test]
    fn test_hidden_input_value() {
        let doc = Html::parse_document(
            r#"<form><input type="hidden" name="_token" value="abc123"><input name="email"></form>"#,
        );
        assert_eq!(hidden_input_value(&doc, "_token").as_deref(), Some("abc123"));
        assert_eq!(hidden_input_value(&doc, "email"), None);
        assert_eq!(hidden_input_value(&doc, "missing"), None);
    }

    #[test]
    fn test_meta_content() {
        let doc = Html::parse_document(
            r#"<html><head><meta name="csrf-token" content="fresh"></head></html>"#,
        );
        assert_eq!(meta_content(&doc, "csrf-token").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(&PortalConfig::default()).unwrap();
        assert!(headers.contains_key(ACCEPT));
        assert_eq!(headers[UPGRADE_INSECURE_REQUESTS], "1");
    }
}
