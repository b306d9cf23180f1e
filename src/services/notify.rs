// src/services/notify.rs

//! Notification fan-out.
//!
//! The chat transport is supplied by the caller as a [`NotificationSink`].
//! The [`Dispatcher`] sends every new record to a snapshot of the
//! [`RecipientRegistry`], concurrently per recipient, each send under its
//! own timeout and with starts staggered to respect the transport's rate
//! limit. Failures are logged per recipient and never reach the poller.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{Instant, sleep_until, timeout};

use crate::error::{DeliveryError, Result};
use crate::models::{DeliveryConfig, Record};

/// Delivers one record to one recipient.
///
/// Must be safe to call concurrently for distinct recipients.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: &str, record: &Record) -> std::result::Result<(), DeliveryError>;
}

/// Shared, mutable set of recipient identifiers.
///
/// Cloning yields another handle to the same set. Readers take a snapshot,
/// so writers are never held up by a running fan-out.
#[derive(Debug, Clone, Default)]
pub struct RecipientRegistry {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl RecipientRegistry {
    pub fn new<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(RwLock::new(
                recipients.into_iter().map(Into::into).collect(),
            )),
        }
    }

    /// Add a recipient; returns `false` if it was already present.
    pub fn add(&self, recipient: impl Into<String>) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(recipient.into())
    }

    /// Remove a recipient; returns `false` if it was not present.
    pub fn remove(&self, recipient: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(recipient)
    }

    /// Point-in-time copy of the recipients.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of fanning one record out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans records out to every registered recipient.
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    registry: RecipientRegistry,
    send_delay: Duration,
    send_timeout: Duration,
    max_concurrent: usize,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        registry: RecipientRegistry,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            sink,
            registry,
            send_delay: Duration::from_millis(config.send_delay_ms),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    pub fn registry(&self) -> &RecipientRegistry {
        &self.registry
    }

    /// Send `record` to every recipient. Never fails.
    pub async fn deliver(&self, record: &Record) -> DeliveryReport {
        let recipients = self.registry.snapshot();
        if recipients.is_empty() {
            log::debug!("No recipients registered; record {} not forwarded", record.identity);
            return DeliveryReport::default();
        }

        let start = Instant::now();
        let mut results = stream::iter(recipients.into_iter().enumerate())
            .map(|(slot, recipient)| async move {
                sleep_until(start + self.send_delay * slot as u32).await;
                let result = match timeout(self.send_timeout, self.sink.send(&recipient, record)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.send_timeout.as_secs())),
                };
                (recipient, result)
            })
            .buffer_unordered(self.max_concurrent);

        let mut report = DeliveryReport::default();
        while let Some((recipient, result)) = results.next().await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    log::warn!("Failed to deliver {} to {}: {}", record.identity, recipient, error);
                }
            }
        }
        report
    }
}

/// Sink that writes every notification to the log.
pub struct LogSink {
    template: String,
}

impl LogSink {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipient: &str, record: &Record) -> std::result::Result<(), DeliveryError> {
        log::info!("[to {}] {}", recipient, record.format(&self.template));
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    text: String,
    record: &'a Record,
}

/// Sink that POSTs each notification as JSON to a webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: url::Url,
    template: String,
}

impl WebhookSink {
    pub fn new(url: &str, template: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url::Url::parse(url)?,
            template: template.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, recipient: &str, record: &Record) -> std::result::Result<(), DeliveryError> {
        let payload = WebhookPayload {
            recipient,
            text: record.format(&self.template),
            record,
        };
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
