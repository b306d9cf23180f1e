// src/pipeline/engine.rs

//! The polling engine.
//!
//! Each cycle runs ENSURE_SESSION → FETCH → EXTRACT → DEDUPE_AND_EMIT and
//! then picks a delay (SLEEP on success, BACKOFF on failure). The session
//! manager and the dedup memory live behind one async mutex that doubles as
//! the run lock, so a scheduled cycle and an on-demand check never overlap.
//! Other collaborators observe the engine only through [`EngineStatus`]
//! snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, REFERER};
use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, watch};
use url::Url;

use crate::error::{AuthError, FetchError, Result};
use crate::models::{Config, Record};
use crate::pipeline::backoff::{BackoffPolicy, CycleKind, Delay};
use crate::pipeline::dedup::DedupMemory;
use crate::services::{
    Dispatcher, ExtractionStrategy, Extractor, JsonListStrategy, NotificationSink,
    RecipientRegistry, SessionManager,
};

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch and extraction succeeded
    Clean { extracted: usize, emitted: usize },
    /// No valid session could be obtained
    LoginFailed(AuthError),
    /// The inbox answered as if the session had expired
    SessionExpired(FetchError),
    /// The inbox could not be reached
    NetworkFailed(FetchError),
}

impl CycleOutcome {
    pub fn kind(&self) -> CycleKind {
        match self {
            CycleOutcome::Clean { .. } => CycleKind::Clean,
            CycleOutcome::LoginFailed(_) | CycleOutcome::SessionExpired(_) => {
                CycleKind::AuthFailure
            }
            CycleOutcome::NetworkFailed(_) => CycleKind::TransientFailure,
        }
    }

    fn describe(&self) -> String {
        match self {
            CycleOutcome::Clean { extracted, emitted } => {
                format!("ok ({extracted} found, {emitted} new)")
            }
            CycleOutcome::LoginFailed(e) => e.to_string(),
            CycleOutcome::SessionExpired(e) | CycleOutcome::NetworkFailed(e) => e.to_string(),
        }
    }
}

/// A finished cycle and the delay the schedule picked after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub next_delay: Delay,
}

/// Read-only view of the engine for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub session_valid: bool,
    /// Auth failures since the last clean cycle
    pub auth_failures: u32,
    pub tracked_records: usize,
    pub total_emitted: u64,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

/// State touched by a cycle; only ever accessed under the run lock.
struct EngineState {
    sessions: SessionManager,
    memory: DedupMemory,
    backoff: BackoffPolicy,
    auth_failures: u32,
    total_emitted: u64,
    cycles: u64,
}

/// Runs the fetch → extract → dedupe → emit cycle on a schedule.
pub struct PollingEngine {
    state: Mutex<EngineState>,
    extractor: Extractor,
    dispatcher: Dispatcher,
    inbox_url: Url,
    api_urls: Vec<Url>,
    startup_delay: Duration,
    status: watch::Sender<EngineStatus>,
}

impl PollingEngine {
    pub fn new(config: &Config, sessions: SessionManager, dispatcher: Dispatcher) -> Result<Self> {
        let state = EngineState {
            sessions,
            memory: DedupMemory::new(config.poller.dedup_capacity),
            backoff: BackoffPolicy::new(&config.poller),
            auth_failures: 0,
            total_emitted: 0,
            cycles: 0,
        };
        let (status, _) = watch::channel(EngineStatus::default());

        Ok(Self {
            state: Mutex::new(state),
            extractor: Extractor::from_config(&config.extraction)?,
            dispatcher,
            inbox_url: config.portal.inbox_url()?,
            api_urls: config.portal.api_urls()?,
            startup_delay: Duration::from_secs(config.poller.startup_delay_secs),
            status,
        })
    }

    /// Wire up an engine straight from configuration.
    pub fn from_config(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
        registry: RecipientRegistry,
    ) -> Result<Self> {
        let sessions = SessionManager::new(config.portal.clone(), config.credentials()?)?;
        let dispatcher = Dispatcher::new(sink, registry, &config.delivery);
        Self::new(config, sessions, dispatcher)
    }

    pub fn registry(&self) -> &RecipientRegistry {
        self.dispatcher.registry()
    }

    /// Latest status snapshot.
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Receive a fresh snapshot after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Run one cycle under the run lock.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut state = self.state.lock().await;
        let outcome = self.cycle(&mut state).await;

        match outcome.kind() {
            CycleKind::Clean => state.auth_failures = 0,
            CycleKind::AuthFailure => state.auth_failures += 1,
            CycleKind::TransientFailure => {}
        }
        let next_delay = state.backoff.next_delay(outcome.kind());
        state.cycles += 1;
        self.publish(&state, &outcome);

        CycleReport {
            outcome,
            next_delay,
        }
    }

    /// On-demand check. Shares the cycle code and the run lock with the
    /// scheduled loop, so it waits for a running cycle to finish.
    pub async fn check_now(&self) -> CycleReport {
        log::info!("On-demand check requested");
        self.run_cycle().await
    }

    /// Poll until `shutdown` turns true. A running cycle is always allowed
    /// to finish; only the sleeps between cycles are interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Polling {} (strategies: {})",
            self.inbox_url,
            self.extractor.strategy_names().join(", ")
        );

        if !sleep_or_shutdown(self.startup_delay, &mut shutdown).await {
            log::info!("Polling stopped before the first cycle");
            return;
        }

        loop {
            let report = self.run_cycle().await;
            let wait = report.next_delay.duration();
            match &report.outcome {
                CycleOutcome::Clean { emitted, .. } if *emitted > 0 => {
                    log::info!("Forwarded {} new records; next check in {}s", emitted, wait.as_secs())
                }
                CycleOutcome::Clean { .. } => {
                    log::info!("No new records; next check in {}s", wait.as_secs())
                }
                failure => log::warn!(
                    "Cycle failed: {}; retrying in {}s",
                    failure.describe(),
                    wait.as_secs()
                ),
            }

            if !sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }
        log::info!("Polling stopped");
    }

    async fn cycle(&self, state: &mut EngineState) -> CycleOutcome {
        let client = match state.sessions.ensure_valid().await {
            Ok(session) => session.client().clone(),
            Err(error) => return CycleOutcome::LoginFailed(error),
        };

        let observed_at = Utc::now();
        let records = match self.fetch_records(&client, &state.sessions, observed_at).await {
            Ok(records) => records,
            Err(error @ FetchError::Unauthenticated(_)) => {
                state.sessions.invalidate();
                return CycleOutcome::SessionExpired(error);
            }
            Err(error @ FetchError::Network(_)) => return CycleOutcome::NetworkFailed(error),
        };

        let extracted = records.len();
        let mut emitted = 0;
        for record in records {
            if !state.memory.insert(record.identity.clone(), record.observed_at) {
                continue;
            }
            let report = self.dispatcher.deliver(&record).await;
            log::debug!(
                "Record {} from {} delivered to {} recipients ({} failed)",
                record.identity,
                record.sender,
                report.delivered,
                report.failed
            );
            emitted += 1;
        }
        state.total_emitted += emitted as u64;

        CycleOutcome::Clean { extracted, emitted }
    }

    async fn fetch_records(
        &self,
        client: &Client,
        sessions: &SessionManager,
        observed_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        for api_url in &self.api_urls {
            if let Some(records) = self.probe_api(client, api_url, observed_at).await {
                return Ok(records);
            }
        }

        let response = client
            .get(self.inbox_url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Unauthenticated(format!(
                "inbox answered {}",
                response.status()
            )));
        }
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if sessions.is_login_page(&final_url, &body) {
            return Err(FetchError::Unauthenticated(
                "inbox request was answered with the login page".into(),
            ));
        }
        Ok(self.extractor.extract(&body, observed_at))
    }

    /// Try a JSON endpoint; any failure just means "use the inbox page".
    async fn probe_api(
        &self,
        client: &Client,
        url: &Url,
        observed_at: DateTime<Utc>,
    ) -> Option<Vec<Record>> {
        let response = client
            .get(url.clone())
            .header("X-Requested-With", "XMLHttpRequest")
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(REFERER, self.inbox_url.as_str())
            .send()
            .await
            .ok()?;
        if response.status() != StatusCode::OK {
            log::debug!("API probe {} answered {}", url.path(), response.status());
            return None;
        }
        let body = response.text().await.ok()?;
        match JsonListStrategy.extract(&body, observed_at) {
            Ok(records) if !records.is_empty() => Some(records),
            Ok(_) => None,
            Err(error) => {
                log::debug!("API probe {} unusable: {}", url.path(), error);
                None
            }
        }
    }

    fn publish(&self, state: &EngineState, outcome: &CycleOutcome) {
        self.status.send_replace(EngineStatus {
            session_valid: state.sessions.is_valid(),
            auth_failures: state.auth_failures,
            tracked_records: state.memory.len(),
            total_emitted: state.total_emitted,
            cycles: state.cycles,
            last_cycle_at: Some(Utc::now()),
            last_outcome: Some(outcome.describe()),
        });
    }
}

/// Sleep for `duration` unless shutdown is requested first.
/// Returns `false` when the caller should stop.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow_and_update() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kinds() {
        let clean = CycleOutcome::Clean {
            extracted: 3,
            emitted: 1,
        };
        assert_eq!(clean.kind(), CycleKind::Clean);
        assert_eq!(
            CycleOutcome::LoginFailed(AuthError::Credentials("x".into())).kind(),
            CycleKind::AuthFailure
        );
        assert_eq!(
            CycleOutcome::SessionExpired(FetchError::Unauthenticated("x".into())).kind(),
            CycleKind::AuthFailure
        );
        assert_eq!(
            CycleOutcome::NetworkFailed(FetchError::Network("x".into())).kind(),
            CycleKind::TransientFailure
        );
        assert_eq!(clean.describe(), "ok (3 found, 1 new)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(Duration::from_secs(5), &mut rx).await);

        tx.send(true).unwrap();
        assert!(!sleep_or_shutdown(Duration::from_secs(5), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper =
            tokio::spawn(async move { sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert!(!sleeper.await.unwrap());
    }
}
