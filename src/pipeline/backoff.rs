//! Delay selection between polling cycles.
//!
//! Clean cycles sleep a jittered interval. Auth failures retry quickly
//! until a ceiling is reached, then cool down for a long time and start
//! counting again. Network failures retry after a fixed medium delay and
//! leave the auth failure count alone.

use std::time::Duration;

use rand::Rng;

use crate::models::PollerConfig;

/// How the last cycle ended, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Clean,
    AuthFailure,
    TransientFailure,
}

/// Delay chosen after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Jittered wait after a clean cycle
    Interval(Duration),
    /// Short wait after an auth failure below the ceiling
    AuthRetry(Duration),
    /// Long wait once the auth failure ceiling was reached
    Cooldown(Duration),
    /// Medium wait after a network failure
    TransientRetry(Duration),
}

impl Delay {
    pub fn duration(&self) -> Duration {
        match *self {
            Delay::Interval(d)
            | Delay::AuthRetry(d)
            | Delay::Cooldown(d)
            | Delay::TransientRetry(d) => d,
        }
    }
}

/// Backoff policy with its auth failure counter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    interval_min: Duration,
    interval_max: Duration,
    auth_failure_ceiling: u32,
    auth_retry: Duration,
    auth_cooldown: Duration,
    transient_retry: Duration,
    auth_failures: u32,
}

impl BackoffPolicy {
    pub fn new(config: &PollerConfig) -> Self {
        let min = config.interval_min_secs.min(config.interval_max_secs);
        let max = config.interval_min_secs.max(config.interval_max_secs);
        Self {
            interval_min: Duration::from_secs(min),
            interval_max: Duration::from_secs(max),
            auth_failure_ceiling: config.auth_failure_ceiling.max(1),
            auth_retry: Duration::from_secs(config.auth_retry_delay_secs),
            auth_cooldown: Duration::from_secs(config.auth_cooldown_secs),
            transient_retry: Duration::from_secs(config.transient_retry_delay_secs),
            auth_failures: 0,
        }
    }

    /// Auth failures counted towards the ceiling.
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures
    }

    /// Record a cycle result and pick the delay before the next cycle.
    pub fn next_delay(&mut self, kind: CycleKind) -> Delay {
        self.next_delay_with(kind, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, kind: CycleKind, rng: &mut R) -> Delay {
        match kind {
            CycleKind::Clean => {
                self.auth_failures = 0;
                Delay::Interval(self.jittered_interval(rng))
            }
            CycleKind::AuthFailure => {
                self.auth_failures += 1;
                if self.auth_failures >= self.auth_failure_ceiling {
                    log::warn!(
                        "{} auth failures in a row, cooling down for {}s",
                        self.auth_failures,
                        self.auth_cooldown.as_secs()
                    );
                    self.auth_failures = 0;
                    Delay::Cooldown(self.auth_cooldown)
                } else {
                    Delay::AuthRetry(self.auth_retry)
                }
            }
            CycleKind::TransientFailure => Delay::TransientRetry(self.transient_retry),
        }
    }

    fn jittered_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.interval_min.as_secs();
        let max = self.interval_max.as_secs();
        Duration::from_secs(rng.gen_range(min..=max))
    }
}
