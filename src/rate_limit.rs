//! Per-provider rate-limit cool-down tracking.
//!
//! [`RateLimiter`] is the single source of truth for "is provider X cooling
//! down, and for how long". It does not classify errors; the retry layer
//! calls [`RateLimiter::mark_hit`] and [`RateLimiter::set_waiting_period`]
//! when a backend signals quota exhaustion, and every page passes through
//! [`RateLimiter::check_and_wait_if_needed`] before it is sent.
//!
//! ## Locking
//!
//! All state sits behind one `parking_lot::Mutex`. The guard is always
//! dropped before sleeping, so a provider in cool-down never blocks status
//! queries or updates for another provider.
//!
//! Share one limiter across documents (`Arc<RateLimiter>`) so that a quota
//! hit on one document makes the next one wait instead of re-triggering it.

use crate::retry::bounded_secs;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Default ceiling for [`RateLimiter::dynamic_wait`].
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Default base wait (seconds) used when a hit has no explicit period.
pub const DEFAULT_BASE_WAIT_SECS: u64 = 60;

/// Cool-down state of one provider identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitState {
    pub hit: bool,
    pub last_hit: Option<Instant>,
    pub waiting_period: Duration,
}

impl RateLimitState {
    /// Time left in the cool-down, `None` when not cooling down.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if !self.hit {
            return None;
        }
        let elapsed = self.last_hit.map(|t| now.saturating_duration_since(t))?;
        self.waiting_period
            .checked_sub(elapsed)
            .filter(|d| !d.is_zero())
    }
}

/// Thread-safe cool-down tracker keyed by provider identity.
#[derive(Debug)]
pub struct RateLimiter {
    states: Mutex<HashMap<String, RateLimitState>>,
    factors: HashMap<String, f64>,
    max_wait: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        let factors = [
            ("gemini", 1.0),
            ("openai", 1.2),
            ("anthropic", 1.0),
            ("claude", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            states: Mutex::new(HashMap::new()),
            factors,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Override the per-provider multiplier used by [`Self::dynamic_wait`].
    pub fn with_factor(mut self, provider_id: impl Into<String>, factor: f64) -> Self {
        self.factors.insert(provider_id.into(), factor.max(0.0));
        self
    }

    /// Override the ceiling applied by [`Self::dynamic_wait`].
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Ceiling applied to every computed cool-down.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Multiplier for a provider; 1.0 when none is registered.
    pub fn provider_factor(&self, provider_id: &str) -> f64 {
        self.factors.get(provider_id).copied().unwrap_or(1.0)
    }

    /// Copy of the current state. Unknown ids read as "never hit".
    pub fn status(&self, provider_id: &str) -> RateLimitState {
        *self
            .states
            .lock()
            .entry(provider_id.to_string())
            .or_default()
    }

    /// Record a quota hit now. Seeds a waiting period if none is set yet.
    pub fn mark_hit(&self, provider_id: &str) {
        let seed = self.dynamic_wait(provider_id, 0, DEFAULT_BASE_WAIT_SECS);
        let mut states = self.states.lock();
        let state = states.entry(provider_id.to_string()).or_default();
        state.hit = true;
        state.last_hit = Some(Instant::now());
        if state.waiting_period.is_zero() {
            state.waiting_period = seed;
        }
        debug!(provider = provider_id, "rate limit hit recorded");
    }

    pub fn set_waiting_period(&self, provider_id: &str, period: Duration) {
        let mut states = self.states.lock();
        let state = states.entry(provider_id.to_string()).or_default();
        state.waiting_period = period;
        debug!(provider = provider_id, "waiting period set to {:?}", period);
    }

    /// Clear the hit flag and waiting period.
    pub fn reset(&self, provider_id: &str) {
        let mut states = self.states.lock();
        let state = states.entry(provider_id.to_string()).or_default();
        state.hit = false;
        state.waiting_period = Duration::ZERO;
    }

    /// Wait out an active cool-down.
    ///
    /// Returns `true` if the call slept, `false` if the provider was free
    /// (an expired cool-down is reset on the way).
    pub async fn check_and_wait_if_needed(&self, provider_id: &str) -> bool {
        let remaining = {
            let mut states = self.states.lock();
            let state = states.entry(provider_id.to_string()).or_default();
            if !state.hit {
                return false;
            }
            match state.remaining(Instant::now()) {
                Some(left) => left,
                None => {
                    state.hit = false;
                    state.waiting_period = Duration::ZERO;
                    debug!(provider = provider_id, "cool-down elapsed, flag reset");
                    return false;
                }
            }
        };

        info!(
            provider = provider_id,
            "Rate limit cool-down: waiting {:.1}s",
            remaining.as_secs_f64()
        );
        sleep(remaining).await;
        true
    }

    /// `base * factor + attempt² * 10 * factor`, capped at the max wait.
    pub fn dynamic_wait(&self, provider_id: &str, attempt: u32, base_wait_secs: u64) -> Duration {
        let factor = self.provider_factor(provider_id);
        let attempt = f64::from(attempt);
        let secs = base_wait_secs as f64 * factor + attempt * attempt * 10.0 * factor;
        bounded_secs(secs, self.max_wait)
    }

    // ── Observability helpers ────────────────────────────────────────────

    pub fn is_rate_limited(&self, provider_id: &str) -> bool {
        self.remaining_wait(provider_id).is_some()
    }

    /// Cool-down left for a provider, `None` when it is free.
    pub fn remaining_wait(&self, provider_id: &str) -> Option<Duration> {
        self.status(provider_id).remaining(Instant::now())
    }

    /// Time since the last recorded hit, `None` when not hit.
    pub fn elapsed_since_hit(&self, provider_id: &str) -> Option<Duration> {
        let state = self.status(provider_id);
        if !state.hit {
            return None;
        }
        state.last_hit.map(|t| Instant::now().saturating_duration_since(t))
    }

    /// Snapshot of every tracked provider, sorted by id.
    pub fn all_status(&self) -> BTreeMap<String, RateLimitState> {
        self.states
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Reset every tracked provider.
    pub fn clear_all(&self) {
        for state in self.states.lock().values_mut() {
            state.hit = false;
            state.waiting_period = Duration::ZERO;
        }
    }
}
