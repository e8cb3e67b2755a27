//! Randomized per-key request spacing.
//!
//! A [`RateGate`] keeps one slot per key (usually a platform name). Every
//! call to [`RateGate::wait`] after the first re-rolls a delay inside the
//! key's window and holds the caller for that long. Concurrent callers on one
//! key queue behind each other's slots. Keys are independent, so throttling
//! one platform never blocks another.

use collector_config::{DelayWindowConfig, RateGateConfig};
use metrics::histogram;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Metric recording how long callers were held by the gate.
pub const RATE_GATE_DELAY_SECONDS: &str = "collector_rate_gate_delay_seconds";

/// Inclusive bounds for one randomized delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    min: Duration,
    max: Duration,
}

impl DelayWindow {
    /// Creates a window; bounds given in the wrong order are swapped.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    /// A window that always yields the same delay.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    #[must_use]
    pub const fn min(&self) -> Duration {
        self.min
    }

    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    #[must_use]
    pub fn contains(&self, delay: Duration) -> bool {
        delay >= self.min && delay <= self.max
    }

    /// Picks a fresh delay uniformly inside the window, in whole milliseconds.
    #[must_use]
    pub fn roll(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn scaled(self, factor: f64) -> Self {
        if factor <= 1.0 {
            return self;
        }
        Self {
            min: self.min.mul_f64(factor),
            max: self.max.mul_f64(factor),
        }
    }
}

impl From<DelayWindowConfig> for DelayWindow {
    fn from(config: DelayWindowConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }
}

#[derive(Debug, Default)]
struct KeyState {
    last_slot: Option<Instant>,
    backoff_level: u32,
}

/// Per-key randomized delay gate.
#[derive(Debug)]
pub struct RateGate {
    default_window: DelayWindow,
    overrides: HashMap<String, DelayWindow>,
    backoff_base: f64,
    max_backoff_level: u32,
    keys: Mutex<HashMap<String, KeyState>>,
}

impl RateGate {
    /// Creates a gate applying `window` to every key.
    #[must_use]
    pub fn new(window: DelayWindow) -> Self {
        Self {
            default_window: window,
            overrides: HashMap::new(),
            backoff_base: 2.0,
            max_backoff_level: 4,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a gate from configuration.
    #[must_use]
    pub fn from_config(config: &RateGateConfig) -> Self {
        let mut gate = Self::new(config.default_window().into())
            .with_backoff(config.backoff_base, config.max_backoff_level);
        for (key, window) in &config.platforms {
            gate = gate.with_window(key.clone(), (*window).into());
        }
        gate
    }

    /// Overrides the window for one key.
    #[must_use]
    pub fn with_window(mut self, key: impl Into<String>, window: DelayWindow) -> Self {
        self.overrides.insert(key.into(), window);
        self
    }

    /// Sets the backoff multiplier and the highest level it can reach.
    #[must_use]
    pub fn with_backoff(mut self, base: f64, max_level: u32) -> Self {
        self.backoff_base = base.max(1.0);
        self.max_backoff_level = max_level;
        self
    }

    /// Window currently in effect for `key`, including any backoff.
    #[must_use]
    pub fn window_for(&self, key: &str) -> DelayWindow {
        let level = self.keys.lock().get(key).map_or(0, |s| s.backoff_level);
        self.effective_window(key, level)
    }

    fn effective_window(&self, key: &str, level: u32) -> DelayWindow {
        let base = self
            .overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_window);
        let exponent = i32::try_from(level).unwrap_or(i32::MAX);
        base.scaled(self.backoff_base.powi(exponent))
    }

    /// Waits before the next request for `key` and returns how long the
    /// caller was held.
    ///
    /// The first request of a session passes immediately. Every later request
    /// is held for a delay rolled fresh on every call, however long the caller
    /// spent between requests. A caller arriving while another caller's slot
    /// is still pending is queued after it.
    pub async fn wait(&self, key: &str) -> Duration {
        let now = Instant::now();
        let wake = {
            let mut keys = self.keys.lock();
            let state = keys.entry(key.to_string()).or_default();
            let wake = match state.last_slot {
                None => now,
                Some(last) => {
                    let spacing = self.effective_window(key, state.backoff_level).roll();
                    last.max(now) + spacing
                }
            };
            state.last_slot = Some(wake);
            wake
        };

        let delay = wake.saturating_duration_since(now);
        if !delay.is_zero() {
            debug!(key, delay_ms = delay.as_millis(), "Rate gate holding request");
            histogram!(RATE_GATE_DELAY_SECONDS, "key" => key.to_string())
                .record(delay.as_secs_f64());
            tokio::time::sleep_until(wake).await;
        }
        delay
    }

    /// Widens the window for `key` after the remote side pushed back.
    ///
    /// Returns the new backoff level.
    pub fn penalize(&self, key: &str) -> u32 {
        let mut keys = self.keys.lock();
        let state = keys.entry(key.to_string()).or_default();
        state.backoff_level = (state.backoff_level + 1).min(self.max_backoff_level);
        debug!(key, level = state.backoff_level, "Rate gate backoff increased");
        state.backoff_level
    }

    /// Clears any backoff for `key`.
    pub fn relax(&self, key: &str) {
        if let Some(state) = self.keys.lock().get_mut(key) {
            state.backoff_level = 0;
        }
    }

    /// Starts a new session for `key`: the next request passes immediately
    /// and backoff is cleared.
    pub fn reset(&self, key: &str) {
        self.keys.lock().remove(key);
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::from_config(&RateGateConfig::default())
    }
}
