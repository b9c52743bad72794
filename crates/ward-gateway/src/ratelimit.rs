//! Sliding-window rate limiter for outbound actions.
//!
//! Every action type and the Gateway as a whole keep a list of admission
//! timestamps. A timestamp leaves the window once `t + window_ms <= now`.
//! The pipeline reserves a slot with `try_acquire`, which checks and records
//! under one lock, and hands it back with `release` when a later step refuses
//! the action. `check` and `record` remain for callers that only inspect.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use ward_config::RateLimitsConfig;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Limits applied by the limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub global_limit: u32,
    pub default_action_limit: u32,
    pub per_action: HashMap<String, u32>,
}

impl RateLimitConfig {
    pub fn limit_for(&self, action: &str) -> u32 {
        self.per_action
            .get(action)
            .copied()
            .unwrap_or(self.default_action_limit)
    }
}

impl From<&RateLimitsConfig> for RateLimitConfig {
    fn from(config: &RateLimitsConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            global_limit: config.global_limit,
            default_action_limit: config.default_action_limit,
            per_action: config.per_action.clone(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitsConfig::default())
    }
}

/// Which window refused the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Set when `allowed` is false.
    pub scope: Option<LimitScope>,
    pub limit: u32,
    pub remaining: u32,
    /// Milliseconds until the oldest counted timestamp leaves the window; 0 when allowed.
    pub retry_after_ms: u64,
}

/// Current window occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub global: usize,
    pub per_action: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Windows {
    global: VecDeque<u64>,
    per_action: HashMap<String, VecDeque<u64>>,
}

fn prune(window: &mut VecDeque<u64>, now: u64, window_ms: u64) {
    while let Some(&oldest) = window.front() {
        if oldest.saturating_add(window_ms) <= now {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn retry_after(window: &VecDeque<u64>, now: u64, window_ms: u64) -> u64 {
    match window.front() {
        Some(&oldest) => oldest.saturating_add(window_ms).saturating_sub(now),
        // A zero limit never frees up; report a full window.
        None => window_ms,
    }
}

fn remaining(limit: u32, used: usize) -> u32 {
    limit.saturating_sub(u32::try_from(used).unwrap_or(u32::MAX))
}

fn evaluate(
    windows: &mut Windows,
    config: &RateLimitConfig,
    action: &str,
    now: u64,
) -> RateLimitDecision {
    prune(&mut windows.global, now, config.window_ms);
    let global_used = windows.global.len();
    if global_used >= config.global_limit as usize {
        let retry_after_ms = retry_after(&windows.global, now, config.window_ms);
        debug!(action, global_used, retry_after_ms, "global rate limit reached");
        return RateLimitDecision {
            allowed: false,
            scope: Some(LimitScope::Global),
            limit: config.global_limit,
            remaining: 0,
            retry_after_ms,
        };
    }

    let limit = config.limit_for(action);
    let (action_used, action_retry) = match windows.per_action.get_mut(action) {
        Some(window) => {
            prune(window, now, config.window_ms);
            (window.len(), retry_after(window, now, config.window_ms))
        }
        None => (0, config.window_ms),
    };
    if action_used >= limit as usize {
        debug!(action, action_used, retry_after_ms = action_retry, "action rate limit reached");
        return RateLimitDecision {
            allowed: false,
            scope: Some(LimitScope::Action),
            limit,
            remaining: 0,
            retry_after_ms: action_retry,
        };
    }

    RateLimitDecision {
        allowed: true,
        scope: None,
        limit,
        remaining: remaining(limit, action_used).min(remaining(config.global_limit, global_used)),
        retry_after_ms: 0,
    }
}

fn push(windows: &mut Windows, action: &str, now: u64, window_ms: u64) {
    prune(&mut windows.global, now, window_ms);
    windows.global.push_back(now);
    let window = windows.per_action.entry(action.to_string()).or_default();
    prune(window, now, window_ms);
    window.push_back(now);
}

/// Sliding-window limiter shared by all Gateway connections.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    windows: Arc<Mutex<Windows>>,
    config: Arc<RwLock<RateLimitConfig>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows::default())),
            config: Arc::new(RwLock::new(config)),
            clock,
        }
    }

    /// Would `action` be admitted now? Does not consume a slot.
    pub fn check(&self, action: &str) -> RateLimitDecision {
        let config = self.config.read().clone();
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        evaluate(&mut windows, &config, action, now)
    }

    /// Count one admission of `action` against both windows.
    pub fn record(&self, action: &str) {
        let window_ms = self.config.read().window_ms;
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        push(&mut windows, action, now, window_ms);
    }

    /// Check and record under one lock. An allowed decision has already
    /// taken its slot; give it back with [`release`](Self::release) if the
    /// action is refused further down the pipeline.
    pub fn try_acquire(&self, action: &str) -> RateLimitDecision {
        let config = self.config.read().clone();
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        let decision = evaluate(&mut windows, &config, action, now);
        if decision.allowed {
            push(&mut windows, action, now, config.window_ms);
        }
        decision
    }

    /// Return the newest slot `action` holds in both windows.
    pub fn release(&self, action: &str) {
        let mut windows = self.windows.lock();
        let Some(at) = windows.per_action.get_mut(action).and_then(|w| w.pop_back()) else {
            return;
        };
        if let Some(pos) = windows.global.iter().rposition(|&t| t == at) {
            windows.global.remove(pos);
        }
    }

    /// Apply new limits. Recorded timestamps are kept.
    pub fn update_config(&self, config: RateLimitConfig) {
        info!(
            window_ms = config.window_ms,
            global_limit = config.global_limit,
            "rate limits updated"
        );
        *self.config.write() = config;
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config.read().clone()
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let window_ms = self.config.read().window_ms;
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        prune(&mut windows.global, now, window_ms);
        windows.per_action.retain(|_, w| {
            prune(w, now, window_ms);
            !w.is_empty()
        });
        RateLimitSnapshot {
            global: windows.global.len(),
            per_action: windows
                .per_action
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: u32, per_action: u32, window_ms: u64) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = RateLimitConfig {
            window_ms,
            global_limit: global,
            default_action_limit: per_action,
            per_action: HashMap::new(),
        };
        (SlidingWindowLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_check_does_not_consume() {
        let (l, _) = limiter(10, 1, 1000);
        assert!(l.check("email.send").allowed);
        assert!(l.check("email.send").allowed);
        l.record("email.send");
        assert!(!l.check("email.send").allowed);
    }

    #[test]
    fn test_zero_limit_always_refuses() {
        let (l, _) = limiter(10, 0, 1000);
        let d = l.check("files.read");
        assert!(!d.allowed);
        assert_eq!(d.retry_after_ms, 1000);
    }

    #[test]
    fn test_remaining_counts_down() {
        let (l, _) = limiter(100, 3, 1000);
        assert_eq!(l.check("a.b").remaining, 3);
        l.record("a.b");
        assert_eq!(l.check("a.b").remaining, 2);
    }

    #[test]
    fn test_default_config_matches_settings() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit_for("email.send"), 20);
        assert_eq!(config.limit_for("unknown.action"), 60);
        assert_eq!(config.global_limit, 500);
        assert_eq!(config.window_ms, 3_600_000);
    }

    #[test]
    fn test_try_acquire_takes_slot_and_release_returns_it() {
        let (l, _) = limiter(10, 2, 1000);
        assert!(l.try_acquire("a.b").allowed);
        assert!(l.try_acquire("a.b").allowed);
        assert!(!l.try_acquire("a.b").allowed);
        assert_eq!(l.snapshot().global, 2);
        l.release("a.b");
        assert_eq!(l.snapshot().global, 1);
        assert!(l.try_acquire("a.b").allowed);
    }

    #[test]
    fn test_release_without_slot_is_noop() {
        let (l, _) = limiter(10, 2, 1000);
        l.record("c.d");
        l.release("a.b");
        assert_eq!(l.snapshot().global, 1);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        assert!(clock.now_ms() > 0);
    }
}
