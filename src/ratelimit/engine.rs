//! Core rate limiting engine.
//!
//! The engine keeps an exact log of event timestamps per (rule, caller) pair
//! and answers admission queries against it. State is held in a sharded
//! concurrent map so unrelated callers do not contend on a single lock; all
//! operations on one key are serialized by that key's shard lock.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::WindowKey;
use super::rule::{Algorithm, RateLimitRule};

/// Default number of windows a pair may stay idle before it is swept.
const DEFAULT_IDLE_WINDOW_MULTIPLE: u32 = 2;
/// Default idle time for windows recorded without a usable duration.
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(300);

/// Tuning for window state retention.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A window is evicted once its newest event is older than this many
    /// multiples of the rule's window
    pub idle_window_multiple: u32,
    /// Idle time after which a window with an unparseable duration is evicted
    pub default_idle_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_window_multiple: DEFAULT_IDLE_WINDOW_MULTIPLE,
            default_idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

/// Outcome of a fused check-and-record attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the event was admitted (and recorded)
    pub allowed: bool,
    /// The rule's limit
    pub limit: u64,
    /// Events still admissible in the current window
    pub remaining: u64,
    /// How long until another event would be admitted, when denied
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn fail_open(limit: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_after: None,
        }
    }
}

/// Which recorded events still count towards the limit.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    /// Events strictly after the instant (trailing, right-open window)
    After(Instant),
    /// Events at or after the instant (start of a fixed bucket)
    AtOrAfter(Instant),
    /// The window reaches back past the clock's origin
    All,
}

impl Boundary {
    fn contains(&self, at: Instant) -> bool {
        match *self {
            Boundary::After(cutoff) => at > cutoff,
            Boundary::AtOrAfter(start) => at >= start,
            Boundary::All => true,
        }
    }
}

/// Recorded events for one (rule, caller) pair, oldest first.
#[derive(Debug, Default)]
struct WindowState {
    events: VecDeque<Instant>,
    /// Widest window duration the pair has been seen with
    window: Option<Duration>,
}

impl WindowState {
    fn new() -> Self {
        Self::default()
    }

    /// Drop events that fall outside the boundary.
    fn prune(&mut self, boundary: &Boundary) {
        while let Some(&oldest) = self.events.front() {
            if boundary.contains(oldest) {
                break;
            }
            self.events.pop_front();
        }
    }

    /// Widen the retained window. Never narrows it, so a sweep cannot drop
    /// events a wider window still counts.
    fn retain_window(&mut self, window: Duration) {
        self.window = Some(self.window.map_or(window, |current| current.max(window)));
    }

    fn count(&self) -> u64 {
        self.events.len() as u64
    }

    fn last_event(&self) -> Option<Instant> {
        self.events.back().copied()
    }
}

/// The sliding-window rate limiting engine.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimitEngine<C: Clock = SystemClock> {
    /// Event logs indexed by window key
    windows: DashMap<WindowKey, WindowState>,
    /// Time source
    clock: C,
    /// Origin that fixed-window buckets are aligned to
    epoch: Instant,
    config: EngineConfig,
}

impl RateLimitEngine<SystemClock> {
    /// Create a new engine on the system clock with default retention.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine on the system clock.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_clock(SystemClock, config)
    }
}

impl Default for RateLimitEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimitEngine<C> {
    /// Create a new engine reading time from `clock`.
    pub fn with_clock(clock: C, config: EngineConfig) -> Self {
        let epoch = clock.now();
        Self {
            windows: DashMap::new(),
            clock,
            epoch,
            config,
        }
    }

    /// Check whether the caller may proceed under the rule.
    ///
    /// Prunes expired events for the pair but records nothing. A window that
    /// cannot be parsed allows the request.
    pub fn check_rate_limit(&self, caller_id: &str, rule: &RateLimitRule) -> bool {
        let window = match rule.window_duration() {
            Ok(window) => window,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    error = %e,
                    "Failed to parse window duration, allowing request"
                );
                return true;
            }
        };

        let key = WindowKey::for_rule(rule, caller_id);
        let Some(mut state) = self.windows.get_mut(&key) else {
            trace!(key = %key, "No events recorded for window");
            return 0 < rule.limit;
        };

        let now = self.clock.now();
        state.prune(&self.boundary(rule.algorithm, window, now));
        state.retain_window(window);

        let count = state.count();
        let allowed = count < rule.limit;

        trace!(
            key = %key,
            count = count,
            limit = rule.limit,
            allowed = allowed,
            "Checked rate limit"
        );
        if !allowed {
            debug!(key = %key, "Rate limit exceeded");
        }

        allowed
    }

    /// Record an event for the caller under the rule.
    ///
    /// The rule's limit is not consulted and nothing is pruned.
    pub fn apply_rate_limit(&self, caller_id: &str, rule: &RateLimitRule) {
        let window = rule.window_duration().ok();
        let key = WindowKey::for_rule(rule, caller_id);

        let mut state = self.windows.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating new rate limit window");
            WindowState::new()
        });

        let now = self.clock.now();
        state.events.push_back(now);
        if let Some(window) = window {
            state.retain_window(window);
        }

        trace!(key = %key, count = state.count(), "Recorded event");
    }

    /// Check the rule and record the event only if it is admitted.
    ///
    /// The count and the append happen under the same lock, so concurrent
    /// attempts for one pair never admit more than the limit.
    pub fn attempt_rate_limit(&self, caller_id: &str, rule: &RateLimitRule) -> Decision {
        let window = match rule.window_duration() {
            Ok(window) => window,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    error = %e,
                    "Failed to parse window duration, allowing request"
                );
                return Decision::fail_open(rule.limit);
            }
        };

        let key = WindowKey::for_rule(rule, caller_id);
        let mut state = self.windows.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating new rate limit window");
            WindowState::new()
        });

        let now = self.clock.now();
        state.prune(&self.boundary(rule.algorithm, window, now));
        state.retain_window(window);

        let count = state.count();
        if count < rule.limit {
            state.events.push_back(now);
            trace!(key = %key, count = count + 1, limit = rule.limit, "Admitted event");
            return Decision {
                allowed: true,
                limit: rule.limit,
                remaining: rule.limit - count - 1,
                retry_after: None,
            };
        }

        let retry_after = match rule.algorithm {
            Algorithm::SlidingWindow => {
                // The event whose expiry brings the count back under the limit
                let index = (count - rule.limit) as usize;
                state
                    .events
                    .get(index)
                    .map(|&at| (at + window).saturating_duration_since(now))
            }
            Algorithm::FixedWindow => {
                Some((self.bucket_start(window, now) + window).saturating_duration_since(now))
            }
        };

        debug!(key = %key, retry_after = ?retry_after, "Rate limit exceeded");

        Decision {
            allowed: false,
            limit: rule.limit,
            remaining: 0,
            retry_after,
        }
    }

    /// Drop every window belonging to a rule. Returns how many were removed.
    pub fn forget_rule(&self, rule_id: &str) -> usize {
        let mut removed = 0;
        self.windows.retain(|key, _| {
            let keep = key.rule_id != rule_id;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(rule_id = %rule_id, removed = removed, "Forgot rule windows");
        }
        removed
    }

    /// Widen the retained window of every pair recorded under a rule.
    ///
    /// Called when a rule's window changes so idle pairs keep the events the
    /// new window still covers. Returns how many windows were touched.
    pub fn retune_rule(&self, rule_id: &str, window: Duration) -> usize {
        let mut touched = 0;
        for mut entry in self.windows.iter_mut() {
            if entry.key().rule_id == rule_id {
                entry.value_mut().retain_window(window);
                touched += 1;
            }
        }

        if touched > 0 {
            debug!(
                rule_id = %rule_id,
                windows = touched,
                window = ?window,
                "Retuned rule windows"
            );
        }
        touched
    }

    /// Prune old events everywhere and evict idle windows.
    ///
    /// Events older than `idle_window_multiple` windows are dropped and any
    /// window left empty is removed. Windows whose duration never parsed are
    /// removed once their newest event is older than `default_idle_ttl`.
    /// Returns the number of evicted windows.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let multiple = self.config.idle_window_multiple.max(1);
        let idle_ttl = self.config.default_idle_ttl;
        let mut evicted = 0;

        self.windows.retain(|key, state| {
            let keep = match state.window {
                Some(window) => {
                    if let Some(cutoff) = now.checked_sub(window.saturating_mul(multiple)) {
                        state.prune(&Boundary::After(cutoff));
                    }
                    !state.events.is_empty()
                }
                None => state
                    .last_event()
                    .map_or(false, |last| now.saturating_duration_since(last) < idle_ttl),
            };

            if !keep {
                trace!(key = %key, "Evicting idle window");
                evicted += 1;
            }
            keep
        });

        evicted
    }

    /// Number of events currently held for a pair, if it has a window.
    pub fn event_count(&self, rule_id: &str, caller_id: &str) -> Option<usize> {
        self.windows
            .get(&WindowKey::new(rule_id, caller_id))
            .map(|state| state.events.len())
    }

    /// Number of tracked windows.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }

    fn boundary(&self, algorithm: Algorithm, window: Duration, now: Instant) -> Boundary {
        match algorithm {
            Algorithm::SlidingWindow => now
                .checked_sub(window)
                .map_or(Boundary::All, Boundary::After),
            Algorithm::FixedWindow => Boundary::AtOrAfter(self.bucket_start(window, now)),
        }
    }

    /// Start of the fixed bucket containing `now`, aligned to the epoch.
    fn bucket_start(&self, window: Duration, now: Instant) -> Instant {
        let window_nanos = window.as_nanos();
        if window_nanos == 0 {
            return now;
        }
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        // The offset is below the window length, which always fits in u64
        let offset = (elapsed % window_nanos) as u64;
        now - Duration::from_nanos(offset)
    }
}
