// src/throttle.rs
//! Fixed-window request throttling.
//!
//! Counters live in process memory, keyed by `(scope, caller key)`. A window
//! opens on the first hit and admits `count` requests until it lapses.
use std::{
    fmt,
    str::FromStr,
    sync::Mutex,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Anon,
    User,
    Admin,
    PollCreation,
    Signup,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Anon => "anon",
            Scope::User => "user",
            Scope::Admin => "admin",
            Scope::PollCreation => "poll_creation",
            Scope::Signup => "signup",
        }
    }
}

/// `count` requests per `period`, written `"<count>/<second|minute|hour|day>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub count: u32,
    pub period: Duration,
}

impl Rate {
    pub fn new(count: u32, period: Duration) -> Self {
        Self { count, period }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRateError(String);

impl fmt::Display for ParseRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected <count>/<period>, got {:?}", self.0)
    }
}

impl FromStr for Rate {
    type Err = ParseRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRateError(s.to_string());

        let (count, period) = s.split_once('/').ok_or_else(err)?;
        let count = count.trim().parse::<u32>().map_err(|_| err())?;

        // Only the leading letter matters: "min", "minute" and "m" all work.
        let seconds = match period.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 60 * 60,
            Some('d') => 60 * 60 * 24,
            _ => return Err(err()),
        };

        Ok(Rate::new(count, Duration::from_secs(seconds)))
    }
}

/// How often lapsed windows are swept out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    period: Duration,
    hits: u32,
}

impl Window {
    fn lapsed_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.period
    }
}

pub struct RateLimiter {
    windows: DashMap<(Scope, String), Window>,
    last_sweep: Mutex<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hit for `key` and fails with `Throttled` once the window is spent.
    pub fn check(&self, scope: Scope, key: &str, rate: Rate) -> AppResult<()> {
        self.check_at(scope, key, rate, Instant::now())
    }

    /// Number of windows currently held.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn check_at(&self, scope: Scope, key: &str, rate: Rate, now: Instant) -> AppResult<()> {
        // Must run before an entry guard is held: `retain` locks every shard.
        self.sweep_if_due(now);

        let mut window = self
            .windows
            .entry((scope, key.to_string()))
            .or_insert_with(|| Window { started: now, period: rate.period, hits: 0 });

        window.period = rate.period;
        if window.lapsed_at(now) {
            window.started = now;
            window.hits = 0;
        }

        if window.hits >= rate.count {
            let elapsed = now.saturating_duration_since(window.started);
            let retry_after = rate.period.saturating_sub(elapsed).as_secs().max(1);
            warn!(scope = scope.as_str(), retry_after, "request throttled");
            return Err(AppError::Throttled { retry_after });
        }

        window.hits += 1;
        Ok(())
    }

    /// Drops lapsed windows at most once per `SWEEP_INTERVAL`. A caller that
    /// finds another sweep in progress skips it.
    fn sweep_if_due(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last_sweep) < SWEEP_INTERVAL {
            return;
        }
        *last_sweep = now;

        let before = self.windows.len();
        self.windows.retain(|_, window| !window.lapsed_at(now));
        debug!(dropped = before - self.windows.len(), "throttle windows swept");
    }
}
