// src/api/rate_limiter.rs
//! Token Bucket Rate Limiting with a FIFO waiter queue
//!
//! Enforces the provider's global request ceiling independent of which
//! endpoint serves the call:
//! - Continuous lazy refill (`capacity / window` tokens per ms), no fixed-window resets
//! - FIFO queue of suspended callers, drained by a periodic scheduler tick
//! - Waiters older than `max_wait_time` are resolved with a timeout outcome
//! - Exponential backoff when a provider answers 429 anyway

use crate::config::GatewayConfig;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Tolerance for float accumulation in refill math
const TOKEN_EPSILON: f64 = 1e-9;

/// Continuous-refill token bucket. All methods take `now` explicitly.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate_per_ms: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens that refills completely over `window`
    pub fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = capacity as f64;
        let window_ms = (window.as_nanos() as f64 / 1_000_000.0).max(TOKEN_EPSILON);
        Self {
            capacity,
            tokens: capacity,
            refill_rate_per_ms: capacity / window_ms,
            last_refill_at: now,
        }
    }

    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        if elapsed.is_zero() {
            return;
        }
        let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        self.tokens = (self.tokens + elapsed_ms * self.refill_rate_per_ms).min(self.capacity);
        self.last_refill_at = now;
    }

    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Puts back a token that was taken for a waiter who had already left
    pub fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    /// Empties the bucket and accrues nothing until `until`
    pub fn pause_until(&mut self, until: Instant) {
        self.tokens = 0.0;
        if until > self.last_refill_at {
            self.last_refill_at = until;
        }
    }

    /// Time until the next whole token is available, assuming no other takers
    pub fn time_until_token(&self, now: Instant) -> Duration {
        let pause = self.last_refill_at.saturating_duration_since(now);
        let missing = (1.0 - self.tokens).max(0.0);
        if missing <= TOKEN_EPSILON {
            return pause;
        }
        let ms = missing / self.refill_rate_per_ms;
        pause + Duration::from_nanos((ms * 1_000_000.0).ceil() as u64)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_rate_per_ms
    }
}

/// Outcome of waiting for a request token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted { waited: Duration },
    TimedOut { waited: Duration },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }

    pub fn waited(&self) -> Duration {
        match self {
            Admission::Granted { waited } | Admission::TimedOut { waited } => *waited,
        }
    }
}

/// Numeric policy of the limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Requests allowed per `window` (the provider's documented ceiling)
    pub capacity: u32,
    pub window: Duration,
    pub max_wait_time: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 225,
            window: Duration::from_secs(60),
            max_wait_time: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl From<&GatewayConfig> for RateLimitConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            capacity: config.rate_limit_per_window,
            window: config.window(),
            max_wait_time: config.max_wait_time(),
            backoff_base: Duration::from_millis(config.rate_limit_backoff.base_ms),
            backoff_max: Duration::from_millis(config.rate_limit_backoff.max_ms),
        }
    }
}

/// Caller suspended until a token is granted or it times out
#[derive(Debug)]
struct QueuedRequest {
    enqueued_at: Instant,
    sender: oneshot::Sender<Admission>,
}

#[derive(Debug)]
struct LimiterState {
    bucket: TokenBucket,
    queue: VecDeque<QueuedRequest>,
    backoff_until: Option<Instant>,
    consecutive_rate_limits: u32,
    total_granted: u64,
    total_timed_out: u64,
    closed: bool,
}

/// What one drain tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub granted: usize,
    pub expired: usize,
    pub abandoned: usize,
}

/// Global token-bucket limiter with a FIFO waiter queue
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            "Initializing token bucket limiter: {} req / {:?}, max wait {:?}",
            config.capacity, config.window, config.max_wait_time
        );

        let bucket = TokenBucket::new(config.capacity, config.window, Instant::now());
        Self {
            config,
            state: Mutex::new(LimiterState {
                bucket,
                queue: VecDeque::new(),
                backoff_until: None,
                consecutive_rate_limits: 0,
                total_granted: 0,
                total_timed_out: 0,
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Waits for one token.
    ///
    /// Takes a token immediately when nobody is queued ahead; otherwise the
    /// caller joins the back of the queue until a drain tick grants or expires it.
    pub async fn acquire(&self) -> Admission {
        let (receiver, enqueued_at) = {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            if state.closed {
                return Admission::TimedOut {
                    waited: Duration::ZERO,
                };
            }

            if state.queue.is_empty() && state.bucket.try_take(now) {
                state.total_granted += 1;
                return Admission::Granted {
                    waited: Duration::ZERO,
                };
            }

            let (sender, receiver) = oneshot::channel();
            state.queue.push_back(QueuedRequest {
                enqueued_at: now,
                sender,
            });
            debug!(
                "Queued request for a rate-limit token (queue size: {}, tokens: {:.3})",
                state.queue.len(),
                state.bucket.tokens()
            );
            (receiver, now)
        };

        match receiver.await {
            Ok(admission) => admission,
            // Sender dropped without an answer: the limiter went away
            Err(_) => Admission::TimedOut {
                waited: enqueued_at.elapsed(),
            },
        }
    }

    /// Takes a token only if one is available right now and nobody is waiting
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed || !state.queue.is_empty() {
            return false;
        }
        let granted = state.bucket.try_take(Instant::now());
        if granted {
            state.total_granted += 1;
        }
        granted
    }

    /// One scheduler tick: expire overdue waiters, then grant tokens oldest-first.
    ///
    /// Expiry runs before granting, so a waiter past `max_wait_time` times out
    /// even if a token became available on this very tick.
    pub async fn drain(&self) -> DrainReport {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let max_wait = self.config.max_wait_time;
        let mut report = DrainReport::default();

        let mut kept = VecDeque::with_capacity(state.queue.len());
        while let Some(request) = state.queue.pop_front() {
            let waited = now.saturating_duration_since(request.enqueued_at);
            if waited > max_wait {
                let _ = request.sender.send(Admission::TimedOut { waited });
                report.expired += 1;
            } else if request.sender.is_closed() {
                report.abandoned += 1;
            } else {
                kept.push_back(request);
            }
        }
        state.queue = kept;
        state.total_timed_out += report.expired as u64;

        while !state.queue.is_empty() && state.bucket.try_take(now) {
            let Some(request) = state.queue.pop_front() else {
                break;
            };
            let waited = now.saturating_duration_since(request.enqueued_at);
            if request.sender.send(Admission::Granted { waited }).is_ok() {
                state.total_granted += 1;
                report.granted += 1;
            } else {
                state.bucket.refund();
                report.abandoned += 1;
            }
        }

        if report.expired > 0 {
            warn!(
                "Rate limiter expired {} waiters after {:?} (queue size: {})",
                report.expired,
                max_wait,
                state.queue.len()
            );
        }
        if report.granted > 0 {
            debug!(
                "Rate limiter granted {} queued requests (queue size: {})",
                report.granted,
                state.queue.len()
            );
        }

        report
    }

    /// Provider answered 429: empty the bucket and back off exponentially
    pub async fn on_rate_limited(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_rate_limits += 1;

        let exponent = state.consecutive_rate_limits.saturating_sub(1).min(16);
        let backoff = self
            .config
            .backoff_base
            .saturating_mul(2_u32.pow(exponent))
            .min(self.config.backoff_max);

        let until = Instant::now() + backoff;
        state.backoff_until = Some(until);
        state.bucket.pause_until(until);

        warn!(
            "Provider rate limit hit! Consecutive hits: {}, backing off for {:?}",
            state.consecutive_rate_limits, backoff
        );
    }

    /// Resets the consecutive 429 counter after a successful call
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_rate_limits > 0 {
            debug!("Provider rate limit counter reset");
            state.consecutive_rate_limits = 0;
        }
    }

    /// Stops admitting and resolves every waiter with a timeout outcome
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        let now = Instant::now();
        let pending = state.queue.len();
        while let Some(request) = state.queue.pop_front() {
            let waited = now.saturating_duration_since(request.enqueued_at);
            let _ = request.sender.send(Admission::TimedOut { waited });
        }
        if pending > 0 {
            info!("Rate limiter closed, released {} waiters", pending);
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.bucket.refill(now);

        LimiterStats {
            capacity: state.bucket.capacity(),
            tokens: state.bucket.tokens(),
            refill_rate_per_ms: state.bucket.refill_rate_per_ms(),
            queue_len: state.queue.len(),
            total_granted: state.total_granted,
            total_timed_out: state.total_timed_out,
            consecutive_rate_limits: state.consecutive_rate_limits,
            backoff_remaining_ms: state
                .backoff_until
                .filter(|until| *until > now)
                .map(|until| until.duration_since(now).as_millis() as u64),
            next_token_in_ms: state.bucket.time_until_token(now).as_millis() as u64,
        }
    }
}

/// Rate limiting statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    pub capacity: f64,
    pub tokens: f64,
    pub refill_rate_per_ms: f64,
    pub queue_len: usize,
    pub total_granted: u64,
    pub total_timed_out: u64,
    pub consecutive_rate_limits: u32,
    pub backoff_remaining_ms: Option<u64>,
    pub next_token_in_ms: u64,
}

impl std::fmt::Display for LimiterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tokens: {:.2}/{}, queue: {}, granted: {}, timed out: {}, backoff: {:?}",
            self.tokens,
            self.capacity,
            self.queue_len,
            self.total_granted,
            self.total_timed_out,
            self.backoff_remaining_ms
        )
    }
}
