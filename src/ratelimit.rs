//! Per-origin rate limiting for outbound source requests.
//!
//! Each origin owns a token bucket of `permits` tokens. A granted token
//! refills exactly `window` after it was granted, so no origin ever sees more
//! than `permits` grants inside any `window`-long interval.
//!
//! Requests to different origins never wait for each other. Waiters for the
//! same origin queue on a fair `tokio::sync::Mutex` and are served in arrival
//! order.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sourcekit_core::ratelimit::{RateBudget, RateLimiter};
//!
//! # async fn example() -> Result<(), sourcekit_core::TransportError> {
//! let limiter = RateLimiter::new(RateBudget::new(2, Duration::from_secs(1)));
//! limiter.set_budget("com-x.life", RateBudget::per_second(3));
//!
//! // Two immediate grants, the third waits for the first token to refill.
//! limiter.acquire("desu.me", None).await?;
//! limiter.acquire("desu.me", None).await?;
//! limiter.acquire("desu.me", Some(Duration::from_secs(5))).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::transport::TransportError;

/// Warning threshold for cumulative delay per origin.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value honored (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default permits per window for origins without an override.
pub const DEFAULT_PERMITS: u32 = 3;

/// Default refill window for origins without an override.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Permits per refill window for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    permits: u32,
    window: Duration,
}

impl RateBudget {
    /// Creates a budget. A zero permit count is raised to one.
    #[must_use]
    pub fn new(permits: u32, window: Duration) -> Self {
        Self {
            permits: permits.max(1),
            window,
        }
    }

    /// `permits` grants per second.
    #[must_use]
    pub fn per_second(permits: u32) -> Self {
        Self::new(permits, Duration::from_secs(1))
    }

    #[must_use]
    pub fn permits(&self) -> u32 {
        self.permits
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(DEFAULT_PERMITS, DEFAULT_WINDOW)
    }
}

/// Per-origin rate limiter shared by every source.
///
/// Designed to be wrapped in `Arc` and shared across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    default_budget: RateBudget,
    disabled: bool,
    /// Budgets declared by sources or configuration, keyed by origin.
    overrides: DashMap<String, RateBudget>,
    /// Per-origin state. The Arc lets callers release the `DashMap` shard
    /// lock before awaiting the inner Mutex.
    origins: DashMap<String, Arc<OriginState>>,
}

#[derive(Debug)]
struct OriginState {
    budget: RateBudget,
    /// Grant instants still inside the window. Locked for the whole wait so
    /// waiters queue in FIFO order.
    grants: Mutex<VecDeque<Instant>>,
    /// Server-mandated block. Never held across an await.
    blocked_until: std::sync::Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl OriginState {
    fn new(budget: RateBudget) -> Self {
        Self {
            budget,
            grants: Mutex::new(VecDeque::new()),
            blocked_until: std::sync::Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    fn blocked_until(&self) -> Option<Instant> {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn block_until(&self, until: Instant) {
        let mut guard = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none_or(|current| current < until) {
            *guard = Some(until);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter applying `default_budget` to every origin without an override.
    #[must_use]
    #[instrument(skip_all, fields(permits = default_budget.permits, window_ms = default_budget.window.as_millis()))]
    pub fn new(default_budget: RateBudget) -> Self {
        debug!("creating rate limiter");
        Self {
            default_budget,
            disabled: false,
            overrides: DashMap::new(),
            origins: DashMap::new(),
        }
    }

    /// Creates a limiter that grants every acquire immediately.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_budget: RateBudget::default(),
            disabled: true,
            overrides: DashMap::new(),
            origins: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn default_budget(&self) -> RateBudget {
        self.default_budget
    }

    /// Overrides the budget of one origin.
    ///
    /// Applies to acquires that start after the call.
    pub fn set_budget(&self, origin: &str, budget: RateBudget) {
        let origin = origin.to_ascii_lowercase();
        debug!(origin = %origin, permits = budget.permits, window_ms = budget.window.as_millis(), "setting origin budget");
        self.overrides.insert(origin.clone(), budget);
        self.origins.remove(&origin);
    }

    /// Budget in effect for `origin`.
    #[must_use]
    pub fn budget_for(&self, origin: &str) -> RateBudget {
        self.overrides
            .get(&origin.to_ascii_lowercase())
            .map_or(self.default_budget, |entry| *entry)
    }

    fn state_for(&self, origin: &str) -> Arc<OriginState> {
        let budget = self.budget_for(origin);
        self.origins
            .entry(origin.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(OriginState::new(budget)))
            .clone()
    }

    /// Waits for a permit for `origin`.
    ///
    /// A permit is consumed only when it is granted; a caller that times out
    /// or is dropped while waiting leaves the bucket untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] when `timeout` elapses first.
    #[instrument(skip(self))]
    pub async fn acquire(&self, origin: &str, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.disabled {
            return Ok(());
        }

        let state = self.state_for(origin);
        let wait = Self::wait_for_permit(&state, origin);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                debug!(origin = %origin, timeout_ms = limit.as_millis(), "timed out waiting for permit");
                TransportError::timeout(origin)
            }),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    async fn wait_for_permit(state: &OriginState, origin: &str) {
        let window = state.budget.window;
        let permits = state.budget.permits as usize;
        let mut grants = state.grants.lock().await;

        loop {
            let now = Instant::now();
            while grants.front().is_some_and(|granted| now.duration_since(*granted) >= window) {
                grants.pop_front();
            }

            let mut ready_at = now;
            if grants.len() >= permits
                && let Some(oldest) = grants.front()
            {
                ready_at = *oldest + window;
            }
            if let Some(until) = state.blocked_until()
                && until > ready_at
            {
                ready_at = until;
            }

            if ready_at <= now {
                grants.push_back(now);
                return;
            }

            let delay = ready_at - now;
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                origin = %origin,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    origin = %origin,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider reducing request volume to this origin"
                );
            }
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Records a server-mandated delay (from `Retry-After`) for `origin`.
    ///
    /// Every acquire for the origin waits until the delay has passed.
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, origin: &str, delay: Duration) {
        if self.disabled {
            return;
        }
        let state = self.state_for(origin);
        state.block_until(Instant::now() + delay.min(MAX_RETRY_AFTER));
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            origin = %origin,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                origin = %origin,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - site may be under heavy load"
            );
        }
    }
}

/// Extracts the rate-limit origin (lowercased host) from a URL.
///
/// Returns "unknown" for malformed URLs so they are still limited.
///
/// ```
/// use sourcekit_core::ratelimit::origin_of;
///
/// assert_eq!(origin_of("https://Desu.me/manga/api"), "desu.me");
/// assert_eq!(origin_of("https://localhost:8080/x"), "localhost");
/// assert_eq!(origin_of("not a url"), "unknown");
/// ```
#[must_use]
pub fn origin_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Returns `None` when unparseable; caps values at one hour.
///
/// ```
/// use std::time::Duration;
/// use sourcekit_core::ratelimit::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_zero_permits_raised_to_one() {
        assert_eq!(RateBudget::new(0, Duration::from_secs(1)).permits(), 1);
    }

    #[test]
    fn test_budget_override_is_case_insensitive() {
        let limiter = RateLimiter::new(RateBudget::default());
        limiter.set_budget("Com-X.life", RateBudget::per_second(3));
        assert_eq!(limiter.budget_for("com-x.life"), RateBudget::per_second(3));
        assert_eq!(limiter.budget_for("desu.me"), RateBudget::default());
    }

    #[tokio::test]
    async fn test_disabled_grants_immediately() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("desu.me", None).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_burst_up_to_permits_then_waits_for_refill() {
        tokio::time::pause();
        let limiter = RateLimiter::new(RateBudget::new(2, Duration::from_secs(1)));
        let start = Instant::now();

        limiter.acquire("desu.me", None).await.unwrap();
        limiter.acquire("desu.me", None).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire("desu.me", None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_origins_are_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new(RateBudget::new(1, Duration::from_secs(10)));
        limiter.acquire("a.com", None).await.unwrap();

        let start = Instant::now();
        limiter.acquire("b.com", None).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_timeout_does_not_consume_permit() {
        tokio::time::pause();
        let limiter = RateLimiter::new(RateBudget::new(1, Duration::from_secs(10)));
        limiter.acquire("desu.me", None).await.unwrap();

        let err = limiter
            .acquire("desu.me", Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));

        // The abandoned waiter left no grant behind: the next permit is
        // available exactly one window after the first grant.
        tokio::time::advance(Duration::from_secs(9)).await;
        let start = Instant::now();
        limiter.acquire("desu.me", None).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_recorded_retry_after_blocks_origin() {
        tokio::time::pause();
        let limiter = RateLimiter::new(RateBudget::per_second(10));
        limiter.record_rate_limit("desu.me", Duration::from_secs(30));

        let start = Instant::now();
        limiter.acquire("desu.me", None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));

        let start = Instant::now();
        limiter.acquire("other.org", None).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_served_in_arrival_order() {
        tokio::time::pause();
        let limiter = Arc::new(RateLimiter::new(RateBudget::new(1, Duration::from_secs(1))));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let start = Instant::now();

        let mut handles = Vec::new();
        for waiter in 0..4 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire("desu.me", None).await.unwrap();
                order.lock().unwrap().push((waiter, start.elapsed()));
            }));
            // Let the task reach the queue before the next one arrives.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let order = order.lock().unwrap().clone();
        let waiters: Vec<_> = order.iter().map(|(w, _)| *w).collect();
        assert_eq!(waiters, vec![0, 1, 2, 3]);
        for pair in order.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(990));
        }
    }

    #[test]
    fn test_parse_retry_after_caps_and_rejects() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("7200"), Some(MAX_RETRY_AFTER));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
