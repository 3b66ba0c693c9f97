use crate::error::{Result, SiftError};
use once_cell::sync::Lazy;
use rand::Rng;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock as StdRwLock},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 5.0;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Failures older than this no longer contribute a cooldown.
const FAILURE_MEMORY: Duration = Duration::from_secs(5 * 60);
/// A success only clears the failure counter once the last failure is at
/// least this old.
const SUCCESS_RESET_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RateLimiterConfig {
    /// Service-specific defaults, observable in the startup logs.
    pub fn for_service(service: &str) -> Self {
        match service {
            "ec2" | "cloudwatch" | "elasticloadbalancing" => Self {
                requests_per_second: 35.0,
                ..Default::default()
            },
            "iam" => Self {
                requests_per_second: 35.0,
                base_delay: Duration::from_secs(1),
                ..Default::default()
            },
            "pricing" => Self {
                requests_per_second: 5.0,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    /// Fractional token accumulator, refilled at `requests_per_second`.
    available: f64,
    last_refill: Instant,
}

#[derive(Debug, Default)]
struct FailureState {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    backoff_reset_at: Option<Instant>,
}

/// Adaptive token-bucket limiter with exponential-backoff cooldown shared
/// by every waiter. Failures are reported by the caller via `on_failure`;
/// the limiter has no side-effect on the operation itself.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    capacity: f64,
    bucket: Mutex<BucketState>,
    // Hot-path reads; never held across an await.
    failures: StdRwLock<FailureState>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let capacity = config.requests_per_second.ceil().max(1.0);
        Self {
            name: name.into(),
            config,
            capacity,
            bucket: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
            }),
            failures: StdRwLock::new(FailureState::default()),
        }
    }

    /// Block until a token is available, honoring any active failure
    /// cooldown first. Returns `Cancelled` as soon as the token observes
    /// cancellation during either wait.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(cooldown) = self.current_cooldown() {
            debug!(
                limiter = %self.name,
                cooldown_ms = cooldown.as_millis() as u64,
                "Rate limiter backing off after failures"
            );
            tokio::select! {
                _ = tokio::time::sleep(cooldown) => {}
                _ = cancel.cancelled() => return Err(SiftError::Cancelled),
            }
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.available =
                    (bucket.available + elapsed * self.config.requests_per_second).min(self.capacity);
                bucket.last_refill = now;

                if bucket.available >= 1.0 {
                    bucket.available -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64(
                    (1.0 - bucket.available) / self.config.requests_per_second,
                )
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(SiftError::Cancelled),
            }
        }
    }

    /// Clear the failure counter, but only once the last failure is at
    /// least one minute old.
    pub fn on_success(&self) {
        let mut state = self.failures.write().unwrap();
        match state.last_failure_at {
            Some(last) if last.elapsed() < SUCCESS_RESET_AGE => {}
            _ => {
                if state.consecutive_failures > 0 {
                    debug!(limiter = %self.name, "Failure counter reset after sustained success");
                }
                state.consecutive_failures = 0;
                state.backoff_reset_at = Some(Instant::now());
            }
        }
    }

    /// Record a throttling/transient failure, saturating the counter at
    /// `max_retries`.
    pub fn on_failure(&self) {
        let mut state = self.failures.write().unwrap();
        state.consecutive_failures =
            (state.consecutive_failures + 1).min(self.config.max_retries);
        state.last_failure_at = Some(Instant::now());
        warn!(
            limiter = %self.name,
            consecutive_failures = state.consecutive_failures,
            "Rate limiter recorded failure"
        );
    }

    /// Cooldown derived from the failure counter:
    /// `base × 2^(failures-1)` clamped to `max_delay`, and zero once the
    /// last failure is more than five minutes old.
    pub fn current_cooldown(&self) -> Option<Duration> {
        let state = self.failures.read().unwrap();
        if state.consecutive_failures == 0 {
            return None;
        }
        let last = state.last_failure_at?;
        if last.elapsed() > FAILURE_MEMORY {
            return None;
        }
        let exponent = (state.consecutive_failures - 1).min(20);
        let cooldown = self
            .config
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);
        Some(cooldown)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.read().unwrap().consecutive_failures
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    #[cfg(test)]
    fn backdate_last_failure(&self, age: Duration) {
        let mut state = self.failures.write().unwrap();
        state.last_failure_at = Instant::now().checked_sub(age);
    }
}

/// Configuration for a per-API minimum-interval limiter.
#[derive(Debug, Clone)]
pub struct ServiceLimiterConfig {
    pub default_requests_per_second: f64,
    pub per_api_limits: HashMap<String, f64>,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ServiceLimiterConfig {
    fn default() -> Self {
        Self {
            default_requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            per_api_limits: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Enforces a minimum interval per API name and wraps each call in
/// retry-with-backoff on provider throttling errors. Used where APIs have
/// strict declared rates (the price service in particular).
#[derive(Debug)]
pub struct ServiceLimiter {
    service: String,
    config: ServiceLimiterConfig,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl ServiceLimiter {
    pub fn new(service: impl Into<String>, config: ServiceLimiterConfig) -> Self {
        Self {
            service: service.into(),
            config,
            last_call: Mutex::new(HashMap::new()),
        }
    }

    fn rps_for(&self, api: &str) -> f64 {
        self.config
            .per_api_limits
            .get(api)
            .copied()
            .unwrap_or(self.config.default_requests_per_second)
            .max(0.001)
    }

    /// Pace the call to `api`'s declared rate, then invoke `op` with up to
    /// `max_retries` attempts, retrying only on throttling markers with an
    /// exponentially doubled, jittered delay.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        api: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let min_interval = Duration::from_secs_f64(1.0 / self.rps_for(api));
        let wait = {
            let mut calls = self.last_call.lock().await;
            let now = Instant::now();
            let wait = match calls.get(api) {
                Some(prev) => min_interval.saturating_sub(now.duration_since(*prev)),
                None => Duration::ZERO,
            };
            // Reserve the slot before sleeping so concurrent callers of the
            // same API space themselves out.
            calls.insert(api.to_string(), now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(SiftError::Cancelled),
            }
        }

        let mut delay = self.config.base_delay;
        for attempt in 1..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(SiftError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_throttling_error(&err) => {
                    warn!(
                        service = %self.service,
                        api,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Throttled, retrying with backoff: {err}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(with_jitter(delay)) => {}
                        _ = cancel.cancelled() => return Err(SiftError::Cancelled),
                    }
                    delay = delay.saturating_mul(2).min(self.config.max_delay);
                }
                Err(err) => return Err(err),
            }
        }

        Err(SiftError::MaxRetriesExceeded {
            api: format!("{}:{}", self.service, api),
        })
    }
}

/// Provider throttling markers, matched case-insensitively against the
/// error text.
pub fn is_throttling_error(err: &SiftError) -> bool {
    const MARKERS: [&str; 4] = [
        "throttling",
        "rate exceeded",
        "limit exceeded",
        "too many requests",
    ];
    let message = err.to_string().to_lowercase();
    MARKERS.iter().any(|marker| message.contains(marker))
}

/// ±10% jitter so backed-off retries from concurrent tasks do not align.
fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    delay.mul_f64(factor)
}

static TOKEN_LIMITERS: Lazy<StdRwLock<HashMap<String, Arc<RateLimiter>>>> =
    Lazy::new(|| StdRwLock::new(HashMap::new()));

static SERVICE_LIMITERS: Lazy<StdRwLock<HashMap<String, Arc<ServiceLimiter>>>> =
    Lazy::new(|| StdRwLock::new(HashMap::new()));

/// Process-wide token-bucket limiter keyed `account|region|service`,
/// created lazily with the service's default configuration.
pub fn scan_limiter(account_id: &str, region: &str, service: &str) -> Arc<RateLimiter> {
    let key = format!("{account_id}|{region}|{service}");
    if let Some(limiter) = TOKEN_LIMITERS.read().unwrap().get(&key) {
        return limiter.clone();
    }
    let mut limiters = TOKEN_LIMITERS.write().unwrap();
    limiters
        .entry(key.clone())
        .or_insert_with(|| {
            let config = RateLimiterConfig::for_service(service);
            debug!(
                limiter = %key,
                requests_per_second = config.requests_per_second,
                max_retries = config.max_retries,
                "Registered rate limiter"
            );
            Arc::new(RateLimiter::new(key, config))
        })
        .clone()
}

/// Process-wide per-API limiter keyed by service name.
pub fn service_limiter(service: &str, config: ServiceLimiterConfig) -> Arc<ServiceLimiter> {
    if let Some(limiter) = SERVICE_LIMITERS.read().unwrap().get(service) {
        return limiter.clone();
    }
    let mut limiters = SERVICE_LIMITERS.write().unwrap();
    limiters
        .entry(service.to_string())
        .or_insert_with(|| Arc::new(ServiceLimiter::new(service, config)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(rps: f64) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: rps,
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
        }
    }

    #[tokio::test]
    async fn burst_drains_capacity_then_paces() {
        let limiter = RateLimiter::new("test", quick_config(10.0));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait(&cancel).await.unwrap();
        }
        // Full bucket: the burst is effectively instantaneous.
        assert!(start.elapsed() < Duration::from_millis(50));

        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        // The eleventh token must wait for a refill (~100ms at 10 rps).
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn wait_observes_cancellation() {
        let limiter = RateLimiter::new("test", quick_config(1.0));
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        cancel.cancel();
        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, SiftError::Cancelled));
    }

    #[test]
    fn cooldown_doubles_and_clamps() {
        let limiter = RateLimiter::new("test", quick_config(5.0));
        assert!(limiter.current_cooldown().is_none());

        limiter.on_failure();
        assert_eq!(limiter.current_cooldown(), Some(Duration::from_millis(10)));
        limiter.on_failure();
        assert_eq!(limiter.current_cooldown(), Some(Duration::from_millis(20)));
        limiter.on_failure();
        assert_eq!(limiter.current_cooldown(), Some(Duration::from_millis(40)));
        limiter.on_failure();
        // Clamped to max_delay.
        assert_eq!(limiter.current_cooldown(), Some(Duration::from_millis(80)));
        limiter.on_failure();
        assert_eq!(limiter.current_cooldown(), Some(Duration::from_millis(80)));
    }

    #[test]
    fn failure_counter_saturates_at_max_retries() {
        let limiter = RateLimiter::new("test", quick_config(5.0));
        for _ in 0..20 {
            limiter.on_failure();
        }
        assert_eq!(limiter.consecutive_failures(), 5);
    }

    #[test]
    fn stale_failures_stop_contributing_cooldown() {
        let limiter = RateLimiter::new("test", quick_config(5.0));
        limiter.on_failure();
        limiter.backdate_last_failure(Duration::from_secs(6 * 60));
        assert!(limiter.current_cooldown().is_none());
    }

    #[test]
    fn success_resets_only_after_a_quiet_minute() {
        let limiter = RateLimiter::new("test", quick_config(5.0));
        limiter.on_failure();
        limiter.on_failure();

        // Too soon after the failure: counter survives.
        limiter.on_success();
        assert_eq!(limiter.consecutive_failures(), 2);

        limiter.backdate_last_failure(Duration::from_secs(90));
        limiter.on_success();
        assert_eq!(limiter.consecutive_failures(), 0);
        assert!(limiter.current_cooldown().is_none());
    }

    #[test]
    fn throttling_markers_match_case_insensitively() {
        for message in [
            "Throttling: Rate exceeded",
            "RequestLimitExceeded: limit exceeded for DescribeVolumes",
            "HTTP 429 Too Many Requests",
        ] {
            assert!(is_throttling_error(&SiftError::Provider(message.to_string())));
        }
        assert!(!is_throttling_error(&SiftError::Provider(
            "AccessDenied: not authorized".to_string()
        )));
    }

    #[tokio::test]
    async fn service_limiter_retries_throttling_until_success() {
        let limiter = ServiceLimiter::new(
            "pricing",
            ServiceLimiterConfig {
                default_requests_per_second: 1000.0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let value = limiter
            .execute(&cancel, "GetProducts", || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SiftError::Provider("Throttling".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn service_limiter_gives_up_after_max_retries() {
        let limiter = ServiceLimiter::new(
            "pricing",
            ServiceLimiterConfig {
                default_requests_per_second: 1000.0,
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();

        let err = limiter
            .execute(&cancel, "GetProducts", || async {
                Err::<(), _>(SiftError::Provider("Rate exceeded".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SiftError::MaxRetriesExceeded { .. }));
    }

    #[tokio::test]
    async fn service_limiter_does_not_retry_other_errors() {
        let limiter = ServiceLimiter::new("ec2", ServiceLimiterConfig::default());
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let err = limiter
            .execute(&cancel, "DescribeInstances", || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err::<(), _>(SiftError::Provider("AccessDenied".to_string())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SiftError::Provider(_)));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn service_limiter_spaces_out_same_api_calls() {
        let limiter = ServiceLimiter::new(
            "pricing",
            ServiceLimiterConfig {
                default_requests_per_second: 20.0,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            limiter
                .execute(&cancel, "GetProducts", || async { Ok(()) })
                .await
                .unwrap();
        }
        // Two enforced 50ms gaps after the free first call.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn registries_hand_back_the_same_instance() {
        let a = scan_limiter("111122223333", "us-east-1", "ec2");
        let b = scan_limiter("111122223333", "us-east-1", "ec2");
        assert!(Arc::ptr_eq(&a, &b));

        let other = scan_limiter("111122223333", "us-west-2", "ec2");
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
