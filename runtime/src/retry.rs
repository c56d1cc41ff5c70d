//! Retry logic with exponential backoff for handling transient failures.
//!
//! The retry middleware stage is built on [`retry_while`]. It retries the
//! rest of the chain when a handler fails, waiting longer after each failure.
//!
//! # Example
//!
//! ```rust
//! use ticketflow_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(1))
//!     .multiplier(2.0)
//!     .build();
//!
//! let result = retry_with_backoff(&policy, || async {
//!     // Your fallible operation here
//!     Ok::<_, String>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 10 (so at most 11 attempts)
/// - `initial_delay`: 100ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `randomization_factor`: 0.0 (no jitter)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Relative jitter applied to each delay, in `0.0..=1.0`
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            randomization_factor: None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Total number of times an operation may run: the first attempt plus retries.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Calculate delay for a given retry number (0-based).
    ///
    /// Uses exponential backoff: delay = initial_delay * (multiplier ^ attempt)
    /// Capped at `max_delay`, then jittered by `randomization_factor`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        if self.randomization_factor <= 0.0 {
            return Duration::from_millis(capped_ms as u64);
        }

        let factor = self.randomization_factor.min(1.0);
        let jitter = rand::thread_rng().gen_range(-factor..=factor);
        Duration::from_millis((capped_ms * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    randomization_factor: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set relative jitter.
    #[must_use]
    pub const fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = Some(factor);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(10),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(1)),
            multiplier: self.multiplier.unwrap_or(2.0),
            randomization_factor: self.randomization_factor.unwrap_or(0.0),
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// Every failure before the last is logged at `warn`. Exhaustion is logged at
/// `warn` as well: reporting the final error is the caller's job.
///
/// # Returns
///
/// Returns `Ok(T)` if the operation succeeds within [`RetryPolicy::max_attempts`],
/// or `Err(E)` with the last error once all attempts are used.
///
/// # Example
///
/// ```rust
/// use ticketflow_runtime::retry::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<(), String> {
/// let policy = RetryPolicy::default();
///
/// let result = retry_with_backoff(&policy, || async {
///     Ok::<_, String>(42)
/// }).await?;
///
/// assert_eq!(result, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(policy, || true, operation).await
}

/// Like [`retry_with_backoff`], but gives up early once `keep_going` returns
/// `false`.
///
/// `keep_going` is checked before a backoff sleep starts and again when it
/// ends. An attempt or sleep already under way is never interrupted. Giving
/// up returns the last error.
pub async fn retry_while<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    keep_going: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn() -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }

                if !keep_going() {
                    tracing::info!(attempts = attempt + 1, error = %err, "Retry abandoned");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                if !keep_going() {
                    tracing::info!(attempts = attempt + 1, error = %err, "Retry abandoned");
                    return Err(err);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 10);
        assert_eq!(policy.max_attempts(), 11);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::default();

        // 100ms * 2^4 = 1600ms, capped at 1s
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .max_delay(Duration::from_secs(10))
            .randomization_factor(0.5)
            .build();

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_first_try() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(&policy, || {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Only called once
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(10))
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(&policy, || {
            let c = Arc::clone(&counter_clone);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(format!("Attempt {attempt} failed"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3); // 2 failures + 1 success
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(10))
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_backoff(&policy, || {
            let c = Arc::clone(&counter_clone);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(format!("failure {attempt}"))
            }
        })
        .await;

        // The last error is the one surfaced
        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_retry_while_stops_when_told() {
        let policy = RetryPolicy::builder()
            .max_retries(10)
            .initial_delay(Duration::from_millis(1))
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        // Stop once the second attempt has failed
        let result = retry_while(
            &policy,
            || counter.load(Ordering::SeqCst) < 2,
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(format!("failure {attempt}"))
                }
            },
        )
        .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_is_monotonic_and_capped(
                initial_ms in 1_u64..500,
                max_ms in 500_u64..5_000,
                multiplier in 1.0_f64..4.0,
                attempt in 0_usize..30,
            ) {
                let policy = RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(initial_ms))
                    .max_delay(Duration::from_millis(max_ms))
                    .multiplier(multiplier)
                    .build();

                let current = policy.delay_for_attempt(attempt);
                let next = policy.delay_for_attempt(attempt + 1);

                prop_assert!(current <= Duration::from_millis(max_ms));
                prop_assert!(next >= current);
            }
        }
    }
}
