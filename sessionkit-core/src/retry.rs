//! Retry policy for broker calls.
//!
//! Every broker call goes through [`with_retry`], which owns failure
//! classification:
//! - configuration errors and cancellations are returned immediately
//! - transient failures (network, timeout, service unavailable) are retried
//!   with linear backoff: `attempt * base_delay`
//! - anything unrecognized is returned without retrying

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::broker::BrokerError;

/// Message fragments that mark a broker failure as transient.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "unavailable",
    "connection",
    "unreachable",
    "503",
    "interrupted",
];

/// Message fragments that mark an otherwise unknown failure as a setup problem.
const CONFIGURATION_SIGNATURES: &[&str] = &[
    "developer_error",
    "developer console",
    "invalid client",
    "invalid_client",
    "not registered",
    "misconfigured",
];

const DEFAULT_SILENT_MAX_RETRIES: u32 = 2;
const DEFAULT_INTERACTIVE_MAX_RETRIES: u32 = 1;
const DEFAULT_SILENT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_INTERACTIVE_BASE_DELAY_MS: u64 = 1000;

/// How a broker failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Configuration,
    Cancellation,
    NonRetryable,
}

/// Classify a broker failure.
pub fn classify(err: &BrokerError) -> FailureClass {
    match err {
        BrokerError::UserCancelled { .. } => FailureClass::Cancellation,
        BrokerError::Configuration { .. } => FailureClass::Configuration,
        BrokerError::NoCredentialAvailable { .. } => FailureClass::NonRetryable,
        BrokerError::Unknown { message } => {
            let lower = message.to_ascii_lowercase();
            if CONFIGURATION_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
                FailureClass::Configuration
            } else if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
                FailureClass::Retryable
            } else {
                FailureClass::NonRetryable
            }
        }
    }
}

/// Retry limits for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryBudget {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Budgets for silent and interactive acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub silent: RetryBudget,
    pub interactive: RetryBudget,
}

impl RetryPolicy {
    pub fn new(silent: RetryBudget, interactive: RetryBudget) -> Self {
        Self {
            silent,
            interactive,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            silent: RetryBudget::new(
                DEFAULT_SILENT_MAX_RETRIES,
                Duration::from_millis(DEFAULT_SILENT_BASE_DELAY_MS),
            ),
            interactive: RetryBudget::new(
                DEFAULT_INTERACTIVE_MAX_RETRIES,
                Duration::from_millis(DEFAULT_INTERACTIVE_BASE_DELAY_MS),
            ),
        }
    }
}

/// Run `work`, retrying transient failures within `budget`.
///
/// `operation` is only used for logging.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    budget: RetryBudget,
    mut work: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match work().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        match classify(&err) {
            FailureClass::Retryable if attempt < budget.max_retries => {
                attempt += 1;
                let delay = budget.backoff(attempt);
                warn!(
                    "{} failed with transient error ({}); retry {}/{} in {:?}",
                    operation, err, attempt, budget.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            FailureClass::Retryable => {
                warn!(
                    "{} failed after {} retries: {}",
                    operation, budget.max_retries, err
                );
                return Err(err);
            }
            FailureClass::Configuration => {
                warn!("{} failed with configuration error, not retrying: {}", operation, err);
                return Err(err);
            }
            FailureClass::Cancellation => {
                debug!("{} cancelled", operation);
                return Err(err);
            }
            FailureClass::NonRetryable => {
                debug!("{} failed, not retryable: {}", operation, err);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn budget(max_retries: u32) -> RetryBudget {
        RetryBudget::new(max_retries, Duration::from_millis(100))
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&BrokerError::unknown("Network error: host unreachable")),
            FailureClass::Retryable
        );
        assert_eq!(
            classify(&BrokerError::unknown("Service Unavailable")),
            FailureClass::Retryable
        );
        assert_eq!(
            classify(&BrokerError::unknown("10: DEVELOPER_ERROR")),
            FailureClass::Configuration
        );
        assert_eq!(
            classify(&BrokerError::Configuration {
                message: "x".into()
            }),
            FailureClass::Configuration
        );
        assert_eq!(
            classify(&BrokerError::cancelled(None)),
            FailureClass::Cancellation
        );
        assert_eq!(
            classify(&BrokerError::unknown("weird")),
            FailureClass::NonRetryable
        );
    }

    #[test]
    fn test_backoff_is_linear() {
        let b = budget(3);
        assert_eq!(b.backoff(1), Duration::from_millis(100));
        assert_eq!(b.backoff(2), Duration::from_millis(200));
        assert_eq!(b.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_default_policy_budgets() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.silent.max_retries, 2);
        assert_eq!(policy.interactive.max_retries, 1);
        assert!(policy.silent.base_delay < policy.interactive.base_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry("silent", budget(2), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::unknown("timeout"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = with_retry("silent", budget(2), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BrokerError::unknown("connection reset"))
                } else {
                    Ok("token")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry("interactive", budget(5), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Configuration {
                    message: "unknown client".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(BrokerError::Configuration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry("interactive", budget(5), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::cancelled(None))
            }
        })
        .await;

        assert!(matches!(result, Err(BrokerError::UserCancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
