use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::limiter::StrictLimiter;

/// Classified failure of one external call attempt, produced by the call
/// adapter. The executor switches on the tag; nothing downstream matches on
/// exception-like hierarchies.
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error("remote rate limit hit")]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("server error: status {status}")]
    Server { status: u16 },
    #[error("client error: status {status}")]
    Client { status: u16 },
    #[error("unexpected failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

/// What a rate-limited call ultimately produced.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    /// Retries exhausted; the caller gets a degraded result, not an error.
    Unavailable,
    /// Client-class failure: retrying can never succeed.
    Rejected { status: u16 },
}

impl<T> CallOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Used when a rate-limit response carries no advised delay.
    pub rate_limit_fallback: Duration,
    pub timeout_base: Duration,
    pub connection_base: Duration,
    pub server_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_fallback: Duration::from_secs(60),
            timeout_base: Duration::from_secs(5),
            connection_base: Duration::from_secs(3),
            server_base: Duration::from_secs(2),
        }
    }
}

/// Per-attempt state, kept only for the retry log line.
#[derive(Debug)]
struct RetryContext {
    attempt: u32,
    delay: Duration,
}

/// Wraps an external call with a shared rate ceiling and a per-class retry
/// policy. The limiter slot is acquired once, before the attempt loop, so
/// retries of one call do not consume additional admission slots.
pub struct RateLimitedExecutor {
    limiter: Arc<StrictLimiter>,
    policy: RetryPolicy,
}

impl RateLimitedExecutor {
    pub fn new(limiter: Arc<StrictLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(&self, label: &str, mut call: F) -> CallOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallFailure>>,
    {
        self.limiter.acquire().await;
        for attempt in 1..=self.policy.max_attempts {
            match call(attempt).await {
                Ok(value) => return CallOutcome::Success(value),
                Err(CallFailure::Client { status }) => {
                    tracing::error!(label, attempt, status, "client error, not retrying");
                    return CallOutcome::Rejected { status };
                }
                Err(failure) => {
                    if let CallFailure::Unexpected(error) = &failure {
                        tracing::error!(label, attempt, ?error, "unexpected failure");
                    }
                    if attempt < self.policy.max_attempts {
                        let context = RetryContext {
                            attempt,
                            delay: self.backoff_delay(&failure, attempt),
                        };
                        tracing::warn!(label, %failure, ?context, "attempt failed, backing off");
                        tokio::time::sleep(context.delay).await;
                    } else {
                        tracing::error!(label, %failure, attempt, "attempts exhausted, degrading");
                    }
                }
            }
        }
        CallOutcome::Unavailable
    }

    fn backoff_delay(&self, failure: &CallFailure, attempt: u32) -> Duration {
        match failure {
            CallFailure::RateLimited { retry_after } => {
                (*retry_after).unwrap_or(self.policy.rate_limit_fallback)
            }
            CallFailure::Timeout => self.policy.timeout_base * attempt,
            CallFailure::Connection(_) => self.policy.connection_base * attempt,
            CallFailure::Server { .. } | CallFailure::Unexpected(_) => {
                self.policy.server_base * attempt
            }
            CallFailure::Client { .. } => Duration::ZERO,
        }
    }
}
