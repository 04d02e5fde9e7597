//! Mutation token broker
//!
//! [`TokenBroker`] owns change-token acquisition. Each attempt fetches a
//! fresh token and moves it into exactly one remote call; the token never
//! leaves the attempt that acquired it.
//!
//! # Retry semantics
//! - `StaleToken` from the call: retried with exponential backoff + jitter
//! - token fetch failure: retried the same way
//! - any other remote error: returned immediately
//! - attempt budget spent: [`BrokerError::ContentionExhausted`] or
//!   [`BrokerError::TokenUnavailable`], depending on the last failure
//! - deadline reached: [`BrokerError::Cancelled`], no further attempts

use crate::config::RetryPolicy;
use crate::error::{BrokerError, RemoteError};
use crate::remote::{ChangeToken, EntityId, TokenSource};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Why an attempt failed in a retryable way
enum Retryable {
    Conflict(RemoteError),
    Fetch(RemoteError),
}

/// Acquire-call-retry cycle around single-use change tokens
pub struct TokenBroker {
    source: Arc<dyn TokenSource>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenBroker {
    /// Create broker over a token source
    #[inline]
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Retry policy in effect
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` under a fresh token, retrying on conflict
    ///
    /// # Errors
    /// See module docs
    pub async fn with_token<T, F, Fut>(&self, entity: &EntityId, call: F) -> Result<T, BrokerError>
    where
        F: FnMut(ChangeToken) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.with_token_until(entity, None, call).await
    }

    /// Like [`with_token`](Self::with_token), abandoning attempts at `deadline`
    ///
    /// The deadline bounds token fetches, remote calls and backoff sleeps.
    /// If waiting out the next backoff would cross it, the broker gives up
    /// immediately.
    ///
    /// # Errors
    /// See module docs
    #[tracing::instrument(level = "debug", skip(self, entity, deadline, call), fields(entity = %entity))]
    pub async fn with_token_until<T, F, Fut>(
        &self,
        entity: &EntityId,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, BrokerError>
    where
        F: FnMut(ChangeToken) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let cancelled = || BrokerError::Cancelled {
                entity: entity.clone(),
                attempts: attempt,
            };

            // this attempt never started
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BrokerError::Cancelled {
                    entity: entity.clone(),
                    attempts: attempt - 1,
                });
            }

            let failure = match within(deadline, self.source.fetch_token()).await {
                None => return Err(cancelled()),
                Some(Err(e)) => Retryable::Fetch(e),
                Some(Ok(token)) => match within(deadline, call(token)).await {
                    None => return Err(cancelled()),
                    Some(Ok(value)) => {
                        if attempt > 1 {
                            tracing::debug!(attempt, "mutation accepted after retry");
                        }
                        return Ok(value);
                    }
                    Some(Err(e)) if e.is_conflict() => Retryable::Conflict(e),
                    Some(Err(e)) => return Err(BrokerError::Remote(e)),
                },
            };

            if attempt >= max_attempts {
                return Err(match failure {
                    Retryable::Conflict(last) => {
                        tracing::warn!(attempts = attempt, "change token contention exhausted");
                        BrokerError::ContentionExhausted {
                            entity: entity.clone(),
                            attempts: attempt,
                            last,
                        }
                    }
                    Retryable::Fetch(last) => BrokerError::TokenUnavailable {
                        entity: entity.clone(),
                        attempts: attempt,
                        last,
                    },
                });
            }

            let delay = self.policy.jittered_delay(attempt, &mut rand::rng());
            match &failure {
                Retryable::Conflict(e) => {
                    tracing::warn!(attempt, ?delay, error = %e, "stale change token, retrying");
                }
                Retryable::Fetch(e) => {
                    tracing::warn!(attempt, ?delay, error = %e, "token fetch failed, retrying");
                }
            }

            if let Some(d) = deadline {
                if Instant::now() + delay >= d {
                    return Err(cancelled());
                }
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// Await `fut`, or `None` once `deadline` passes
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(d) => tokio::time::timeout_at(d, fut).await.ok(),
        None => Some(fut.await),
    }
}
