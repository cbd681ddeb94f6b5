//! # Retry
//!
//! Module providing a `RetryPolicy` struct to configure registration retrying.
use std::time;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::RegistryError;
use crate::types::{HealthCheckSpec, ServiceAddress, ServiceIdentity};
use crate::RegistryClient;

#[derive(Clone, Debug)]
/// A retry policy to determine how often, and how patiently, registration is attempted.
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(max_attempts: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(max_attempts, initial_interval)
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        RetryPolicyBuilder::default().provide()
    }

    /// Determine interval to wait after the given failed attempt number.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::no_retry()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
pub struct RetryPolicyBuilder {
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<time::Duration>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(max_attempts: u32, initial_interval: time::Duration) -> Self {
        Self {
            max_attempts,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn backoff_coefficient(mut self, coefficient: u32) -> RetryPolicyBuilder {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
        }
    }
}

/// How a cancellable registration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { attempts: u32 },
    /// `cancel` fired before any attempt succeeded. `in_flight` is set when a request
    /// was abandoned mid-call, in which case the registry may still hold the entry.
    Cancelled { attempts: u32, in_flight: bool },
}

/// Register through `client`, retrying per `policy` until an attempt succeeds, attempts
/// run out (the last error is returned) or `cancel` fires.
pub async fn register_with_retry<C: RegistryClient + ?Sized>(
    client: &C,
    identity: &ServiceIdentity,
    address: &ServiceAddress,
    health_check: &HealthCheckSpec,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RegistrationOutcome, RegistryError> {
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Ok(RegistrationOutcome::Cancelled {
                attempts: attempt - 1,
                in_flight: false,
            });
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(RegistrationOutcome::Cancelled {
                    attempts: attempt,
                    in_flight: true,
                });
            }
            result = client.register(identity, address, health_check) => result,
        };

        match result {
            Ok(()) => return Ok(RegistrationOutcome::Registered { attempts: attempt }),
            Err(error) if attempt < policy.max_attempts => {
                let backoff = policy.retry_interval(attempt);
                warn!(
                    instance_id = identity.instance_id(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "registration failed, retrying: {}",
                    error
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(RegistrationOutcome::Cancelled {
                            attempts: attempt,
                            in_flight: false,
                        });
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
