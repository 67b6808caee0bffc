//! Readiness polling for pods created by test cases.
//!
//! The poller asks a [`PodInspector`] about a pod at a growing interval
//! until the pod is network-ready, the deadline passes, or the caller
//! cancels. All waiting happens inside the caller's task: nothing is
//! spawned, so nothing outlives a cancelled or finished wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::error::HarnessError;
use crate::domain::PollCondition;

/// What one look at a pod found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodObservation {
    /// Interface, address and default route are all in place
    Ready { ip: String, route: String },

    /// The pod exists but some readiness clause is unmet
    NotReady { reason: String },

    /// The cluster API reports no such pod
    NotFound,
}

/// Answers "what state is this pod in right now"
#[async_trait]
pub trait PodInspector: Send + Sync {
    /// An `Err` is a failed query (API hiccup, bad output), not a verdict
    async fn observe(&self, namespace: &str, pod: &str) -> Result<PodObservation, HarnessError>;
}

/// Floor on the delay between observations
pub const MIN_INTERVAL_MS: u64 = 100;

/// Timing knobs for readiness waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Overall wait used when a caller does not give its own deadline
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Delay after the first observation (at least [`MIN_INTERVAL_MS`])
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Upper bound on the delay between observations
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Delay multiplier after each observation
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Consecutive "not found" observations before giving up on the pod
    #[serde(default = "default_not_found_grace")]
    pub not_found_grace: u32,

    /// Upper bound on a single observation
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    180
}
fn default_initial_interval() -> u64 {
    2000
}
fn default_max_interval() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    1.5
}
fn default_not_found_grace() -> u32 {
    5
}
fn default_query_timeout() -> u64 {
    20
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            not_found_grace: default_not_found_grace(),
            query_timeout_seconds: default_query_timeout(),
        }
    }
}

impl PollPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    /// Delay after observation number `attempt` (1-indexed), never below
    /// [`MIN_INTERVAL_MS`]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.max_interval_ms.max(MIN_INTERVAL_MS);
        if attempt <= 1 {
            return Duration::from_millis(self.initial_interval_ms.clamp(MIN_INTERVAL_MS, ceiling));
        }

        let delay = self.initial_interval_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(ceiling as f64).max(MIN_INTERVAL_MS as f64) as u64;
        Duration::from_millis(capped)
    }
}

/// A pod that passed the readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyPod {
    pub ip: String,
    pub route: String,
    /// Observations it took, including the successful one
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ReadinessPoller {
    inspector: Arc<dyn PodInspector>,
    policy: PollPolicy,
}

impl ReadinessPoller {
    pub fn new(inspector: Arc<dyn PodInspector>, policy: PollPolicy) -> Self {
        Self { inspector, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Block until the pod is ready.
    ///
    /// Returns `Timeout` on cancellation, when the deadline has already
    /// passed on entry, or when it passes without the pod ever being seen.
    /// Returns `PodNotReady` when the deadline passes after the pod was seen
    /// but never ready, and `PodNotFound` once the pod is reported missing
    /// `not_found_grace` times in a row. Failed queries are retried.
    #[instrument(skip(self, cancel, condition), fields(namespace = %condition.namespace, pod = %condition.pod))]
    pub async fn wait_for_pod(
        &self,
        cancel: &CancellationToken,
        condition: &PollCondition,
    ) -> Result<ReadyPod, HarnessError> {
        let timed_out = || HarnessError::Timeout {
            namespace: condition.namespace.clone(),
            pod: condition.pod.clone(),
        };

        if cancel.is_cancelled() || condition.is_expired() {
            return Err(timed_out());
        }

        let grace = self.policy.not_found_grace.max(1);
        let mut attempt = 0u32;
        let mut not_found = 0u32;
        let mut last_reason: Option<String> = None;

        loop {
            attempt += 1;
            let budget = condition.remaining().min(self.policy.query_timeout());

            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(timed_out()),
                observed = timeout(budget, self.inspector.observe(&condition.namespace, &condition.pod)) => observed,
            };

            match observed {
                Ok(Ok(PodObservation::Ready { ip, route })) => {
                    info!(attempt, %ip, "Pod ready");
                    return Ok(ReadyPod {
                        ip,
                        route,
                        attempts: attempt,
                    });
                }
                Ok(Ok(PodObservation::NotReady { reason })) => {
                    debug!(attempt, %reason, "Pod not ready yet");
                    not_found = 0;
                    last_reason = Some(reason);
                }
                Ok(Ok(PodObservation::NotFound)) => {
                    not_found += 1;
                    debug!(attempt, not_found, "Pod not found");
                    if not_found >= grace {
                        return Err(HarnessError::PodNotFound {
                            namespace: condition.namespace.clone(),
                            pod: condition.pod.clone(),
                        });
                    }
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Pod query failed, retrying");
                }
                Err(_) => {
                    warn!(attempt, budget_ms = budget.as_millis() as u64, "Pod query timed out, retrying");
                }
            }

            let remaining = condition.remaining();
            if remaining.is_zero() {
                return Err(self.expired(condition, last_reason, not_found));
            }

            let delay = self.policy.delay_for_attempt(attempt).min(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(timed_out()),
                _ = sleep(delay) => {}
            }

            if condition.is_expired() {
                return Err(self.expired(condition, last_reason, not_found));
            }
        }
    }

    /// Error for a deadline that ran out mid-wait
    fn expired(&self, condition: &PollCondition, last_reason: Option<String>, not_found: u32) -> HarnessError {
        let namespace = condition.namespace.clone();
        let pod = condition.pod.clone();
        match last_reason {
            Some(reason) => HarnessError::PodNotReady { namespace, pod, reason },
            None if not_found > 0 => HarnessError::PodNotFound { namespace, pod },
            None => HarnessError::Timeout { namespace, pod },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.timeout(), Duration::from_secs(180));
        assert_eq!(policy.query_timeout(), Duration::from_secs(20));
        assert_eq!(policy.not_found_grace, 5);
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let policy = PollPolicy {
            initial_interval_ms: 1000,
            backoff_multiplier: 2.0,
            max_interval_ms: 5000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000)); // Capped
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(5000));
    }

    #[test]
    fn test_interval_never_drops_below_floor() {
        let zero = PollPolicy {
            initial_interval_ms: 0,
            max_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(zero.delay_for_attempt(1), Duration::from_millis(MIN_INTERVAL_MS));
        assert_eq!(zero.delay_for_attempt(5), Duration::from_millis(MIN_INTERVAL_MS));

        for multiplier in [0.0, -2.0] {
            let policy = PollPolicy {
                backoff_multiplier: multiplier,
                ..Default::default()
            };
            assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(MIN_INTERVAL_MS));
        }
    }

    #[test]
    fn test_policy_yaml_defaults() {
        let policy: PollPolicy = serde_yaml::from_str("timeout_seconds: 30\n").unwrap();
        assert_eq!(policy.timeout_seconds, 30);
        assert_eq!(policy.initial_interval_ms, 2000);
        assert_eq!(policy.backoff_multiplier, 1.5);
    }
}
