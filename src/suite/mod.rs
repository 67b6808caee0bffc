//! Functional test cases run against a deployed cluster.
//!
//! Each case runs in its own task: a failing case reports a failure, a
//! panicking case is reported as errored, and neither stops its siblings.

pub mod cni;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::Kubectl;
use crate::core::error::HarnessError;
use crate::core::poller::ReadinessPoller;

pub use cni::PodConnectivity;

/// What a test case gets to work with
pub struct TestContext {
    pub kubectl: Kubectl,
    pub poller: ReadinessPoller,
    /// Cancelled when the run is interrupted
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TestContext) -> Result<(), HarnessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    /// The case panicked
    Errored,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    pub status: CaseStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub cases: Vec<CaseOutcome>,
}

impl SuiteReport {
    fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(CaseStatus::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(CaseStatus::Failed)
    }

    pub fn errored_count(&self) -> usize {
        self.count(CaseStatus::Errored)
    }

    pub fn passed(&self) -> bool {
        self.failed_count() == 0 && self.errored_count() == 0
    }
}

/// An ordered set of test cases
#[derive(Clone, Default)]
pub struct Suite {
    cases: Vec<Arc<dyn TestCase>>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in functional checks
    pub fn standard() -> Self {
        Self::new().with_case(PodConnectivity::default())
    }

    pub fn with_case(mut self, case: impl TestCase + 'static) -> Self {
        self.cases.push(Arc::new(case));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Keep only cases named in `names`; an empty list keeps everything
    pub fn filter(self, names: &[String]) -> Self {
        if names.is_empty() {
            return self;
        }
        Self {
            cases: self
                .cases
                .into_iter()
                .filter(|c| names.iter().any(|n| n == c.name()))
                .collect(),
        }
    }

    /// Run every case in order and collect the outcomes
    pub async fn run(&self, ctx: Arc<TestContext>) -> SuiteReport {
        let mut report = SuiteReport::default();

        for case in &self.cases {
            let name = case.name().to_string();
            info!(case = %name, "Running test case");
            let started = Instant::now();

            let task_case = Arc::clone(case);
            let task_ctx = Arc::clone(&ctx);
            let joined = tokio::spawn(async move { task_case.run(&task_ctx).await }).await;

            let (status, message) = match joined {
                Ok(Ok(())) => (CaseStatus::Passed, None),
                Ok(Err(e)) => {
                    warn!(case = %name, error = %e, "Test case failed");
                    (CaseStatus::Failed, Some(e.to_string()))
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "test case task was cancelled".to_string()
                    };
                    error!(case = %name, %message, "Test case errored");
                    (CaseStatus::Errored, Some(message))
                }
            };

            report.cases.push(CaseOutcome {
                name,
                status,
                message,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            errored = report.errored_count(),
            "Test suite finished"
        );
        report
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Observe, RecordingRunner, ScriptedInspector};
    use crate::core::poller::PollPolicy;

    struct Passing;
    struct Failing;
    struct Panicking;

    #[async_trait]
    impl TestCase for Passing {
        fn name(&self) -> &str {
            "passing"
        }
        async fn run(&self, _ctx: &TestContext) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TestCase for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn run(&self, _ctx: &TestContext) -> Result<(), HarnessError> {
            Err(HarnessError::PodNotFound {
                namespace: "default".to_string(),
                pod: "ghost".to_string(),
            })
        }
    }

    #[async_trait]
    impl TestCase for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        async fn run(&self, _ctx: &TestContext) -> Result<(), HarnessError> {
            panic!("assertion blew up")
        }
    }

    fn context() -> Arc<TestContext> {
        Arc::new(TestContext {
            kubectl: Kubectl::new(RecordingRunner::succeeding()),
            poller: ReadinessPoller::new(ScriptedInspector::new([Observe::Ready]), PollPolicy::default()),
            cancel: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let suite = Suite::new()
            .with_case(Failing)
            .with_case(Panicking)
            .with_case(Passing);

        let report = suite.run(context()).await;

        let statuses: Vec<CaseStatus> = report.cases.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![CaseStatus::Failed, CaseStatus::Errored, CaseStatus::Passed]
        );
        assert_eq!(
            report.cases[1].message.as_deref(),
            Some("panicked: assertion blew up")
        );
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_filter_by_name() {
        let suite = Suite::new().with_case(Passing).with_case(Failing);

        let filtered = suite.clone().filter(&["passing".to_string()]);
        assert_eq!(filtered.names(), vec!["passing"]);

        let report = filtered.run(context()).await;
        assert!(report.passed());
        assert_eq!(report.passed_count(), 1);

        assert_eq!(suite.filter(&[]).names(), vec!["passing", "failing"]);
    }

    #[test]
    fn test_standard_suite() {
        assert_eq!(Suite::standard().names(), vec!["cni-pod-connectivity"]);
    }
}
