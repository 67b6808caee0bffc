//! In-memory fakes for the external-tool seams (testing only)
//!
//! Provides `RecordingRunner` and `ScriptedInspector`, which stand in for
//! real processes and a real cluster so the pipeline can be exercised
//! without make, vagrant or kubectl installed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::adapters::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use crate::core::error::HarnessError;
use crate::core::poller::{PodInspector, PodObservation};

type Responder = dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync;

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Records every command and answers with a caller-supplied closure.
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    respond: Box<Responder>,
}

impl RecordingRunner {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Every command exits 0 with empty output
    pub fn succeeding() -> Arc<Self> {
        Self::new(|_| Ok(CommandOutput::ok("")))
    }

    /// All commands run so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands whose program is `program`
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.respond)(spec)
    }
}

// ---------------------------------------------------------------------------
// ScriptedInspector
// ---------------------------------------------------------------------------

/// One scripted answer from [`ScriptedInspector`]
#[derive(Debug, Clone)]
pub enum Observe {
    Ready,
    NotReady(&'static str),
    NotFound,
    /// The query itself fails
    Fail,
    /// The query never returns
    Hang,
}

/// Plays back a script of observations; the last entry repeats forever.
pub struct ScriptedInspector {
    script: Mutex<VecDeque<Observe>>,
    calls: AtomicUsize,
}

impl ScriptedInspector {
    pub fn new(script: impl IntoIterator<Item = Observe>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Observe {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Observe::Fail)
        } else {
            script.front().cloned().unwrap_or(Observe::Fail)
        }
    }
}

#[async_trait]
impl PodInspector for ScriptedInspector {
    async fn observe(&self, _namespace: &str, _pod: &str) -> Result<PodObservation, HarnessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Observe::Ready => Ok(PodObservation::Ready {
                ip: "11.0.0.2".to_string(),
                route: "default via 169.254.0.1 dev eth0".to_string(),
            }),
            Observe::NotReady(reason) => Ok(PodObservation::NotReady {
                reason: reason.to_string(),
            }),
            Observe::NotFound => Ok(PodObservation::NotFound),
            Observe::Fail => Err(HarnessError::Query {
                detail: "connection refused".to_string(),
            }),
            Observe::Hang => std::future::pending().await,
        }
    }
}
