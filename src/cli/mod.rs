//! Command-line interface for calicovpp-e2e.
//!
//! Provides the full test run plus one command per stage, so a cluster
//! can be brought up once and exercised repeatedly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::ProcessRunner;
use crate::config::HarnessConfig;
use crate::core::{Orchestrator, RunLog, RunOptions};
use crate::domain::{PollCondition, RunResult, StageStatus};
use crate::suite::{CaseStatus, Suite, SuiteReport};

/// calicovpp-e2e - build, deploy and test Calico/VPP on a vagrant cluster
#[derive(Parser, Debug)]
#[command(name = "calicovpp-e2e")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: discover .calicovpp-e2e/config.yaml)
    #[arg(long, global = true, env = "CALICOVPP_TEST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, provision, push, deploy, test and clean up
    Run {
        /// Destroy the cluster during cleanup
        #[arg(long)]
        destroy_cluster: bool,

        /// Only run the named test case (repeatable)
        #[arg(long = "case")]
        cases: Vec<String>,
    },

    /// Build component images
    Build,

    /// Provision the cluster
    Up,

    /// Load images into the existing cluster
    Push,

    /// Apply the deployment manifest
    Deploy,

    /// Delete the deployment manifest
    Teardown,

    /// Run the test suite against an already-deployed cluster
    Test {
        /// Only run the named test case (repeatable)
        #[arg(long = "case")]
        cases: Vec<String>,
    },

    /// Wait for a pod to become network-ready
    Wait {
        namespace: String,
        pod: String,

        /// Seconds to wait (default: readiness timeout from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show the resolved configuration
    Config,

    /// Replay the event log of a recorded run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },
}

impl Cli {
    /// Execute the command and return the process exit code
    pub async fn execute(self) -> Result<i32> {
        let config = HarnessConfig::load(self.config.as_deref())?;

        match self.command {
            Commands::Run { destroy_cluster, cases } => run(config, destroy_cluster, &cases).await,
            Commands::Build => {
                let images = orchestrator(config).build_images().await?;
                for image in images {
                    println!("{}", image);
                }
                Ok(0)
            }
            Commands::Up => {
                let cluster = orchestrator(config).provision_cluster().await?;
                eprintln!("[Cluster up at {}]", cluster.project.display());
                Ok(0)
            }
            Commands::Push => {
                let orchestrator = orchestrator(config);
                let cluster = orchestrator.existing_cluster();
                orchestrator.push_images(&cluster, &orchestrator.expected_images()).await?;
                Ok(0)
            }
            Commands::Deploy => {
                let orchestrator = orchestrator(config);
                orchestrator.deploy(&orchestrator.existing_cluster()).await?;
                Ok(0)
            }
            Commands::Teardown => {
                let orchestrator = orchestrator(config);
                orchestrator.teardown(&orchestrator.existing_cluster()).await?;
                Ok(0)
            }
            Commands::Test { cases } => test(config, &cases).await,
            Commands::Wait {
                namespace,
                pod,
                timeout,
            } => wait(config, namespace, pod, timeout).await,
            Commands::Config => show_config(&config),
            Commands::Status { run_id } => show_status(&config, &run_id).await,
        }
    }
}

fn orchestrator(config: HarnessConfig) -> Orchestrator {
    Orchestrator::new(config, Arc::new(ProcessRunner::new()))
}

/// The standard suite narrowed to `cases`; unknown names are an error
fn select_suite(cases: &[String]) -> Result<Suite> {
    let suite = Suite::standard();
    let known = suite.names().iter().map(|n| n.to_string()).collect::<Vec<_>>();

    if let Some(unknown) = cases.iter().find(|c| !known.contains(c)) {
        anyhow::bail!("Unknown test case '{}' (available: {})", unknown, known.join(", "));
    }
    Ok(suite.filter(cases))
}

/// Token cancelled on Ctrl-C; only readiness waits observe it
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling readiness waits");
            cancel.cancel();
        }
    });
    token
}

async fn run(config: HarnessConfig, destroy_cluster: bool, cases: &[String]) -> Result<i32> {
    let orchestrator = orchestrator(config)
        .with_suite(select_suite(cases)?)
        .with_options(RunOptions { destroy_cluster });

    let result = orchestrator.run(&interrupt_token()).await;
    print_result(&result);
    Ok(result.exit_code())
}

async fn test(config: HarnessConfig, cases: &[String]) -> Result<i32> {
    let orchestrator = orchestrator(config).with_suite(select_suite(cases)?);
    let report = orchestrator
        .run_tests(&orchestrator.existing_cluster(), &interrupt_token())
        .await;

    print_report(&report);
    Ok(if report.passed() { 0 } else { 1 })
}

async fn wait(config: HarnessConfig, namespace: String, pod: String, timeout: Option<u64>) -> Result<i32> {
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.readiness.timeout());
    let orchestrator = orchestrator(config);
    let condition = PollCondition::within(namespace, pod, timeout);

    let ready = orchestrator
        .wait_for_pod(&orchestrator.existing_cluster(), &interrupt_token(), &condition)
        .await?;

    println!("{}", ready.ip);
    eprintln!("[Ready after {} observation(s), {}]", ready.attempts, ready.route);
    Ok(0)
}

fn print_report(report: &SuiteReport) {
    for case in &report.cases {
        let label = match case.status {
            CaseStatus::Passed => "PASS",
            CaseStatus::Failed => "FAIL",
            CaseStatus::Errored => "ERROR",
        };
        match case.message {
            Some(ref message) => println!("  {:<6} {} ({}ms): {}", label, case.name, case.duration_ms, message),
            None => println!("  {:<6} {} ({}ms)", label, case.name, case.duration_ms),
        }
    }
    println!(
        "{} passed, {} failed, {} errored",
        report.passed_count(),
        report.failed_count(),
        report.errored_count()
    );
}

fn print_result(result: &RunResult) {
    println!("Run ID: {}", result.id);
    println!("\nStages:");
    for record in &result.stages {
        let status = match record.status {
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        println!("  {:<18} {:<10} {}ms", record.stage, status, record.duration_ms);
    }

    if let Some(ref report) = result.suite {
        println!("\nTests:");
        print_report(report);
    }

    for warning in &result.cleanup_warnings {
        eprintln!("[Cleanup warning: {}]", warning);
    }

    match result.setup_failure {
        Some(ref failure) => eprintln!("\n[Run {} aborted: {}]", result.id, failure),
        None => eprintln!("\n[Run {} finished: {:?}]", result.id, result.state()),
    }
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &HarnessConfig) -> Result<i32> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(0)
}

/// Replay a run's event log
async fn show_status(config: &HarnessConfig, run_id_str: &str) -> Result<i32> {
    let run_id = Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))?;
    let results_dir = config
        .results_dir
        .as_deref()
        .context("No results_dir configured; runs are not being recorded")?;

    let events = RunLog::replay_run(results_dir, run_id).await?;

    println!("Run ID: {}", run_id);
    for event in &events {
        let stage = event.stage.as_deref().unwrap_or("-");
        print!("  {} {:<18} {:?}", event.timestamp.format("%H:%M:%S"), stage, event.event_type);
        if let Some(ms) = event.duration_ms {
            print!(" ({}ms)", ms);
        }
        println!();
        if let Some(ref error) = event.error {
            println!("      {}", error);
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "calicovpp-e2e",
            "run",
            "--destroy-cluster",
            "--case",
            "cni-pod-connectivity",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { destroy_cluster, cases } => {
                assert!(destroy_cluster);
                assert_eq!(cases, vec!["cni-pod-connectivity"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_wait_and_global_config() {
        let cli = Cli::try_parse_from([
            "calicovpp-e2e",
            "wait",
            "default",
            "cni-test",
            "--timeout",
            "30",
            "--config",
            "/tmp/config.yaml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.yaml")));
        match cli.command {
            Commands::Wait { namespace, pod, timeout } => {
                assert_eq!(namespace, "default");
                assert_eq!(pod, "cni-test");
                assert_eq!(timeout, Some(30));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_select_suite() {
        assert_eq!(select_suite(&[]).unwrap().names(), vec!["cni-pod-connectivity"]);
        assert!(select_suite(&["no-such-case".to_string()]).is_err());
    }
}
