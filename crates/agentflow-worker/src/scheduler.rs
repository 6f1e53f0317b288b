// Scheduler
//
// Polls the store for due scheduled workflows and runs each one through the
// executor. Claiming and re-arming are split: the store's claim makes a due
// workflow invisible to other scans, and `mark_executed` after the run
// computes the next slot strictly after the trigger time (or disables the
// schedule for `once` / exhausted workflows).
//
// One workflow failing its run never stops the scan; the failure is already
// recorded on the workflow itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use agentflow_core::{Result, StepStatus, Workflow, WorkflowStatus, WorkflowStore};

use crate::executor::WorkflowExecutor;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Upper bound on workflows claimed per scan
    pub claim_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            claim_limit: 10,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<WorkflowExecutor>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<WorkflowExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            executor,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the polling loop. Runs until `shutdown()` is called.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Starting scheduler"
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        if let Err(e) = self.scan_once().await {
                            error!(error = %e, "Scheduler scan failed");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One scan: claim due workflows and run each to its settled state
    pub async fn scan_once(&self) -> Result<()> {
        let now = Utc::now();
        let due = self
            .store
            .claim_due_workflows(now, self.config.claim_limit)
            .await?;

        if due.is_empty() {
            return Ok(());
        }
        info!(count = due.len(), "Claimed due workflows");

        for workflow in due {
            let workflow_id = workflow.id;
            if let Err(e) = self.run_scheduled(workflow).await {
                warn!(%workflow_id, error = %e, "Scheduled run failed");
            }
        }
        Ok(())
    }

    /// Re-run one claimed workflow: reset its step plan for a fresh pass,
    /// execute, then record the trigger and re-arm the schedule.
    async fn run_scheduled(&self, workflow: Workflow) -> Result<()> {
        let workflow_id = workflow.id;
        let trigger_time = Utc::now();

        let mut fresh = workflow;
        for step in &mut fresh.steps {
            if step.status != StepStatus::PendingConfirmation {
                step.reset();
            }
        }
        fresh.status = WorkflowStatus::Approved;
        fresh.current_step = None;
        fresh.completed_at = None;
        self.store.save_workflow(&fresh).await?;
        for step in fresh.steps.clone() {
            self.store.save_step(workflow_id, &step).await?;
        }

        let run_outcome = self.executor.execute_workflow(workflow_id, None).await;

        // Re-arm regardless of the run outcome so a failing workflow does not
        // fire on every scan
        if let Some(mut current) = self.store.load_workflow(workflow_id).await? {
            current.mark_executed(trigger_time);
            self.store.save_workflow(&current).await?;
        }

        run_outcome
    }
}
