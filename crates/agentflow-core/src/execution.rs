// WorkflowExecution audit record
//
// One row per full run-through of a workflow. Supports replay and history
// independent of the live workflow state: scheduled workflows accumulate one
// execution per due run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    WaitingUserInput,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::WaitingUserInput => "waiting_user_input",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            "waiting_user_input" => Some(ExecutionStatus::WaitingUserInput),
            _ => None,
        }
    }
}

/// Audit record of one run-through of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Monotonic per workflow
    pub execution_number: i32,
    pub status: ExecutionStatus,
    /// Snapshot of per-step results at the end of the run
    pub step_results: Option<Value>,
    /// Snapshot of the accumulated execution context
    pub context: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived on completion
    pub duration_seconds: Option<i64>,
}

impl WorkflowExecution {
    pub fn start(workflow_id: Uuid, execution_number: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            execution_number,
            status: ExecutionStatus::Running,
            step_results: None,
            context: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
        }
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_seconds());
    }

    pub fn complete(&mut self) {
        self.finish(ExecutionStatus::Completed);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.finish(ExecutionStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    /// Leave the run paused; no completion timestamp
    pub fn wait_for_user(&mut self) {
        self.status = ExecutionStatus::WaitingUserInput;
    }
}
