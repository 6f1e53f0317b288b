// WorkflowStep entity
//
// One unit of work within a workflow. Step numbers are 1-based, unique within
// a workflow, and define total execution order. A step's result, once set, is
// immutable except by re-execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Invoke a named tool with a parameter map
    ToolCall,
    /// Free-form or structured agent analysis
    Analysis,
    /// Evaluate a prior result and decide whether to retry
    Decision,
    /// Append a resolved message to the status channel
    Notification,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ToolCall => "tool_call",
            StepType::Analysis => "analysis",
            StepType::Decision => "decision",
            StepType::Notification => "notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_call" => Some(StepType::ToolCall),
            "analysis" => Some(StepType::Analysis),
            "decision" => Some(StepType::Decision),
            "notification" => Some(StepType::Notification),
            _ => None,
        }
    }
}

/// Per-step lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Halted awaiting an explicit human confirmation (e.g. a prepared email)
    PendingConfirmation,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
            StepStatus::PendingConfirmation => "pending_confirmation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            "cancelled" => Some(StepStatus::Cancelled),
            "pending_confirmation" => Some(StepStatus::PendingConfirmation),
            _ => None,
        }
    }

    /// Terminal per-step statuses; the next step never begins before the
    /// current one reaches one of these (or halts at PendingConfirmation).
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Cancelled
                | StepStatus::PendingConfirmation
        )
    }
}

/// One unit of work within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 1-based execution order, unique within the workflow
    pub step_number: i32,
    pub step_type: StepType,
    /// Natural-language instruction; may contain `{{...}}` placeholders
    pub description: String,
    /// Required for `tool_call` steps
    pub tool_name: Option<String>,
    /// Parameter map; values may contain placeholders
    pub tool_parameters: Option<Value>,
    /// Gate requiring human approval before proceeding; set dynamically,
    /// e.g. by email preparation
    pub requires_confirmation: bool,
    pub status: StepStatus,
    /// Output map, merged into the execution context on completion
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Populated only by the send-email two-phase flow
    pub email_details: Option<Value>,
    /// Named fields the step's analysis/decision output must contain
    pub expected_output_format: Option<Vec<String>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(step_number: i32, step_type: StepType, description: impl Into<String>) -> Self {
        Self {
            step_number,
            step_type,
            description: description.into(),
            tool_name: None,
            tool_parameters: None,
            requires_confirmation: false,
            status: StepStatus::Pending,
            result: None,
            error_message: None,
            email_details: None,
            expected_output_format: None,
            completed_at: None,
        }
    }

    /// Builder for a tool-call step
    pub fn tool_call(
        step_number: i32,
        description: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Value,
    ) -> Self {
        let mut step = Self::new(step_number, StepType::ToolCall, description);
        step.tool_name = Some(tool_name.into());
        step.tool_parameters = Some(parameters);
        step
    }

    pub fn complete(&mut self, result: Value) {
        self.result = Some(result);
        self.status = StepStatus::Completed;
        self.error_message = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Halt at this step until a human confirms it
    pub fn await_confirmation(&mut self, prepared: Value) {
        self.requires_confirmation = true;
        self.status = StepStatus::PendingConfirmation;
        self.result = Some(prepared);
    }

    /// Reset for re-execution; the only path that may overwrite a result
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
        self.error_message = None;
        self.completed_at = None;
    }

    /// Context key under which this step's result is visible to later steps
    pub fn context_key(&self) -> String {
        format!("step_{}", self.step_number)
    }
}
