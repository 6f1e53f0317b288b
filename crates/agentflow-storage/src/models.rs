// Database models (internal, may differ from the domain entities)

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use agentflow_core::{
    ExecutionStatus, ScheduleType, StepStatus, StepType, Workflow, WorkflowExecution,
    WorkflowStatus, WorkflowStep,
};

// ============================================
// Workflow rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_intent: String,
    pub status: String,
    pub current_step: Option<i32>,
    pub is_scheduled: bool,
    pub schedule_type: Option<String>,
    pub schedule_config: Option<sqlx::types::JsonValue>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub execution_count: i32,
    pub max_executions: Option<i32>,
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub user_interaction_message: Option<String>,
    pub user_interaction_required: Option<sqlx::types::JsonValue>,
    pub is_template: bool,
    pub template_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    /// Build the domain entity; `steps` must already be ordered by step number
    pub fn into_domain(self, steps: Vec<WorkflowStep>) -> Result<Workflow> {
        let status = WorkflowStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown workflow status '{}'", self.status))?;
        let schedule_type = self
            .schedule_type
            .as_deref()
            .map(|s| ScheduleType::parse(s).ok_or_else(|| anyhow!("unknown schedule type '{s}'")))
            .transpose()?;
        let schedule_config = self
            .schedule_config
            .map(serde_json::from_value)
            .transpose()?;

        Ok(Workflow {
            id: self.id,
            session_id: self.session_id,
            user_intent: self.user_intent,
            status,
            current_step: self.current_step,
            steps,
            is_scheduled: self.is_scheduled,
            schedule_type,
            schedule_config,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            execution_count: self.execution_count,
            max_executions: self.max_executions,
            requires_approval: self.requires_approval,
            approved_at: self.approved_at,
            approved_by: self.approved_by,
            user_interaction_message: self.user_interaction_message,
            user_interaction_required: self.user_interaction_required,
            is_template: self.is_template,
            template_name: self.template_name,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowStepRow {
    pub workflow_id: Uuid,
    pub step_number: i32,
    pub step_type: String,
    pub description: String,
    pub tool_name: Option<String>,
    pub tool_parameters: Option<sqlx::types::JsonValue>,
    pub requires_confirmation: bool,
    pub status: String,
    pub result: Option<sqlx::types::JsonValue>,
    pub error_message: Option<String>,
    pub email_details: Option<sqlx::types::JsonValue>,
    pub expected_output_format: Option<sqlx::types::JsonValue>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStepRow {
    pub fn into_domain(self) -> Result<WorkflowStep> {
        let step_type = StepType::parse(&self.step_type)
            .ok_or_else(|| anyhow!("unknown step type '{}'", self.step_type))?;
        let status = StepStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown step status '{}'", self.status))?;
        let expected_output_format = self
            .expected_output_format
            .map(serde_json::from_value)
            .transpose()?;

        Ok(WorkflowStep {
            step_number: self.step_number,
            step_type,
            description: self.description,
            tool_name: self.tool_name,
            tool_parameters: self.tool_parameters,
            requires_confirmation: self.requires_confirmation,
            status,
            result: self.result,
            error_message: self.error_message,
            email_details: self.email_details,
            expected_output_format,
            completed_at: self.completed_at,
        })
    }
}

// ============================================
// Execution rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub execution_number: i32,
    pub status: String,
    pub step_results: Option<sqlx::types::JsonValue>,
    pub context: Option<sqlx::types::JsonValue>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl WorkflowExecutionRow {
    pub fn into_domain(self) -> Result<WorkflowExecution> {
        let status = ExecutionStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown execution status '{}'", self.status))?;
        Ok(WorkflowExecution {
            id: self.id,
            workflow_id: self.workflow_id,
            execution_number: self.execution_number,
            status,
            step_results: self.step_results,
            context: self.context,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration_seconds,
        })
    }
}

// ============================================
// Status channel / documents / users
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct StatusMessageRow {
    pub session_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    pub path: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub token_valid_until: Option<DateTime<Utc>>,
}
