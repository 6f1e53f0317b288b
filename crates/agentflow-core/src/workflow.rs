// Workflow entity and lifecycle
//
// A Workflow is one user-initiated multi-step task: the parsed intent, the
// ordered step plan, scheduling and approval state. The executor mutates it
// on every step transition; the scheduler on every due run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::{next_run, ScheduleConfig, ScheduleType};
use crate::step::WorkflowStep;

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Approved,
    Running,
    WaitingUserInput,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Running => "running",
            WorkflowStatus::WaitingUserInput => "waiting_user_input",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(WorkflowStatus::Draft),
            "approved" => Some(WorkflowStatus::Approved),
            "running" => Some(WorkflowStatus::Running),
            "waiting_user_input" => Some(WorkflowStatus::WaitingUserInput),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never re-entered by the executor
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// One user-initiated multi-step task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    /// Correlates to a status channel and a client-polled handle
    pub session_id: Uuid,
    /// Free-text description of what the user asked for
    pub user_intent: String,
    pub status: WorkflowStatus,
    /// Step number in progress or last attempted; None before start
    pub current_step: Option<i32>,
    /// Ordered step plan, owned by this workflow
    pub steps: Vec<WorkflowStep>,

    // Scheduling
    pub is_scheduled: bool,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<ScheduleConfig>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub execution_count: i32,
    /// None means unlimited
    pub max_executions: Option<i32>,

    // Approval
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,

    // Pending user interaction
    pub user_interaction_message: Option<String>,
    pub user_interaction_required: Option<serde_json::Value>,

    // Templates (reuse of a saved step plan; execution logic is unaffected)
    pub is_template: bool,
    pub template_name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Create a new draft workflow from a parsed intent and step plan
    pub fn new(session_id: Uuid, user_intent: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            user_intent: user_intent.into(),
            status: WorkflowStatus::Draft,
            current_step: None,
            steps,
            is_scheduled: false,
            schedule_type: None,
            schedule_config: None,
            next_run_at: None,
            last_run_at: None,
            execution_count: 0,
            max_executions: None,
            requires_approval: false,
            approved_at: None,
            approved_by: None,
            user_interaction_message: None,
            user_interaction_required: None,
            is_template: false,
            template_name: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether execution may begin or resume.
    ///
    /// Draft workflows additionally require either `requires_approval == false`
    /// or a prior `approve()` call.
    pub fn can_execute(&self) -> bool {
        match self.status {
            WorkflowStatus::Approved | WorkflowStatus::WaitingUserInput => true,
            WorkflowStatus::Draft => !self.requires_approval || self.approved_at.is_some(),
            _ => false,
        }
    }

    /// Record an explicit approval
    pub fn approve(&mut self, by: Uuid) {
        self.status = WorkflowStatus::Approved;
        self.approved_at = Some(Utc::now());
        self.approved_by = Some(by);
    }

    pub fn start(&mut self) {
        self.status = WorkflowStatus::Running;
        self.user_interaction_message = None;
        self.user_interaction_required = None;
    }

    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = WorkflowStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = WorkflowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Pause until a human resolves the given interaction
    pub fn request_user_input(&mut self, message: impl Into<String>, context: serde_json::Value) {
        self.status = WorkflowStatus::WaitingUserInput;
        self.user_interaction_message = Some(message.into());
        self.user_interaction_required = Some(context);
    }

    /// Whether the scheduler may still trigger this workflow
    pub fn has_executions_left(&self) -> bool {
        match self.max_executions {
            Some(max) => self.execution_count < max,
            None => true,
        }
    }

    /// Record a scheduler-triggered run and recompute the next slot.
    ///
    /// `once` schedules disable themselves after the first run. All other
    /// schedule types recompute `next_run_at` strictly after `now` so the
    /// same slot never fires twice.
    pub fn mark_executed(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.execution_count += 1;

        match self.schedule_type {
            Some(ScheduleType::Once) | None => {
                self.is_scheduled = false;
                self.next_run_at = None;
            }
            Some(schedule_type) => {
                let config = self.schedule_config.clone().unwrap_or_default();
                self.next_run_at = next_run(schedule_type, &config, now);
                if !self.has_executions_left() {
                    self.is_scheduled = false;
                    self.next_run_at = None;
                }
            }
        }
    }

    /// Find a step by its 1-based number
    pub fn step(&self, step_number: i32) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_mut(&mut self, step_number: i32) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.step_number == step_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepType, WorkflowStep};

    fn workflow_with_status(status: WorkflowStatus) -> Workflow {
        let mut wf = Workflow::new(Uuid::now_v7(), "test", vec![]);
        wf.status = status;
        wf
    }

    #[test]
    fn approved_and_waiting_workflows_can_execute() {
        assert!(workflow_with_status(WorkflowStatus::Approved).can_execute());
        assert!(workflow_with_status(WorkflowStatus::WaitingUserInput).can_execute());
        assert!(!workflow_with_status(WorkflowStatus::Running).can_execute());
        assert!(!workflow_with_status(WorkflowStatus::Completed).can_execute());
        assert!(!workflow_with_status(WorkflowStatus::Cancelled).can_execute());
    }

    #[test]
    fn draft_requires_approval_before_execution() {
        let mut wf = workflow_with_status(WorkflowStatus::Draft);
        assert!(wf.can_execute());

        wf.requires_approval = true;
        assert!(!wf.can_execute());

        wf.approve(Uuid::now_v7());
        assert!(wf.can_execute());
    }

    #[test]
    fn once_schedule_disables_itself_after_first_run() {
        let mut wf = workflow_with_status(WorkflowStatus::Approved);
        wf.is_scheduled = true;
        wf.schedule_type = Some(ScheduleType::Once);
        wf.next_run_at = Some(Utc::now());

        wf.mark_executed(Utc::now());

        assert!(!wf.is_scheduled);
        assert!(wf.next_run_at.is_none());
        assert_eq!(wf.execution_count, 1);
        assert!(wf.last_run_at.is_some());
    }

    #[test]
    fn max_executions_exhaustion_disables_schedule() {
        let mut wf = workflow_with_status(WorkflowStatus::Approved);
        wf.is_scheduled = true;
        wf.schedule_type = Some(ScheduleType::Daily);
        wf.max_executions = Some(1);

        wf.mark_executed(Utc::now());

        assert!(!wf.has_executions_left());
        assert!(!wf.is_scheduled);
        assert!(wf.next_run_at.is_none());
    }

    #[test]
    fn step_lookup_by_number() {
        let steps = vec![
            WorkflowStep::new(1, StepType::ToolCall, "search"),
            WorkflowStep::new(2, StepType::Analysis, "analyze"),
        ];
        let wf = Workflow::new(Uuid::now_v7(), "test", steps);

        assert_eq!(wf.step(2).unwrap().description, "analyze");
        assert!(wf.step(3).is_none());
    }
}
