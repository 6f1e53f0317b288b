// Collaborator traits for pluggable backends
//
// These traits keep the engine DB-agnostic and transport-agnostic:
// - In-memory implementations for examples and testing (see memory.rs)
// - Database implementations for production (agentflow-storage)
//
// Every call that acts on behalf of a user takes an explicit acting-user
// argument. There is no ambient "current user" state anywhere in the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::WorkflowExecution;
use crate::step::WorkflowStep;
use crate::workflow::Workflow;

// ============================================================================
// AgentDriver - the opaque language-model capability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    System,
    User,
    Assistant,
}

/// One message in a prompt sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: AgentRole,
    pub content: String,
}

impl AgentMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: AgentRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AgentRole::User,
            content: content.into(),
        }
    }
}

/// The language-model capability: a prompt sequence in, text out.
///
/// Implementations must be swappable per call so the caller can fall back to
/// a cheaper model after repeated failures in the same run.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    async fn call(&self, model: &str, messages: &[AgentMessage]) -> Result<String>;
}

// ============================================================================
// Tool - a named capability with a parameter map
// ============================================================================

/// A named capability invoked with a parameter map, returning a result map
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, parameters: &Value, acting_user: Option<Uuid>) -> Result<Value>;
}

/// Resolves tool names to callables
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

// ============================================================================
// StatusSink - session-scoped human-readable progress log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Append-only, session-scoped progress log, polled by clients
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn add_status(&self, session_id: Uuid, message: &str) -> Result<()>;

    async fn clear_statuses(&self, session_id: Uuid) -> Result<()>;

    /// Ordered messages, optionally only those after `since`
    async fn get_statuses(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusMessage>>;
}

// ============================================================================
// WorkflowStore - durable workflow persistence
// ============================================================================

/// Durable storage for workflows, steps, and execution history.
///
/// `save_step` must be atomic per step completion: a crash between steps
/// leaves the workflow resumable from the last persisted step.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;

    /// Persist workflow-level fields (status, current_step, scheduling)
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    /// Persist one step's transition (status, result, error)
    async fn save_step(&self, workflow_id: Uuid, step: &WorkflowStep) -> Result<()>;

    /// Monotonic execution number for the next run of this workflow
    async fn next_execution_number(&self, workflow_id: Uuid) -> Result<i32>;

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>>;

    /// Claim scheduled workflows due at `now`, oldest first, at most `limit`.
    ///
    /// Implementations must guarantee no two workers claim the same workflow
    /// (the engine assumes at-most-one-active-executor-per-workflow-id).
    async fn claim_due_workflows(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Workflow>>;
}

// ============================================================================
// DocumentStore - attachment ownership validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    pub path: String,
}

/// Used only to validate attachment ownership before exposing/sending
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<DocumentMeta>>;
}

// ============================================================================
// UserDirectory - user/session resolution
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    /// Token-validity check for tools requiring external credentials
    pub has_valid_token: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>>;
}

// ============================================================================
// MailerTransport - outbound email
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<DocumentMeta>,
}

#[async_trait]
pub trait MailerTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}
