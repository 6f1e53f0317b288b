// Workflow Engine Core
//
// This crate provides the DB-agnostic half of the workflow execution engine:
// domain entities, placeholder resolution, structured extraction, the smart
// decision/retry strategy, recurrence rules, and the collaborator traits the
// executor is wired against.
//
// Key design decisions:
// - Uses traits (WorkflowStore, StatusSink, AgentDriver, Tool, DocumentStore,
//   UserDirectory, MailerTransport) for pluggable backends
// - Acting user is passed explicitly everywhere; no ambient user state
// - Retry is an explicit policy object, not exception-driven control flow
// - Decision scoring constants are configurable policy (DecisionConfig)
// - Error handling distinguishes transient agent failures from permanent ones

pub mod context;
pub mod decision;
pub mod error;
pub mod execution;
pub mod extract;
pub mod retry;
pub mod schedule;
pub mod step;
pub mod traits;
pub mod workflow;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use context::ExecutionContext;
pub use decision::{
    evaluate, find_best_attempt, find_last_result, generate_variants, is_retry_step,
    is_search_decision, is_search_shaped, should_skip, DecisionConfig, DecisionOutcome,
    SearchCriteria, SearchVariant, SEARCH_VARIANTS_KEY,
};
pub use error::{EngineError, Result};
pub use execution::{ExecutionStatus, WorkflowExecution};
pub use extract::extract_structured;
pub use memory::{
    FnTool, InMemoryDocumentStore, InMemoryStatusSink, InMemoryUserDirectory,
    InMemoryWorkflowStore, RecordingMailer, ScriptedAgentDriver,
};
pub use retry::RetryPolicy;
pub use schedule::{next_run, ScheduleConfig, ScheduleType};
pub use step::{StepStatus, StepType, WorkflowStep};
pub use traits::{
    AgentDriver, AgentMessage, AgentRole, DocumentMeta, DocumentStore, EmailMessage,
    MailerTransport, StatusMessage, StatusSink, Tool, ToolRegistry, UserDirectory, UserRecord,
    WorkflowStore,
};
pub use workflow::{Workflow, WorkflowStatus};
