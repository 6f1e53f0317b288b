// Error types for workflow execution

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while executing a workflow
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow status/approval precondition failed; no state was changed
    #[error("Workflow {0} is not executable in its current state")]
    NotExecutable(Uuid),

    /// Workflow not found in the store
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// A tool call failed
    #[error("Tool '{tool}' failed: {cause}")]
    ToolExecution { tool: String, cause: String },

    /// Agent call failed with an error classified as transient (retryable)
    #[error("Transient agent error: {0}")]
    TransientAgent(String),

    /// All retries and the degraded-model fallback failed
    #[error("Agent exhausted after {attempts} attempts: {last_error}")]
    AgentExhausted { attempts: u32, last_error: String },

    /// All contact-lookup fallback candidates were exhausted
    #[error("No contacts found after {attempts} attempts")]
    ContactsNotFound { attempts: usize },

    /// A user-scoped action (e.g. sending a prepared email) has no resolvable user
    #[error("No user context available for user-scoped action")]
    MissingUserContext,

    /// Smart decision invoked without a usable search signal
    #[error("No search criteria available: neither a title nor skills were given")]
    NoSearchCriteria,

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Workflow was cancelled between steps
    #[error("Workflow cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Create a tool execution error
    pub fn tool(tool: impl Into<String>, cause: impl Into<String>) -> Self {
        EngineError::ToolExecution {
            tool: tool.into(),
            cause: cause.into(),
        }
    }

    /// Create a transient agent error
    pub fn transient(msg: impl Into<String>) -> Self {
        EngineError::TransientAgent(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        EngineError::Storage(msg.into())
    }

    /// True if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientAgent(_))
    }
}
