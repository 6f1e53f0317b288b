// In-memory implementations for examples and testing
//
// These back the engine's collaborator traits with Mutex-guarded maps so the
// executor can be exercised end to end without Postgres or a live model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::execution::WorkflowExecution;
use crate::step::WorkflowStep;
use crate::traits::{
    AgentDriver, AgentMessage, DocumentMeta, DocumentStore, EmailMessage, MailerTransport,
    StatusMessage, StatusSink, Tool, UserDirectory, UserRecord, WorkflowStore,
};
use crate::workflow::Workflow;

// ============================================================================
// InMemoryWorkflowStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    executions: Mutex<Vec<WorkflowExecution>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, workflow: Workflow) {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.id, workflow);
    }

    /// Direct read for assertions
    pub fn get(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.lock().unwrap().get(&id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn save_step(&self, workflow_id: Uuid, step: &WorkflowStep) -> Result<()> {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        match workflow.step_mut(step.step_number) {
            Some(existing) => *existing = step.clone(),
            None => workflow.steps.push(step.clone()),
        }
        Ok(())
    }

    async fn next_execution_number(&self, workflow_id: Uuid) -> Result<i32> {
        let executions = self.executions.lock().unwrap();
        let max = executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.execution_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        match executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => *existing = execution.clone(),
            None => executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let mut list: Vec<_> = self
            .executions
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        list.sort_by_key(|e| e.execution_number);
        Ok(list)
    }

    async fn claim_due_workflows(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Workflow>> {
        let mut workflows = self.workflows.lock().unwrap();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = workflows
            .values()
            .filter(|w| w.is_scheduled && w.has_executions_left())
            .filter_map(|w| w.next_run_at.filter(|t| *t <= now).map(|t| (t, w.id)))
            .collect();
        due.sort_unstable();
        due.truncate(limit.max(0) as usize);

        // A claim clears next_run_at; the workflow stays invisible to further
        // scans until mark_executed re-arms it
        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(w) = workflows.get_mut(&id) {
                w.next_run_at = None;
                claimed.push(w.clone());
            }
        }
        Ok(claimed)
    }
}

// ============================================================================
// InMemoryStatusSink
// ============================================================================

#[derive(Default)]
pub struct InMemoryStatusSink {
    messages: Mutex<HashMap<Uuid, Vec<StatusMessage>>>,
}

impl InMemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages for a session, for assertions
    pub fn messages_for(&self, session_id: Uuid) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|msgs| msgs.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatusSink for InMemoryStatusSink {
    async fn add_status(&self, session_id: Uuid, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .push(StatusMessage {
                timestamp: Utc::now(),
                message: message.to_string(),
            });
        Ok(())
    }

    async fn clear_statuses(&self, session_id: Uuid) -> Result<()> {
        self.messages.lock().unwrap().remove(&session_id);
        Ok(())
    }

    async fn get_statuses(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusMessage>> {
        let messages = self.messages.lock().unwrap();
        let all = messages.get(&session_id).cloned().unwrap_or_default();
        Ok(match since {
            Some(cursor) => all.into_iter().filter(|m| m.timestamp > cursor).collect(),
            None => all,
        })
    }
}

// ============================================================================
// ScriptedAgentDriver
// ============================================================================

enum ScriptedResponse {
    Content(String),
    Transient(String),
    Fatal(String),
}

/// Agent driver that replays a scripted sequence of responses.
///
/// Records every call (model + last user message) for assertions. An empty
/// script yields a transient "empty response" failure, mirroring the
/// empty-content classification of the real caller.
#[derive(Default)]
pub struct ScriptedAgentDriver {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAgentDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_content(&self, content: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResponse::Content(content.into()));
    }

    pub fn push_transient_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResponse::Transient(message.into()));
    }

    pub fn push_fatal_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResponse::Fatal(message.into()));
    }

    /// Recorded (model, last message content) pairs
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDriver for ScriptedAgentDriver {
    async fn call(&self, model: &str, messages: &[AgentMessage]) -> Result<String> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().unwrap().push((model.to_string(), last));

        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedResponse::Content(content)) => Ok(content),
            Some(ScriptedResponse::Transient(msg)) => Err(EngineError::transient(msg)),
            Some(ScriptedResponse::Fatal(msg)) => Err(EngineError::Internal(anyhow::anyhow!(msg))),
            None => Err(EngineError::transient("empty response")),
        }
    }
}

// ============================================================================
// InMemoryDocumentStore / InMemoryUserDirectory
// ============================================================================

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<Uuid, DocumentMeta>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: DocumentMeta) {
        self.documents
            .lock()
            .unwrap()
            .insert(document.id, document);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(&self, id: Uuid) -> Result<Option<DocumentMeta>> {
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<Uuid, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.lock().unwrap().insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }
}

// ============================================================================
// RecordingMailer
// ============================================================================

/// Mailer that records messages instead of sending them
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailerTransport for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ============================================================================
// FnTool - closure-backed tool for tests and examples
// ============================================================================

type ToolFn = dyn Fn(&Value, Option<Uuid>) -> Result<Value> + Send + Sync;

/// Wraps a synchronous closure as a [`Tool`]
pub struct FnTool {
    name: String,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value, Option<Uuid>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, parameters: &Value, acting_user: Option<Uuid>) -> Result<Value> {
        (self.handler)(parameters, acting_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn status_sink_since_cursor_filters() {
        let sink = InMemoryStatusSink::new();
        let session = Uuid::now_v7();

        sink.add_status(session, "first").await.unwrap();
        let cursor = sink.get_statuses(session, None).await.unwrap()[0].timestamp;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        sink.add_status(session, "second").await.unwrap();

        let newer = sink.get_statuses(session, Some(cursor)).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].message, "second");
    }

    #[tokio::test]
    async fn scripted_driver_replays_in_order() {
        let driver = ScriptedAgentDriver::new();
        driver.push_transient_failure("rate limited");
        driver.push_content("hello");

        let messages = [AgentMessage::user("hi")];
        assert!(driver.call("gpt", &messages).await.is_err());
        assert_eq!(driver.call("gpt", &messages).await.unwrap(), "hello");
        assert_eq!(driver.calls().len(), 2);
    }

    #[tokio::test]
    async fn claim_due_orders_oldest_first_and_caps() {
        use crate::schedule::ScheduleType;
        use chrono::Duration;

        let store = InMemoryWorkflowStore::new();
        let now = Utc::now();

        let mut ids_by_overdue = Vec::new();
        for minutes_overdue in [5, 30, 10] {
            let mut wf = Workflow::new(Uuid::now_v7(), "scheduled", vec![]);
            wf.is_scheduled = true;
            wf.schedule_type = Some(ScheduleType::Daily);
            wf.next_run_at = Some(now - Duration::minutes(minutes_overdue));
            ids_by_overdue.push((minutes_overdue, wf.id));
            store.insert(wf);
        }

        let due = store.claim_due_workflows(now, 2).await.unwrap();
        let claimed_ids: Vec<Uuid> = due.iter().map(|w| w.id).collect();
        let expected: Vec<Uuid> = {
            ids_by_overdue.sort_by_key(|(overdue, _)| std::cmp::Reverse(*overdue));
            ids_by_overdue.iter().take(2).map(|(_, id)| *id).collect()
        };
        assert_eq!(claimed_ids, expected);
        // The claim clears the due slot
        assert!(due.iter().all(|w| w.next_run_at.is_none()));

        // Claimed workflows are invisible to the next scan
        let rest = store.claim_due_workflows(now, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn fn_tool_executes_closure() {
        let tool = FnTool::new("echo", |params, _| Ok(json!({"echoed": params.clone()})));
        let result = tool.execute(&json!({"x": 1}), None).await.unwrap();
        assert_eq!(result["echoed"]["x"], 1);
    }
}
