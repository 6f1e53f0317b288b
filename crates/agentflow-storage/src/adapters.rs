// Database-backed implementations of the engine's collaborator traits
//
// Thin wrappers over the repository facade. Error mapping is uniform: every
// sqlx/anyhow failure becomes EngineError::Storage with the message intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use agentflow_core::{
    DocumentMeta, DocumentStore, EngineError, Result, UserDirectory, UserRecord, Workflow,
    WorkflowExecution, WorkflowStep, WorkflowStore,
};

use crate::repositories::Database;

fn storage_err(e: anyhow::Error) -> EngineError {
    EngineError::storage(e.to_string())
}

// ============================================================================
// DbWorkflowStore
// ============================================================================

#[derive(Clone)]
pub struct DbWorkflowStore {
    db: Database,
}

impl DbWorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkflowStore for DbWorkflowStore {
    async fn load_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        self.db.get_workflow(id).await.map_err(storage_err)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.db.update_workflow(workflow).await.map_err(storage_err)
    }

    async fn save_step(&self, workflow_id: Uuid, step: &WorkflowStep) -> Result<()> {
        self.db
            .upsert_step(workflow_id, step)
            .await
            .map_err(storage_err)
    }

    async fn next_execution_number(&self, workflow_id: Uuid) -> Result<i32> {
        self.db
            .next_execution_number(workflow_id)
            .await
            .map_err(storage_err)
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        self.db.save_execution(execution).await.map_err(storage_err)
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        self.db
            .list_executions(workflow_id)
            .await
            .map_err(storage_err)
    }

    async fn claim_due_workflows(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Workflow>> {
        self.db
            .claim_due_workflows(now, limit)
            .await
            .map_err(storage_err)
    }
}

// ============================================================================
// DbDocumentStore / DbUserDirectory
// ============================================================================

#[derive(Clone)]
pub struct DbDocumentStore {
    db: Database,
}

impl DbDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for DbDocumentStore {
    async fn find(&self, id: Uuid) -> Result<Option<DocumentMeta>> {
        let row = self.db.find_document(id).await.map_err(storage_err)?;
        Ok(row.map(|r| DocumentMeta {
            id: r.id,
            owner_user_id: r.owner_user_id,
            filename: r.filename,
            size: r.size,
            mime_type: r.mime_type,
            path: r.path,
        }))
    }
}

#[derive(Clone)]
pub struct DbUserDirectory {
    db: Database,
}

impl DbUserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let row = self.db.find_user(id).await.map_err(storage_err)?;
        Ok(row.map(|r| UserRecord {
            id: r.id,
            email: r.email,
            display_name: r.display_name,
            has_valid_token: r.token_valid_until.map(|t| t > Utc::now()).unwrap_or(false),
        }))
    }
}

// ============================================================================
// Factory functions
// ============================================================================

pub fn create_db_workflow_store(db: Database) -> DbWorkflowStore {
    DbWorkflowStore::new(db)
}

pub fn create_db_document_store(db: Database) -> DbDocumentStore {
    DbDocumentStore::new(db)
}

pub fn create_db_user_directory(db: Database) -> DbUserDirectory {
    DbUserDirectory::new(db)
}
