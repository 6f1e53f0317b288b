//! Database-backed StatusSink implementation
//!
//! Stores human-readable progress lines in the workflow_status_messages
//! table, ordered per session, with an optional `since` cursor for polling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use agentflow_core::{EngineError, Result, StatusMessage, StatusSink};

use crate::repositories::Database;

/// Database-backed status channel
#[derive(Clone)]
pub struct DbStatusSink {
    db: Database,
}

impl DbStatusSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusSink for DbStatusSink {
    async fn add_status(&self, session_id: Uuid, message: &str) -> Result<()> {
        self.db
            .add_status_message(session_id, message)
            .await
            .map_err(|e| EngineError::storage(e.to_string()))
    }

    async fn clear_statuses(&self, session_id: Uuid) -> Result<()> {
        self.db
            .clear_status_messages(session_id)
            .await
            .map_err(|e| EngineError::storage(e.to_string()))
    }

    async fn get_statuses(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusMessage>> {
        self.db
            .get_status_messages(session_id, since)
            .await
            .map_err(|e| EngineError::storage(e.to_string()))
    }
}

/// Create a database-backed status sink
pub fn create_db_status_sink(db: Database) -> DbStatusSink {
    DbStatusSink::new(db)
}
