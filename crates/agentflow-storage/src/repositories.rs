// Repository layer for database operations
//
// One facade over the pool, exposed to the engine through the WorkflowStore
// trait via adapters.rs. Step completion is transactional: a crash between
// steps leaves the workflow resumable from the last persisted step.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use agentflow_core::{StatusMessage, Workflow, WorkflowExecution, WorkflowStep};

use crate::models::*;

const WORKFLOW_COLUMNS: &str = "id, session_id, user_intent, status, current_step, is_scheduled, \
     schedule_type, schedule_config, next_run_at, last_run_at, execution_count, max_executions, \
     requires_approval, approved_at, approved_by, user_interaction_message, \
     user_interaction_required, is_template, template_name, created_at, completed_at";

const STEP_COLUMNS: &str = "workflow_id, step_number, step_type, description, tool_name, \
     tool_parameters, requires_confirmation, status, result, error_message, email_details, \
     expected_output_format, completed_at";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Workflows
    // ============================================

    /// Insert a workflow and its step plan in one transaction
    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, session_id, user_intent, status, current_step, is_scheduled,
                schedule_type, schedule_config, next_run_at, last_run_at, execution_count,
                max_executions, requires_approval, approved_at, approved_by,
                user_interaction_message, user_interaction_required, is_template,
                template_name, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.session_id)
        .bind(&workflow.user_intent)
        .bind(workflow.status.as_str())
        .bind(workflow.current_step)
        .bind(workflow.is_scheduled)
        .bind(workflow.schedule_type.map(|t| t.as_str()))
        .bind(
            workflow
                .schedule_config
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(workflow.next_run_at)
        .bind(workflow.last_run_at)
        .bind(workflow.execution_count)
        .bind(workflow.max_executions)
        .bind(workflow.requires_approval)
        .bind(workflow.approved_at)
        .bind(workflow.approved_by)
        .bind(&workflow.user_interaction_message)
        .bind(&workflow.user_interaction_required)
        .bind(workflow.is_template)
        .bind(&workflow.template_name)
        .bind(workflow.created_at)
        .bind(workflow.completed_at)
        .execute(&mut *tx)
        .await?;

        for step in &workflow.steps {
            insert_step(&mut tx, workflow.id, step).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let steps = self.get_steps(id).await?;
        Ok(Some(row.into_domain(steps)?))
    }

    /// Persist workflow-level fields (status, current_step, scheduling, interaction)
    pub async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET
                status = $2,
                current_step = $3,
                is_scheduled = $4,
                schedule_type = $5,
                schedule_config = $6,
                next_run_at = $7,
                last_run_at = $8,
                execution_count = $9,
                requires_approval = $10,
                approved_at = $11,
                approved_by = $12,
                user_interaction_message = $13,
                user_interaction_required = $14,
                completed_at = $15
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.status.as_str())
        .bind(workflow.current_step)
        .bind(workflow.is_scheduled)
        .bind(workflow.schedule_type.map(|t| t.as_str()))
        .bind(
            workflow
                .schedule_config
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(workflow.next_run_at)
        .bind(workflow.last_run_at)
        .bind(workflow.execution_count)
        .bind(workflow.requires_approval)
        .bind(workflow.approved_at)
        .bind(workflow.approved_by)
        .bind(&workflow.user_interaction_message)
        .bind(&workflow.user_interaction_required)
        .bind(workflow.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("workflow {} not found", workflow.id));
        }
        Ok(())
    }

    async fn get_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, WorkflowStepRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_number"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowStepRow::into_domain).collect()
    }

    /// Persist one step's transition atomically
    pub async fn upsert_step(&self, workflow_id: Uuid, step: &WorkflowStep) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_step(&mut tx, workflow_id, step).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Clone a template workflow's step plan into a fresh draft
    pub async fn instantiate_template(
        &self,
        template_id: Uuid,
        session_id: Uuid,
    ) -> Result<Workflow> {
        let template = self
            .get_workflow(template_id)
            .await?
            .ok_or_else(|| anyhow!("template workflow {template_id} not found"))?;
        if !template.is_template {
            return Err(anyhow!("workflow {template_id} is not a template"));
        }

        let mut steps = template.steps.clone();
        for step in &mut steps {
            step.reset();
        }
        let workflow = Workflow::new(session_id, template.user_intent.clone(), steps);
        self.create_workflow(&workflow).await?;
        Ok(workflow)
    }

    // ============================================
    // Scheduler claiming
    // ============================================

    /// Claim scheduled workflows due at `now`, oldest-due first.
    ///
    /// Uses SELECT ... FOR UPDATE SKIP LOCKED so concurrent workers never
    /// claim the same workflow, and clears next_run_at inside the same
    /// transaction so a committed claim is invisible to the next scan. The
    /// select and the clearing update are separate statements because an
    /// UPDATE ... RETURNING neither preserves the inner ordering nor the
    /// pre-null due times. The scheduler recomputes next_run_at via
    /// mark_executed after the run.
    pub async fn claim_due_workflows(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Workflow>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflows
            WHERE is_scheduled = TRUE
              AND next_run_at <= $1
              AND (max_executions IS NULL OR execution_count < max_executions)
            ORDER BY next_run_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        sqlx::query("UPDATE workflows SET next_run_at = NULL WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.next_run_at = None;
            let steps = self.get_steps(row.id).await?;
            workflows.push(row.into_domain(steps)?);
        }
        Ok(workflows)
    }

    // ============================================
    // Executions
    // ============================================

    pub async fn next_execution_number(&self, workflow_id: Uuid) -> Result<i32> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(execution_number) FROM workflow_executions WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, execution_number, status, step_results, context,
                error_message, started_at, completed_at, duration_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                step_results = EXCLUDED.step_results,
                context = EXCLUDED.context,
                error_message = EXCLUDED.error_message,
                completed_at = EXCLUDED.completed_at,
                duration_seconds = EXCLUDED.duration_seconds
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.execution_number)
        .bind(execution.status.as_str())
        .bind(&execution.step_results)
        .bind(&execution.context)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            SELECT id, workflow_id, execution_number, status, step_results, context,
                   error_message, started_at, completed_at, duration_seconds
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY execution_number
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(WorkflowExecutionRow::into_domain)
            .collect()
    }

    // ============================================
    // Status channel
    // ============================================

    pub async fn add_status_message(&self, session_id: Uuid, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO workflow_status_messages (session_id, message) VALUES ($1, $2)")
            .bind(session_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_status_messages(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM workflow_status_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_status_messages(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusMessage>> {
        let rows = sqlx::query_as::<_, StatusMessageRow>(
            r#"
            SELECT session_id, message, created_at
            FROM workflow_status_messages
            WHERE session_id = $1 AND ($2::timestamptz IS NULL OR created_at > $2)
            ORDER BY created_at, id
            "#,
        )
        .bind(session_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StatusMessage {
                timestamp: r.created_at,
                message: r.message,
            })
            .collect())
    }

    // ============================================
    // Documents / users
    // ============================================

    pub async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, owner_user_id, filename, size, mime_type, path FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, token_valid_until FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

async fn insert_step(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
    step: &WorkflowStep,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workflow_steps (
            id, workflow_id, step_number, step_type, description, tool_name,
            tool_parameters, requires_confirmation, status, result, error_message,
            email_details, expected_output_format, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (workflow_id, step_number) DO UPDATE
        SET description = EXCLUDED.description,
            tool_name = EXCLUDED.tool_name,
            tool_parameters = EXCLUDED.tool_parameters,
            requires_confirmation = EXCLUDED.requires_confirmation,
            status = EXCLUDED.status,
            result = EXCLUDED.result,
            error_message = EXCLUDED.error_message,
            email_details = EXCLUDED.email_details,
            expected_output_format = EXCLUDED.expected_output_format,
            completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(workflow_id)
    .bind(step.step_number)
    .bind(step.step_type.as_str())
    .bind(&step.description)
    .bind(&step.tool_name)
    .bind(&step.tool_parameters)
    .bind(step.requires_confirmation)
    .bind(step.status.as_str())
    .bind(&step.result)
    .bind(&step.error_message)
    .bind(&step.email_details)
    .bind(
        step.expected_output_format
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?,
    )
    .bind(step.completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
