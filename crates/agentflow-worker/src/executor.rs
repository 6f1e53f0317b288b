// Workflow execution state machine
//
// Drives a workflow from its first pending step to a terminal or paused
// state. Exactly one step is in flight at a time; context from step n is
// visible to all later steps. Every step transition is persisted before the
// next step begins, so a crash between steps leaves the workflow resumable
// from the last persisted step.
//
// Composed services (tool invoker, agent caller, status sink, store) are
// injected; the executor owns only the sequencing and state transitions.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use agentflow_core::{
    decision, extract_structured, AgentMessage, DecisionConfig, EngineError, ExecutionContext,
    Result, SearchCriteria, SearchVariant, StatusSink, StepStatus, StepType, Workflow,
    WorkflowExecution, WorkflowStatus, WorkflowStep, WorkflowStore, SEARCH_VARIANTS_KEY,
};

use crate::agent::AgentCaller;
use crate::tools::ToolInvoker;

/// What one dispatched step produced
enum StepOutcome {
    Done(Value),
    /// Step prepared something that needs human confirmation before the run
    /// may continue (e.g. an email preview)
    AwaitConfirmation(Value),
}

pub struct WorkflowExecutor {
    store: Arc<dyn WorkflowStore>,
    status: Arc<dyn StatusSink>,
    agent: Arc<AgentCaller>,
    tools: Arc<ToolInvoker>,
    decision_config: DecisionConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        status: Arc<dyn StatusSink>,
        agent: Arc<AgentCaller>,
        tools: Arc<ToolInvoker>,
    ) -> Self {
        Self {
            store,
            status,
            agent,
            tools,
            decision_config: DecisionConfig::default(),
        }
    }

    pub fn with_decision_config(mut self, config: DecisionConfig) -> Self {
        self.decision_config = config;
        self
    }

    /// Start or resume execution of a workflow.
    ///
    /// Fails fast with `NotExecutable` (no state change) unless the workflow
    /// is approved, an approval-free draft, or paused at waiting_user_input.
    /// Safe to re-invoke on a paused workflow: completed steps are never
    /// re-executed and their stored results are untouched.
    pub async fn execute_workflow(&self, workflow_id: Uuid, acting_user: Option<Uuid>) -> Result<()> {
        let workflow = self
            .store
            .load_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if !workflow.can_execute() {
            return Err(EngineError::NotExecutable(workflow_id));
        }

        self.run(workflow, acting_user, None).await
    }

    /// Resume a workflow paused at waiting_user_input, optionally merging a
    /// resolution payload into the run context under `user_input`.
    pub async fn resume(
        &self,
        workflow_id: Uuid,
        payload: Option<Value>,
        acting_user: Option<Uuid>,
    ) -> Result<()> {
        let workflow = self
            .store
            .load_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if workflow.status != WorkflowStatus::WaitingUserInput {
            return Err(EngineError::NotExecutable(workflow_id));
        }

        self.run(workflow, acting_user, payload).await
    }

    /// Confirm a step halted at pending_confirmation: perform the deferred
    /// send, then continue the run from the next step.
    pub async fn confirm_step(
        &self,
        workflow_id: Uuid,
        step_number: i32,
        acting_user: Option<Uuid>,
    ) -> Result<()> {
        let mut workflow = self
            .store
            .load_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        let session_id = workflow.session_id;

        let step = workflow
            .step_mut(step_number)
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("step {step_number} not found")))?;
        if step.status != StepStatus::PendingConfirmation {
            return Err(EngineError::Internal(anyhow::anyhow!(
                "step {step_number} is not awaiting confirmation"
            )));
        }

        let prepared = step
            .email_details
            .clone()
            .or_else(|| step.result.clone())
            .ok_or_else(|| {
                EngineError::Internal(anyhow::anyhow!("step {step_number} has no prepared payload"))
            })?;

        match self.tools.send_prepared_email(&prepared, acting_user).await {
            Ok(result) => {
                step.complete(result);
                let step = step.clone();
                self.store.save_step(workflow_id, &step).await?;
                self.status
                    .add_status(session_id, "Email confirmed and sent")
                    .await?;
                // Continue with the remaining steps
                self.run(workflow, acting_user, None).await
            }
            Err(e) => {
                step.fail(e.to_string());
                let step = step.clone();
                self.store.save_step(workflow_id, &step).await?;
                workflow.fail();
                self.store.save_workflow(&workflow).await?;
                self.status
                    .add_status(session_id, &human_summary(&e))
                    .await?;
                Err(e)
            }
        }
    }

    /// Reset failed steps and re-run a failed workflow
    pub async fn retry_failed(&self, workflow_id: Uuid, acting_user: Option<Uuid>) -> Result<()> {
        let mut workflow = self
            .store
            .load_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if workflow.status != WorkflowStatus::Failed {
            return Err(EngineError::NotExecutable(workflow_id));
        }

        for step in &mut workflow.steps {
            if matches!(step.status, StepStatus::Failed | StepStatus::Cancelled) {
                step.reset();
            }
        }
        workflow.status = WorkflowStatus::Approved;
        workflow.completed_at = None;
        self.store.save_workflow(&workflow).await?;
        for step in workflow.steps.clone() {
            self.store.save_step(workflow_id, &step).await?;
        }

        self.run(workflow, acting_user, None).await
    }

    // ========================================================================
    // The run loop
    // ========================================================================

    async fn run(
        &self,
        mut workflow: Workflow,
        acting_user: Option<Uuid>,
        extra_context: Option<Value>,
    ) -> Result<()> {
        let workflow_id = workflow.id;
        let session_id = workflow.session_id;
        let total_steps = workflow.steps.len();

        let execution_number = self.store.next_execution_number(workflow_id).await?;
        let mut execution = WorkflowExecution::start(workflow_id, execution_number);
        self.store.save_execution(&execution).await?;

        workflow.start();
        self.store.save_workflow(&workflow).await?;
        info!(%workflow_id, execution_number, "Workflow run started");

        // Model degradation is scoped to this run
        self.agent.reset_degradation();

        // Rebuild context from previously completed steps
        let mut ctx = ExecutionContext::from_steps(&workflow.steps);
        if let Some(payload) = extra_context {
            ctx.insert("user_input", payload);
        }

        let step_numbers: Vec<i32> = {
            let mut numbers: Vec<i32> = workflow.steps.iter().map(|s| s.step_number).collect();
            numbers.sort_unstable();
            numbers
        };

        for step_number in step_numbers {
            // Cooperative cancellation, checked between steps only
            if let Some(current) = self.store.load_workflow(workflow_id).await? {
                if current.status == WorkflowStatus::Cancelled {
                    execution.cancel();
                    self.finalize_execution(&mut execution, &workflow, &ctx).await?;
                    self.status
                        .add_status(session_id, "Workflow cancelled")
                        .await?;
                    return Ok(());
                }
            }

            let Some(mut step) = workflow.step(step_number).cloned() else {
                continue;
            };

            match step.status {
                StepStatus::Completed => continue,
                StepStatus::PendingConfirmation => {
                    // Still waiting on the human; do not advance
                    self.pause_for_confirmation(&mut workflow, &mut execution, &ctx, step_number)
                        .await?;
                    return Ok(());
                }
                _ => {}
            }

            // Redundant retry-variant step after an already-successful attempt:
            // carry the previous result forward instead of re-running
            if decision::should_skip(&step, &ctx) {
                let carried = ctx
                    .get(&format!("step_{}", step_number - 1))
                    .cloned()
                    .unwrap_or(Value::Null);
                step.complete(carried);
                self.store.save_step(workflow_id, &step).await?;
                ctx.merge_step_result(&step);
                if let Some(slot) = workflow.step_mut(step_number) {
                    *slot = step;
                }
                self.status
                    .add_status(
                        session_id,
                        &format!("Step {step_number}/{total_steps} skipped (previous attempt already succeeded)"),
                    )
                    .await?;
                continue;
            }

            workflow.current_step = Some(step_number);
            step.status = StepStatus::Running;
            self.store.save_step(workflow_id, &step).await?;
            self.store.save_workflow(&workflow).await?;

            let description = ctx.resolve_string(&step.description);
            let outcome = self
                .dispatch(&step, &description, &mut ctx, session_id, acting_user)
                .await;

            match outcome {
                Ok(StepOutcome::Done(result)) => {
                    step.complete(result);
                    self.store.save_step(workflow_id, &step).await?;
                    ctx.merge_step_result(&step);
                    if let Some(slot) = workflow.step_mut(step_number) {
                        *slot = step;
                    }
                    self.status
                        .add_status(
                            session_id,
                            &format!("Step {step_number}/{total_steps} completed"),
                        )
                        .await?;
                }
                Ok(StepOutcome::AwaitConfirmation(prepared)) => {
                    step.email_details = Some(prepared.clone());
                    step.await_confirmation(prepared);
                    self.store.save_step(workflow_id, &step).await?;
                    if let Some(slot) = workflow.step_mut(step_number) {
                        *slot = step;
                    }
                    self.pause_for_confirmation(&mut workflow, &mut execution, &ctx, step_number)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    // Step boundary: the failure must not corrupt earlier
                    // steps' persisted results
                    error!(%workflow_id, step_number, error = %e, "Step failed");
                    step.fail(e.to_string());
                    self.store.save_step(workflow_id, &step).await?;
                    workflow.fail();
                    self.store.save_workflow(&workflow).await?;
                    execution.fail(e.to_string());
                    self.finalize_execution(&mut execution, &workflow, &ctx).await?;
                    self.status
                        .add_status(
                            session_id,
                            &format!("Step {step_number}/{total_steps} failed. {}", human_summary(&e)),
                        )
                        .await?;
                    return Err(e);
                }
            }
        }

        workflow.complete();
        self.store.save_workflow(&workflow).await?;
        execution.complete();
        self.finalize_execution(&mut execution, &workflow, &ctx).await?;
        self.status
            .add_status(session_id, "Workflow completed")
            .await?;
        info!(%workflow_id, execution_number, "Workflow run completed");
        Ok(())
    }

    async fn pause_for_confirmation(
        &self,
        workflow: &mut Workflow,
        execution: &mut WorkflowExecution,
        ctx: &ExecutionContext,
        step_number: i32,
    ) -> Result<()> {
        let session_id = workflow.session_id;
        workflow.current_step = Some(step_number);
        workflow.request_user_input(
            "A prepared action awaits your confirmation",
            json!({"step_number": step_number}),
        );
        self.store.save_workflow(workflow).await?;
        execution.wait_for_user();
        self.finalize_execution(execution, workflow, ctx).await?;
        self.status
            .add_status(
                session_id,
                &format!("Step {step_number} is waiting for your confirmation"),
            )
            .await?;
        Ok(())
    }

    async fn finalize_execution(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let mut step_results = Map::new();
        for step in &workflow.steps {
            if let Some(result) = &step.result {
                step_results.insert(step.context_key(), result.clone());
            }
        }
        execution.step_results = Some(Value::Object(step_results));
        execution.context = Some(ctx.to_json());
        self.store.save_execution(execution).await
    }

    // ========================================================================
    // Step dispatch
    // ========================================================================

    async fn dispatch(
        &self,
        step: &WorkflowStep,
        description: &str,
        ctx: &mut ExecutionContext,
        session_id: Uuid,
        acting_user: Option<Uuid>,
    ) -> Result<StepOutcome> {
        match step.step_type {
            StepType::ToolCall => {
                let tool_name = step.tool_name.as_deref().ok_or_else(|| {
                    EngineError::tool("unknown", "tool_call step has no tool name")
                })?;
                let parameters = step
                    .tool_parameters
                    .as_ref()
                    .map(|p| ctx.resolve_value(p))
                    .unwrap_or_else(|| json!({}));

                let result = self
                    .tools
                    .invoke(tool_name, &parameters, ctx, acting_user)
                    .await?;

                if result.get("status").and_then(Value::as_str) == Some("prepared") {
                    Ok(StepOutcome::AwaitConfirmation(result))
                } else {
                    Ok(StepOutcome::Done(result))
                }
            }
            StepType::Analysis => self.analysis_step(step, description, acting_user).await,
            StepType::Decision => {
                if decision::is_search_decision(description) {
                    self.search_decision_step(step, ctx, session_id).await
                } else {
                    self.analysis_step(step, description, acting_user).await
                }
            }
            StepType::Notification => {
                self.status.add_status(session_id, description).await?;
                Ok(StepOutcome::Done(json!({
                    "status": "sent",
                    "message": description,
                })))
            }
        }
    }

    /// Free-form or structured agent analysis, depending on whether the step
    /// declares expected output fields
    async fn analysis_step(
        &self,
        step: &WorkflowStep,
        description: &str,
        acting_user: Option<Uuid>,
    ) -> Result<StepOutcome> {
        let mut prompt = description.to_string();
        if let Some(fields) = &step.expected_output_format {
            prompt.push_str(&format!(
                "\n\nRespond with a JSON object containing exactly these fields: {}.",
                fields.join(", ")
            ));
        }

        let messages = [
            AgentMessage::system(
                "You are the analysis engine of a workflow system. \
                 Answer precisely and without commentary.",
            ),
            AgentMessage::user(prompt),
        ];
        let response = self.agent.call(&messages, acting_user).await?;

        let result = match &step.expected_output_format {
            Some(fields) => Value::Object(extract_structured(&response, fields)),
            None => json!({"response": response}),
        };
        Ok(StepOutcome::Done(result))
    }

    /// Domain decision: score the most recent search attempt, expose the
    /// retry signal and the next variant to try
    async fn search_decision_step(
        &self,
        step: &WorkflowStep,
        ctx: &mut ExecutionContext,
        session_id: Uuid,
    ) -> Result<StepOutcome> {
        let variants = self.variants_for(step, ctx)?;
        if ctx.get(SEARCH_VARIANTS_KEY).is_none() {
            if let Ok(stored) = serde_json::to_value(&variants) {
                ctx.insert(SEARCH_VARIANTS_KEY, stored);
            }
        }

        // Which attempt are we judging? Count the search-shaped results so far.
        let snapshot: &ExecutionContext = ctx;
        let attempts_so_far = snapshot
            .keys()
            .filter(|k| k.starts_with("step_"))
            .filter_map(|k| snapshot.get(k))
            .filter(|v| decision::is_search_shaped(v))
            .count()
            .max(1);
        let variant_index = (attempts_so_far - 1).min(variants.len().saturating_sub(1));
        let variant = variants
            .get(variant_index)
            .cloned()
            .ok_or(EngineError::NoSearchCriteria)?;

        let last = decision::find_last_result(ctx)
            .map(|(_, v)| v)
            .unwrap_or_else(|| json!({}));
        let outcome = decision::evaluate(&last, &variant, &self.decision_config);

        let mut result = outcome.to_result();
        if let Value::Object(map) = &mut result {
            if let Some(next) = variants.get(variant_index + 1) {
                map.insert("next_variant".into(), next.parameters.clone());
                map.insert("next_variant_description".into(), json!(next.description));
            }
        }

        let message = if outcome.is_acceptable {
            format!(
                "Found {} results (quality {}), continuing",
                outcome.result_count, outcome.quality_score
            )
        } else {
            format!(
                "Only {} results (quality {}), trying a broader search",
                outcome.result_count, outcome.quality_score
            )
        };
        self.status.add_status(session_id, &message).await?;

        Ok(StepOutcome::Done(result))
    }

    /// Variant list for this run: reuse the one already in context, else
    /// generate it from the step's own parameters
    fn variants_for(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> Result<Vec<SearchVariant>> {
        if let Some(stored) = ctx.get(SEARCH_VARIANTS_KEY) {
            if let Ok(variants) = serde_json::from_value::<Vec<SearchVariant>>(stored.clone()) {
                if !variants.is_empty() {
                    return Ok(variants);
                }
            }
            warn!("Stored search variants were unreadable, regenerating");
        }

        let params = step
            .tool_parameters
            .as_ref()
            .map(|p| ctx.resolve_value(p))
            .unwrap_or_else(|| json!({}));
        let criteria = SearchCriteria::from_value(&params);
        decision::generate_variants(&criteria, &self.decision_config)
    }
}

/// Non-technical, user-facing summary of a failure. The technical detail goes
/// to the step's error_message and the logs; the status channel gets this.
fn human_summary(error: &EngineError) -> String {
    match error {
        EngineError::ToolExecution { tool, .. } => {
            format!("The action '{tool}' could not be completed.")
        }
        EngineError::ContactsNotFound { .. } => {
            "No contact details could be found for any candidate company.".into()
        }
        EngineError::AgentExhausted { .. } | EngineError::TransientAgent(_) => {
            "The assistant is temporarily unavailable. Please try again later.".into()
        }
        EngineError::MissingUserContext => {
            "A signed-in user is required to finish this step.".into()
        }
        EngineError::NoSearchCriteria => {
            "There is not enough information to search. Please provide a job title or skills.".into()
        }
        _ => "The workflow could not be completed.".into(),
    }
}
