// End-to-end engine tests over the in-memory backends.
//
// These drive the executor exactly as the worker does, with scripted agent
// responses and closure-backed tools, and assert on persisted workflow state,
// execution records, and the status channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use agentflow_core::{
    AgentDriver, DocumentStore, EngineError, ExecutionStatus, FnTool, InMemoryDocumentStore,
    InMemoryStatusSink, InMemoryUserDirectory, InMemoryWorkflowStore, MailerTransport,
    RecordingMailer, RetryPolicy, ScriptedAgentDriver, StatusSink, StepStatus, StepType,
    ToolRegistry, UserDirectory, UserRecord, Workflow, WorkflowStatus, WorkflowStep, WorkflowStore,
};
use agentflow_worker::{AgentCaller, AgentCallerConfig, ToolInvoker, WorkflowExecutor};

struct Harness {
    store: Arc<InMemoryWorkflowStore>,
    sink: Arc<InMemoryStatusSink>,
    driver: Arc<ScriptedAgentDriver>,
    users: Arc<InMemoryUserDirectory>,
    mailer: Arc<RecordingMailer>,
    registry: ToolRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryWorkflowStore::new()),
            sink: Arc::new(InMemoryStatusSink::new()),
            driver: Arc::new(ScriptedAgentDriver::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
            mailer: Arc::new(RecordingMailer::new()),
            registry: ToolRegistry::new(),
        }
    }

    fn executor(&self) -> WorkflowExecutor {
        let agent = Arc::new(AgentCaller::new(
            self.driver.clone() as Arc<dyn AgentDriver>,
            AgentCallerConfig {
                retry: RetryPolicy::no_retry(),
                ..AgentCallerConfig::default()
            },
        ));
        let tools = Arc::new(ToolInvoker::new(
            self.registry.clone(),
            agent.clone(),
            Arc::new(InMemoryDocumentStore::new()) as Arc<dyn DocumentStore>,
            self.users.clone() as Arc<dyn UserDirectory>,
            self.mailer.clone() as Arc<dyn MailerTransport>,
        ));
        WorkflowExecutor::new(
            self.store.clone(),
            self.sink.clone() as Arc<dyn StatusSink>,
            agent,
            tools,
        )
    }

    fn add_user(&self) -> Uuid {
        let id = Uuid::now_v7();
        self.users.insert(UserRecord {
            id,
            email: "user@example.com".into(),
            display_name: "Test User".into(),
            has_valid_token: true,
        });
        id
    }

    fn insert_approved(&self, mut workflow: Workflow) -> Uuid {
        workflow.status = WorkflowStatus::Approved;
        let id = workflow.id;
        self.store.insert(workflow);
        id
    }
}

// ============================================================================
// Ordering and context visibility
// ============================================================================

#[tokio::test]
async fn steps_run_in_order_and_see_prior_results() {
    let mut h = Harness::new();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for name in ["first_tool", "second_tool"] {
        let order = order.clone();
        h.registry.register(Arc::new(FnTool::new(name, move |params, _| {
            order.lock().unwrap().push(params.clone());
            Ok(json!({"city": "Berlin"}))
        })));
    }

    let steps = vec![
        WorkflowStep::tool_call(1, "Lookup location", "first_tool", json!({})),
        WorkflowStep::tool_call(
            2,
            "Use the location",
            "second_tool",
            json!({"from_step_1": "{{step_1.city}}"}),
        ),
    ];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "ordering", steps));

    h.executor().execute_workflow(id, None).await.unwrap();

    let calls = order.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    // Step 2's parameters were resolved against step 1's result
    assert_eq!(calls[1]["from_step_1"], "Berlin");

    let wf = h.store.get(id).unwrap();
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert!(wf.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(wf.completed_at.is_some());
}

#[tokio::test]
async fn unresolved_placeholders_stay_literal() {
    let mut h = Harness::new();

    let seen = Arc::new(std::sync::Mutex::new(json!(null)));
    {
        let seen = seen.clone();
        h.registry.register(Arc::new(FnTool::new("echo_tool", move |params, _| {
            *seen.lock().unwrap() = params.clone();
            Ok(json!({"ok": true}))
        })));
    }

    let steps = vec![WorkflowStep::tool_call(
        1,
        "Echo",
        "echo_tool",
        json!({"value": "{{step_9.missing}}"}),
    )];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "literal", steps));

    h.executor().execute_workflow(id, None).await.unwrap();

    assert_eq!(seen.lock().unwrap()["value"], "{{step_9.missing}}");
}

// ============================================================================
// Idempotent resume
// ============================================================================

#[tokio::test]
async fn resume_never_reexecutes_completed_steps() {
    let mut h = Harness::new();

    let invocations = Arc::new(AtomicUsize::new(0));
    {
        let invocations = invocations.clone();
        h.registry.register(Arc::new(FnTool::new("counted_tool", move |_, _| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        })));
    }

    let mut steps = vec![
        WorkflowStep::tool_call(1, "One", "counted_tool", json!({})),
        WorkflowStep::tool_call(2, "Two", "counted_tool", json!({})),
        WorkflowStep::tool_call(3, "Three", "counted_tool", json!({})),
    ];
    steps[0].complete(json!({"frozen": 1}));
    steps[1].complete(json!({"frozen": 2}));

    let mut wf = Workflow::new(Uuid::now_v7(), "resume", steps);
    wf.status = WorkflowStatus::WaitingUserInput;
    let id = wf.id;
    h.store.insert(wf);

    h.executor().execute_workflow(id, None).await.unwrap();

    // Only step 3 actually ran
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Completed);
    assert_eq!(after.step(1).unwrap().result.as_ref().unwrap()["frozen"], 1);
    assert_eq!(after.step(2).unwrap().result.as_ref().unwrap()["frozen"], 2);
}

#[tokio::test]
async fn running_workflow_is_not_executable() {
    let h = Harness::new();
    let mut wf = Workflow::new(Uuid::now_v7(), "busy", vec![]);
    wf.status = WorkflowStatus::Running;
    let id = wf.id;
    h.store.insert(wf);

    let err = h.executor().execute_workflow(id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotExecutable(_)));
    // Precondition failure changed nothing
    assert_eq!(h.store.get(id).unwrap().status, WorkflowStatus::Running);
}

// ============================================================================
// Search retry cascade
// ============================================================================

fn search_workflow(h: &mut Harness, first_count: u64, second_count: u64) -> Workflow {
    let calls = Arc::new(AtomicUsize::new(0));
    h.registry.register(Arc::new(FnTool::new("job_search", move |_, _| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let count = if n == 0 { first_count } else { second_count };
        let jobs: Vec<_> = (0..count)
            .map(|i| json!({"title": format!("Job {i}"), "company": format!("Firma {i}")}))
            .collect();
        Ok(json!({"job_count": count, "jobs": jobs}))
    })));

    let decision_params = json!({"skills": ["Rust"]});
    let mut decide_first = WorkflowStep::new(
        2,
        StepType::Decision,
        "Bewerte die Suchergebnisse auf ausreichende Treffer",
    );
    decide_first.tool_parameters = Some(decision_params.clone());
    let mut decide_second = WorkflowStep::new(
        4,
        StepType::Decision,
        "Bewerte die Suchergebnisse erneut auf Treffer",
    );
    decide_second.tool_parameters = Some(decision_params);

    let steps = vec![
        WorkflowStep::tool_call(1, "Suche nach Stellen", "job_search", json!({})),
        decide_first,
        WorkflowStep::tool_call(
            3,
            "Versuch 2: Suche mit erweiterten Parametern",
            "job_search",
            json!({}),
        ),
        decide_second,
    ];
    Workflow::new(Uuid::now_v7(), "job search with retry", steps)
}

#[tokio::test]
async fn weak_first_attempt_triggers_the_retry_step() {
    let mut h = Harness::new();
    // 2 results score 20, below the acceptance threshold of 30
    let wf = search_workflow(&mut h, 2, 5);
    let id = h.insert_approved(wf);

    h.executor().execute_workflow(id, None).await.unwrap();

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Completed);

    let first_decision = after.step(2).unwrap().result.clone().unwrap();
    assert_eq!(first_decision["quality_score"], 20);
    assert_eq!(first_decision["should_retry"], true);
    assert_eq!(first_decision["has_results"], false);

    // The retry step actually ran and found the better batch
    let retry = after.step(3).unwrap().result.clone().unwrap();
    assert_eq!(retry["job_count"], 5);

    let second_decision = after.step(4).unwrap().result.clone().unwrap();
    assert_eq!(second_decision["is_acceptable"], true);
    assert_eq!(second_decision["should_retry"], false);
}

#[tokio::test]
async fn strong_first_attempt_skips_the_retry_step() {
    let mut h = Harness::new();
    // 5 results score 50, acceptable on the first try
    let wf = search_workflow(&mut h, 5, 99);
    let id = h.insert_approved(wf);

    h.executor().execute_workflow(id, None).await.unwrap();

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Completed);

    let first_decision = after.step(2).unwrap().result.clone().unwrap();
    assert_eq!(first_decision["has_results"], true);

    // Step 3 was skipped: its result is the carried-forward decision, not a
    // fresh search
    let skipped = after.step(3).unwrap();
    assert_eq!(skipped.status, StepStatus::Completed);
    assert_eq!(skipped.result.as_ref().unwrap()["has_results"], true);
    assert!(skipped.result.as_ref().unwrap().get("job_count").is_none());

    let messages = h.sink.messages_for(after.session_id);
    assert!(messages.iter().any(|m| m.contains("skipped")));
}

#[tokio::test]
async fn decision_without_criteria_fails_the_workflow() {
    let mut h = Harness::new();
    h.registry.register(Arc::new(FnTool::new("job_search", |_, _| {
        Ok(json!({"job_count": 0, "jobs": []}))
    })));

    let steps = vec![
        WorkflowStep::tool_call(1, "Suche nach Stellen", "job_search", json!({})),
        WorkflowStep::new(2, StepType::Decision, "Bewerte die Treffer"),
    ];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "no criteria", steps));

    let err = h.executor().execute_workflow(id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::NoSearchCriteria));

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Failed);
    assert_eq!(after.step(2).unwrap().status, StepStatus::Failed);
    // The search step's result survived the failure
    assert_eq!(after.step(1).unwrap().result.as_ref().unwrap()["job_count"], 0);
}

// ============================================================================
// Analysis steps
// ============================================================================

#[tokio::test]
async fn analysis_step_extracts_expected_fields() {
    let h = Harness::new();
    h.driver.push_content(
        "Hier die Details:\n**Firmenname:** Acme GmbH\n**Standort:** Hamburg\n",
    );

    let mut step = WorkflowStep::new(1, StepType::Analysis, "Extrahiere die Firmendaten");
    step.expected_output_format = Some(vec!["firmenname".into(), "standort".into()]);
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "analysis", vec![step]));

    h.executor().execute_workflow(id, None).await.unwrap();

    let after = h.store.get(id).unwrap();
    let result = after.step(1).unwrap().result.clone().unwrap();
    assert_eq!(result["firmenname"], "Acme GmbH");
    assert_eq!(result["standort"], "Hamburg");
}

#[tokio::test]
async fn notification_step_resolves_placeholders_into_the_status_channel() {
    let mut h = Harness::new();
    h.registry.register(Arc::new(FnTool::new("job_search", |_, _| {
        Ok(json!({"job_count": 7}))
    })));

    let steps = vec![
        WorkflowStep::tool_call(1, "Suche", "job_search", json!({})),
        WorkflowStep::new(
            2,
            StepType::Notification,
            "Die Suche fand {{step_1.job_count}} Stellen",
        ),
    ];
    let wf = Workflow::new(Uuid::now_v7(), "notify", steps);
    let session_id = wf.session_id;
    let id = h.insert_approved(wf);

    h.executor().execute_workflow(id, None).await.unwrap();

    let messages = h.sink.messages_for(session_id);
    assert!(messages.iter().any(|m| m == "Die Suche fand 7 Stellen"));
}

// ============================================================================
// Email two-phase through the executor
// ============================================================================

#[tokio::test]
async fn email_step_pauses_then_confirmation_sends_and_continues() {
    let mut h = Harness::new();
    let user = h.add_user();
    h.registry.register(Arc::new(FnTool::new("followup_tool", |_, _| {
        Ok(json!({"done": true}))
    })));

    let steps = vec![
        WorkflowStep::tool_call(
            1,
            "Sende die Bewerbung",
            "send_email",
            json!({"to": "hr@acme.example", "subject": "Bewerbung", "body": "Hallo"}),
        ),
        WorkflowStep::tool_call(2, "Nachbereitung", "followup_tool", json!({})),
    ];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "email flow", steps));
    let executor = h.executor();

    executor.execute_workflow(id, Some(user)).await.unwrap();

    // Paused, nothing sent, step 2 untouched
    let paused = h.store.get(id).unwrap();
    assert_eq!(paused.status, WorkflowStatus::WaitingUserInput);
    assert_eq!(paused.step(1).unwrap().status, StepStatus::PendingConfirmation);
    assert_eq!(paused.step(2).unwrap().status, StepStatus::Pending);
    assert!(paused.step(1).unwrap().email_details.is_some());
    assert!(h.mailer.sent().is_empty());

    executor.confirm_step(id, 1, Some(user)).await.unwrap();

    let done = h.store.get(id).unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.step(1).unwrap().result.as_ref().unwrap()["status"], "sent");
    assert_eq!(done.step(2).unwrap().status, StepStatus::Completed);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "hr@acme.example");
}

#[tokio::test]
async fn reinvoking_a_paused_email_workflow_stays_paused() {
    let h = Harness::new();
    let user = h.add_user();

    let steps = vec![WorkflowStep::tool_call(
        1,
        "Sende die Bewerbung",
        "send_email",
        json!({"to": "hr@acme.example", "subject": "s", "body": "b"}),
    )];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "email idempotent", steps));
    let executor = h.executor();

    executor.execute_workflow(id, Some(user)).await.unwrap();
    executor.execute_workflow(id, Some(user)).await.unwrap();

    let wf = h.store.get(id).unwrap();
    assert_eq!(wf.status, WorkflowStatus::WaitingUserInput);
    assert_eq!(wf.step(1).unwrap().status, StepStatus::PendingConfirmation);
    assert!(h.mailer.sent().is_empty());
}

// ============================================================================
// Resume with user input
// ============================================================================

#[tokio::test]
async fn resume_merges_user_input_into_the_context() {
    let mut h = Harness::new();

    let seen = Arc::new(std::sync::Mutex::new(json!(null)));
    {
        let seen = seen.clone();
        h.registry.register(Arc::new(FnTool::new("city_search", move |params, _| {
            *seen.lock().unwrap() = params.clone();
            Ok(json!({"ok": true}))
        })));
    }

    let mut step1 = WorkflowStep::tool_call(1, "Frage den Ort ab", "ask_location", json!({}));
    step1.complete(json!({"asked": true}));
    let steps = vec![
        step1,
        WorkflowStep::tool_call(
            2,
            "Suche im gewünschten Ort",
            "city_search",
            json!({"where": "{{user_input.city}}"}),
        ),
    ];
    let mut wf = Workflow::new(Uuid::now_v7(), "resume", steps);
    wf.request_user_input("Where should I search?", json!({"step_number": 1}));
    let id = wf.id;
    h.store.insert(wf);

    h.executor()
        .resume(id, Some(json!({"city": "Hamburg"})), None)
        .await
        .unwrap();

    // The payload was visible to the remaining steps under user_input
    assert_eq!(seen.lock().unwrap()["where"], "Hamburg");
    let wf = h.store.get(id).unwrap();
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert!(wf.user_interaction_message.is_none());
}

#[tokio::test]
async fn resume_requires_a_waiting_workflow() {
    let h = Harness::new();
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "not waiting", vec![]));

    let err = h
        .executor()
        .resume(id, Some(json!({"city": "Hamburg"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotExecutable(_)));
}

// ============================================================================
// Contact exhaustion
// ============================================================================

#[tokio::test]
async fn contact_exhaustion_fails_the_step_and_workflow() {
    let mut h = Harness::new();
    h.registry.register(Arc::new(FnTool::new("job_search", |_, _| {
        Ok(json!({
            "job_count": 2,
            "jobs": [
                {"company": "Alpha GmbH", "url": "u1"},
                {"company": "Beta AG", "url": "u2"},
            ],
        }))
    })));
    h.registry.register(Arc::new(FnTool::new("find_contacts", |_, _| {
        Ok(json!({"success": false}))
    })));

    let steps = vec![
        WorkflowStep::tool_call(1, "Suche", "job_search", json!({})),
        WorkflowStep::tool_call(2, "Finde Ansprechpartner", "find_contacts", json!({})),
    ];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "contacts", steps));

    let err = h.executor().execute_workflow(id, None).await.unwrap_err();
    match err {
        EngineError::ContactsNotFound { attempts } => assert_eq!(attempts, 2),
        other => panic!("expected ContactsNotFound, got {other:?}"),
    }

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Failed);
    assert_eq!(after.step(2).unwrap().status, StepStatus::Failed);
}

// ============================================================================
// Execution history
// ============================================================================

#[tokio::test]
async fn executions_accumulate_with_monotonic_numbers() {
    let mut h = Harness::new();
    h.registry.register(Arc::new(FnTool::new("noop_tool", |_, _| {
        Ok(json!({"ok": true}))
    })));

    let steps = vec![WorkflowStep::tool_call(1, "Noop", "noop_tool", json!({}))];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "history", steps));
    let executor = h.executor();

    executor.execute_workflow(id, None).await.unwrap();
    executor.retry_failed(id, None).await.unwrap_err(); // not failed, rejected

    // Re-approve and run again
    let mut wf = h.store.get(id).unwrap();
    wf.status = WorkflowStatus::Approved;
    for step in &mut wf.steps {
        step.reset();
    }
    h.store.insert(wf);
    executor.execute_workflow(id, None).await.unwrap();

    let executions = h.store.list_executions(id).await.unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].execution_number, 1);
    assert_eq!(executions[1].execution_number, 2);
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Completed));
    assert!(executions[0].step_results.is_some());
    assert!(executions[0].duration_seconds.is_some());
}

#[tokio::test]
async fn retry_failed_resets_and_reruns_failed_steps() {
    let mut h = Harness::new();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        h.registry.register(Arc::new(FnTool::new("flaky_tool", move |_, _| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::tool("flaky_tool", "boom"))
            } else {
                Ok(json!({"ok": true}))
            }
        })));
    }

    let steps = vec![WorkflowStep::tool_call(1, "Flaky", "flaky_tool", json!({}))];
    let id = h.insert_approved(Workflow::new(Uuid::now_v7(), "retry failed", steps));
    let executor = h.executor();

    executor.execute_workflow(id, None).await.unwrap_err();
    assert_eq!(h.store.get(id).unwrap().status, WorkflowStatus::Failed);

    executor.retry_failed(id, None).await.unwrap();

    let after = h.store.get(id).unwrap();
    assert_eq!(after.status, WorkflowStatus::Completed);
    assert_eq!(after.step(1).unwrap().result.as_ref().unwrap()["ok"], true);
}
