use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentflow_core::{
    AgentDriver, DocumentStore, StatusSink, ToolRegistry, UserDirectory, WorkflowStore,
};
use agentflow_storage::{
    create_db_document_store, create_db_status_sink, create_db_user_directory,
    create_db_workflow_store, Database,
};
use agentflow_worker::{
    AgentCaller, OpenAiDriver, Scheduler, ToolInvoker, WorkerConfig, WorkflowExecutor,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentflow_worker=info,agentflow_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("agentflow-worker starting...");

    let config = WorkerConfig::from_env()?;

    let db = Database::from_url(&config.database_url).await?;
    db.run_migrations().await?;

    let store: Arc<dyn WorkflowStore> = Arc::new(create_db_workflow_store(db.clone()));
    let status: Arc<dyn StatusSink> = Arc::new(create_db_status_sink(db.clone()));
    let documents: Arc<dyn DocumentStore> = Arc::new(create_db_document_store(db.clone()));
    let users: Arc<dyn UserDirectory> = Arc::new(create_db_user_directory(db.clone()));

    let driver: Arc<dyn AgentDriver> = Arc::new(OpenAiDriver::new(config.openai.clone()));
    let agent = Arc::new(AgentCaller::new(driver, config.agent.clone()));

    // Domain tools are registered by deployment-specific wiring; the built-in
    // email and contact-lookup flows work without any registrations.
    let registry = ToolRegistry::new();
    let tools = Arc::new(ToolInvoker::new(
        registry,
        agent.clone(),
        documents,
        users,
        create_db_mailer(),
    ));

    let executor = Arc::new(WorkflowExecutor::new(store.clone(), status, agent, tools));

    let scheduler = Arc::new(Scheduler::new(store, executor, config.scheduler.clone()));
    let handle = scheduler.clone().spawn();

    tracing::info!("Worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown();
    handle.await.ok();

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Outbound mail transport. SMTP wiring is deployment-specific; the default
/// logs the message instead of sending it.
fn create_db_mailer() -> Arc<dyn agentflow_core::MailerTransport> {
    use agentflow_core::{EmailMessage, MailerTransport};
    use async_trait::async_trait;

    struct LoggingMailer;

    #[async_trait]
    impl MailerTransport for LoggingMailer {
        async fn send(&self, message: &EmailMessage) -> agentflow_core::Result<()> {
            tracing::info!(
                to = %message.to,
                subject = %message.subject,
                attachments = message.attachments.len(),
                "Email dispatched"
            );
            Ok(())
        }
    }

    Arc::new(LoggingMailer)
}
