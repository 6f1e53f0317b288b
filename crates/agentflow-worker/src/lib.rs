// Workflow worker
//
// Hosts the execution side of the engine: the state-machine executor, the
// tool invoker, the agent caller with degraded-mode fallback, and the
// scheduler loop that triggers due workflows. The API side only writes
// workflow plans and confirmations; this crate does everything that runs.

pub mod agent;
pub mod config;
pub mod executor;
pub mod openai;
pub mod scheduler;
pub mod tools;

pub use agent::{AgentCaller, AgentCallerConfig};
pub use config::WorkerConfig;
pub use executor::WorkflowExecutor;
pub use openai::{OpenAiConfig, OpenAiDriver};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use tools::ToolInvoker;
