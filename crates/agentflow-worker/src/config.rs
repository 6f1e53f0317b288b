// Worker configuration, loaded from the environment

use std::time::Duration;

use agentflow_core::RetryPolicy;

use crate::agent::AgentCallerConfig;
use crate::openai::OpenAiConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub openai: OpenAiConfig,
    pub agent: AgentCallerConfig,
    pub scheduler: SchedulerConfig,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let defaults = AgentCallerConfig::default();
        let agent = AgentCallerConfig {
            primary_model: env_or("AGENT_MODEL", &defaults.primary_model),
            lite_model: env_or("AGENT_LITE_MODEL", &defaults.lite_model),
            degrade_after: env_parsed("AGENT_DEGRADE_AFTER", defaults.degrade_after),
            retry: RetryPolicy {
                max_attempts: env_parsed("AGENT_RETRY_ATTEMPTS", defaults.retry.max_attempts),
                delay_seconds: env_parsed("AGENT_RETRY_DELAY_SECS", defaults.retry.delay_seconds),
            },
        };

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            poll_interval: Duration::from_secs(env_parsed(
                "SCHEDULER_POLL_INTERVAL_SECS",
                scheduler_defaults.poll_interval.as_secs(),
            )),
            claim_limit: env_parsed("SCHEDULER_CLAIM_LIMIT", scheduler_defaults.claim_limit),
        };

        Ok(Self {
            database_url,
            openai: OpenAiConfig { base_url, api_key },
            agent,
            scheduler,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
