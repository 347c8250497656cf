//! Composition root shared by the commands.

use anyhow::Context;
use replybot_agent::{Agent, AgentConfig, PromptCache};
use replybot_config::AppConfig;
use replybot_core::channel::Messenger;
use replybot_core::provider::Provider;
use replybot_core::tool::ToolRegistry;
use replybot_history::{ObjectHistoryStore, ObjectStore};
use replybot_tools::{EventCalendar, ToolDeps};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CALENDAR_PREFIX: &str = "calendar/";

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

pub fn upstream_timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.provider.request_timeout_secs)
}

pub struct Storage {
    pub objects: Arc<dyn ObjectStore>,
    pub history: Arc<ObjectHistoryStore>,
}

pub fn open_storage(config: &AppConfig) -> anyhow::Result<Storage> {
    let objects = replybot_history::open_object_store(&config.history, upstream_timeout(config))
        .context("Failed to open the history store")?;
    info!(backend = objects.name(), "History store ready");
    let history = Arc::new(ObjectHistoryStore::new(
        objects.clone(),
        config.history.prefix.clone(),
    ));
    Ok(Storage { objects, history })
}

/// Everything the agent needs, built once per process.
pub struct Runtime {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub storage: Storage,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: String,
}

impl Runtime {
    pub fn build(config: AppConfig, messenger: Arc<dyn Messenger>) -> anyhow::Result<Self> {
        let provider = replybot_providers::build_from_config(&config.provider)
            .context("Failed to set up the model provider")?;
        let storage = open_storage(&config)?;
        let forecasts =
            replybot_tools::forecast_service_from_config(&config.weather, upstream_timeout(&config))
                .context("Failed to set up the weather source")?;
        let calendar = Arc::new(EventCalendar::new(storage.objects.clone(), CALENDAR_PREFIX));
        let tools = replybot_tools::default_registry(ToolDeps {
            forecasts,
            calendar,
            messenger,
        })
        .context("Failed to register tools")?;
        let system_prompt = config.system_prompt()?;

        info!(
            provider = provider.name(),
            model = %config.provider.model,
            tools = ?tools.names(),
            "Runtime ready"
        );
        Ok(Self {
            config,
            provider,
            storage,
            tools: Arc::new(tools),
            system_prompt,
        })
    }

    /// Upload the system prompt when caching is enabled. Failure degrades to
    /// uncached calls.
    pub async fn prompt_cache(&self) -> Option<Arc<PromptCache>> {
        if !self.config.provider.cache_system_prompt {
            return None;
        }
        match PromptCache::create(
            self.provider.clone(),
            &self.system_prompt,
            &self.tools.definitions(),
        )
        .await
        {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Prompt cache unavailable, sending the system prompt inline");
                None
            }
        }
    }

    pub fn agent(&self, cache: Option<Arc<PromptCache>>) -> Agent {
        Agent::new(
            self.provider.clone(),
            self.storage.history.clone(),
            self.tools.clone(),
            self.system_prompt.clone(),
        )
        .with_config(AgentConfig::from(&self.config.agent))
        .with_cache(cache)
    }

    pub async fn shutdown(self, cache: Option<Arc<PromptCache>>) {
        if let Some(cache) = cache {
            cache.release().await;
        }
        if let Err(e) = self.provider.close().await {
            warn!(error = %e, "Provider close failed");
        }
    }
}
