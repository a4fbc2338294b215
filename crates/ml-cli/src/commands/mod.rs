pub mod chat;
pub mod config;
pub mod heuristics;
pub mod repl;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ml_agents::pipeline::{AgentProviders, Pipeline};
use ml_core::config::Config;
use ml_core::conversation_cache::{ConversationCache, InMemoryBackend};
use ml_intelligence::llm::{AnthropicProvider, LlmProvider, MockProvider};

/// Load the config file at `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::load_from(p).with_context(|| format!("loading {}", p.display())),
        None => Config::load().context("loading ~/.mollei/config.toml"),
    }
}

/// Model provider from config. The API key comes from the environment only.
pub fn build_provider(config: &Config, offline: bool) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if offline {
        tracing::info!("offline mode: every agent will serve its fallback");
        return Ok(Arc::new(MockProvider::new()));
    }

    let env = &config.providers.anthropic_key_env;
    let key = std::env::var(env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{env} is not set (or pass --offline)"))?;
    Ok(Arc::new(
        AnthropicProvider::new(key).with_base_url(config.providers.anthropic_base_url.clone()),
    ))
}

pub fn build_pipeline(config: Config, offline: bool) -> anyhow::Result<Pipeline> {
    let provider = build_provider(&config, offline)?;
    let cache = ConversationCache::new(Arc::new(InMemoryBackend::from_config(&config.cache)));
    Ok(Pipeline::new(config, AgentProviders::new(provider), cache))
}
