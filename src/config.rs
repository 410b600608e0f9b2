//! Startup configuration.
//!
//! The set of enabled chat models is declared explicitly and the credentials
//! behind them are checked when the configuration is loaded, producing a
//! typed list of available models. A model that isn't in the list doesn't
//! exist as far as the pipeline is concerned; availability is never
//! discovered by probing providers and swallowing failures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::ChatModel;

/// Chat models enabled when `LECTERN_CHAT_MODELS` is unset.
pub const DEFAULT_CHAT_MODELS: &[&str] = &[
    "openai/gpt-3.5-turbo-0125",
    "anthropic/claude-3-haiku",
    "cohere/command-r",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("no chat models configured")]
    NoModels,

    #[error("no reranker endpoints configured")]
    NoRerankers,

    #[error("malformed reranker entry: {0} (expected name=url)")]
    MalformedReranker(String),
}

/// One configured cross-encoder endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerEndpoint {
    /// Checkpoint name shown on the configuration surface,
    /// e.g. "cross-encoder/ms-marco-MiniLM-L-6-v2".
    pub name: String,
    pub url: String,
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openrouter_api_key: String,
    pub openai_api_key: String,
    pub weaviate_url: String,
    pub weaviate_api_key: Option<String>,
    /// Serialized router reference-utterance configuration.
    pub router_config_path: PathBuf,
    pub rerankers: Vec<RerankerEndpoint>,
    /// The typed list of available chat models. The first entry is the
    /// default reader and responder.
    pub chat_models: Vec<ChatModel>,
}

impl AppConfig {
    /// Load and validate from the environment.
    ///
    /// Required: `OPENROUTER_API_KEY` (chat), `OPENAI_API_KEY` (router
    /// embeddings), `WEAVIATE_URL`, `LECTERN_RERANKERS`.
    /// Optional: `WEAVIATE_API_KEY`, `LECTERN_ROUTER_CONFIG` (default
    /// `router_config.json`), `LECTERN_CHAT_MODELS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let openrouter_api_key =
            require_var("OPENROUTER_API_KEY").ok_or(ConfigError::MissingVar("OPENROUTER_API_KEY"))?;
        let openai_api_key =
            require_var("OPENAI_API_KEY").ok_or(ConfigError::MissingVar("OPENAI_API_KEY"))?;
        let weaviate_url =
            require_var("WEAVIATE_URL").ok_or(ConfigError::MissingVar("WEAVIATE_URL"))?;
        let weaviate_api_key = require_var("WEAVIATE_API_KEY");

        let router_config_path = std::env::var("LECTERN_ROUTER_CONFIG")
            .unwrap_or_else(|_| "router_config.json".into())
            .into();

        let rerankers = parse_rerankers(
            &require_var("LECTERN_RERANKERS").ok_or(ConfigError::MissingVar("LECTERN_RERANKERS"))?,
        )?;

        let chat_models = match require_var("LECTERN_CHAT_MODELS") {
            Some(raw) => parse_models(&raw)?,
            None => DEFAULT_CHAT_MODELS
                .iter()
                .map(|id| ChatModel::new(*id))
                .collect(),
        };

        if chat_models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        Ok(Self {
            openrouter_api_key,
            openai_api_key,
            weaviate_url,
            weaviate_api_key,
            router_config_path,
            rerankers,
            chat_models,
        })
    }

    /// The default reader/responder model.
    pub fn default_model(&self) -> &ChatModel {
        &self.chat_models[0]
    }

    /// Whether `model` is in the enabled list.
    pub fn is_enabled(&self, model: &ChatModel) -> bool {
        self.chat_models.contains(model)
    }
}

fn require_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma-separated model list.
fn parse_models(raw: &str) -> Result<Vec<ChatModel>, ConfigError> {
    let models: Vec<ChatModel> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ChatModel::new)
        .collect();
    if models.is_empty() {
        return Err(ConfigError::NoModels);
    }
    Ok(models)
}

/// Parse `name=url;name=url` reranker entries.
fn parse_rerankers(raw: &str) -> Result<Vec<RerankerEndpoint>, ConfigError> {
    let mut endpoints = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedReranker(entry.to_string()))?;
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::MalformedReranker(entry.to_string()));
        }
        endpoints.push(RerankerEndpoint {
            name: name.to_string(),
            url: url.to_string(),
        });
    }
    if endpoints.is_empty() {
        return Err(ConfigError::NoRerankers);
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_list() {
        let models = parse_models("openai/gpt-3.5-turbo-0125, cohere/command-r").unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].model_id(), "cohere/command-r");
    }

    #[test]
    fn empty_model_list_is_rejected() {
        assert!(matches!(parse_models(" , "), Err(ConfigError::NoModels)));
    }

    #[test]
    fn parses_reranker_entries() {
        let endpoints = parse_rerankers(
            "cross-encoder/ms-marco-MiniLM-L-6-v2=http://localhost:8080;\
             BAAI/bge-reranker-base=http://localhost:8081",
        )
        .unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "cross-encoder/ms-marco-MiniLM-L-6-v2");
        assert_eq!(endpoints[1].url, "http://localhost:8081");
    }

    #[test]
    fn malformed_reranker_entry_is_rejected() {
        assert!(matches!(
            parse_rerankers("no-equals-sign"),
            Err(ConfigError::MalformedReranker(_))
        ));
    }
}
