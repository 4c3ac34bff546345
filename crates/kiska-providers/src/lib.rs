//! Reply resolvers and the remote services KISKA talks to.
//!
//! Each resolver implements [`ReplyResolver`]: text (plus recent history) in,
//! reply text out. [`client::ResolverClient`] wraps one with history, a
//! timeout and error normalization.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kiska_core::config::ResolverConfig;
use kiska_core::transcript::Origin;

pub mod client;
#[cfg(feature = "firebase")]
pub mod identity;
#[cfg(feature = "openai")]
pub mod openai;
pub mod sample;
pub mod sse;
#[cfg(feature = "weather")]
pub mod weather;

pub use client::ResolverClient;

/// One prior message handed to a resolver as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub origin: Origin,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            origin: Origin::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            origin: Origin::Assistant,
            content: content.into(),
        }
    }
}

/// Maps input text to a reply.
#[async_trait]
pub trait ReplyResolver: Send + Sync {
    /// Resolver identifier (e.g., "sample", "openai").
    fn id(&self) -> &str;

    async fn resolve(&self, text: &str, history: &[HistoryMessage]) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resolver '{resolver}' failed: {message}")]
    Failed { resolver: String, message: String },

    #[error("resolver '{0}' returned an empty reply")]
    EmptyReply(String),

    #[error("resolver '{resolver}' timed out after {after:?}")]
    Timeout { resolver: String, after: Duration },
}

/// Build the resolver named by `config.provider`.
pub fn resolver_from_config(config: &ResolverConfig) -> anyhow::Result<Arc<dyn ReplyResolver>> {
    match config.provider.as_str() {
        "sample" => Ok(Arc::new(sample::SampleResolver::new())),
        #[cfg(feature = "openai")]
        "openai" | "openrouter" | "ollama" => Ok(Arc::new(openai::OpenAiResolver::from_config(config)?)),
        other => anyhow::bail!("Unknown resolver provider '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_from_config() {
        let sample = resolver_from_config(&ResolverConfig::default()).unwrap();
        assert_eq!(sample.id(), "sample");

        let unknown = ResolverConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(resolver_from_config(&unknown).is_err());
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_ollama_needs_no_key() {
        let config = ResolverConfig {
            provider: "ollama".into(),
            model: Some("llama3.2".into()),
            ..Default::default()
        };
        assert_eq!(resolver_from_config(&config).unwrap().id(), "ollama");
    }
}
