//! OpenAI-compatible chat completions resolver.
//!
//! Streams `/v1/chat/completions` and concatenates the content deltas. The
//! same wire format serves OpenAI, OpenRouter and a local Ollama.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use kiska_core::config::ResolverConfig;
use kiska_core::transcript::Origin;

use crate::sse::parse_sse_stream;
use crate::{HistoryMessage, ReplyResolver};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

const DEFAULT_SYSTEM_PROMPT: &str = "You are KISKA, a concise and friendly voice assistant. \
Your replies are spoken aloud, so answer in one to three short sentences without markdown.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    OpenRouter,
    Ollama,
}

impl ApiStyle {
    fn from_provider(provider: &str) -> Option<Self> {
        match provider {
            "openai" => Some(Self::OpenAi),
            "openrouter" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::OpenRouter => OPENROUTER_BASE_URL,
            Self::Ollama => OLLAMA_BASE_URL,
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Ollama => "llama3.2",
        }
    }

    fn id(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }
}

pub struct OpenAiResolver {
    base_url: String,
    api_style: ApiStyle,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: Option<f64>,
    client: reqwest::Client,
}

impl OpenAiResolver {
    pub fn from_config(config: &ResolverConfig) -> anyhow::Result<Self> {
        let api_style = ApiStyle::from_provider(&config.provider).ok_or_else(|| {
            anyhow::anyhow!("'{}' is not an OpenAI-compatible provider", config.provider)
        })?;
        let api_key = config.resolve_api_key();
        if api_key.is_none() && api_style != ApiStyle::Ollama {
            anyhow::bail!("Resolver '{}' requires an API key", api_style.id());
        }

        Ok(Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(api_style.default_base_url())
                .trim_end_matches('/')
                .to_string(),
            api_style,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| api_style.default_model().to_string()),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_messages(&self, text: &str, history: &[HistoryMessage]) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": self.system_prompt }));
        for message in history {
            let role = match message.origin {
                Origin::User => "user",
                Origin::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": message.content }));
        }
        messages.push(json!({ "role": "user", "content": text }));
        messages
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Content carried by one streamed chunk, if any.
fn chunk_content(data: &str) -> anyhow::Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data)?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok((!content.is_empty()).then_some(content))
}

#[async_trait]
impl ReplyResolver for OpenAiResolver {
    fn id(&self) -> &str {
        self.api_style.id()
    }

    async fn resolve(&self, text: &str, history: &[HistoryMessage]) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(text, history),
            max_tokens: self.max_tokens,
            stream: true,
            temperature: self.temperature,
        };

        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if self.api_style == ApiStyle::OpenRouter {
            req = req.header("X-Title", "KISKA");
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {status}: {body}", self.api_style.id());
        }

        let mut events = std::pin::pin!(parse_sse_stream(resp));
        let mut reply = String::new();
        while let Some(event) = events.next().await {
            let event = event?;
            if event.data == "[DONE]" {
                break;
            }
            trace!(data = %event.data, "Chat chunk");
            if let Some(content) = chunk_content(&event.data)? {
                reply.push_str(&content);
            }
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ResolverConfig {
        ResolverConfig {
            provider: provider.into(),
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_urls_and_trailing_slash() {
        let openai = OpenAiResolver::from_config(&config("openai")).unwrap();
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let mut custom = config("ollama");
        custom.base_url = Some("http://gpu-box:11434/".into());
        let ollama = OpenAiResolver::from_config(&custom).unwrap();
        assert_eq!(ollama.endpoint(), "http://gpu-box:11434/v1/chat/completions");
        assert_eq!(ollama.model, "llama3.2");
    }

    #[test]
    fn test_hosted_providers_require_key() {
        let mut keyless = config("openrouter");
        keyless.api_key = None;
        assert!(OpenAiResolver::from_config(&keyless).is_err());
        assert!(OpenAiResolver::from_config(&config("sample")).is_err());
    }

    #[test]
    fn test_messages_include_system_history_and_input() {
        let resolver = OpenAiResolver::from_config(&config("openai")).unwrap();
        let history = [HistoryMessage::user("hi"), HistoryMessage::assistant("Hello!")];
        let messages = resolver.build_messages("what now?", &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "what now?");
    }

    #[test]
    fn test_chunk_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(chunk_content(data).unwrap().as_deref(), Some("Hel"));

        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(chunk_content(role_only).unwrap(), None);

        assert!(chunk_content("not json").is_err());
    }
}
