use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use herald_common::{ModelConfig, ModelProvider};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const OLLAMA_API_BASE: &str = "http://127.0.0.1:11434";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
}

/// Text-generation backend. One call per request; callers do not retry.
pub trait CompletionService: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    client: Client,
    provider: ModelProvider,
    model_id: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl HttpCompletionService {
    pub fn new(
        provider: ModelProvider,
        model_id: &str,
        endpoint: Option<&str>,
        api_key: Option<&str>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            bail!("model id is empty");
        }
        let base_url = match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => match provider {
                ModelProvider::Ollama => OLLAMA_API_BASE.to_string(),
                ModelProvider::OpenAi => OPENAI_API_BASE.to_string(),
                ModelProvider::Anthropic => ANTHROPIC_API_BASE.to_string(),
                ModelProvider::Custom => bail!("custom model provider requires an endpoint"),
            },
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            match provider {
                ModelProvider::Anthropic => {
                    headers.insert(
                        "x-api-key",
                        HeaderValue::from_str(key)
                            .with_context(|| "failed to build anthropic api key header")?,
                    );
                }
                _ => {
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&format!("Bearer {key}"))
                            .with_context(|| "failed to build authorization header")?,
                    );
                }
            }
        }
        if matches!(provider, ModelProvider::Anthropic) {
            headers.insert(
                "anthropic-version",
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .default_headers(headers)
            .build()
            .with_context(|| "failed to build completion HTTP client")?;

        Ok(Self {
            client,
            provider,
            model_id: model_id.to_string(),
            base_url,
        })
    }

    /// Builds a client from model config, reading the API key from `api_key_env` when set.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = match config.api_key_env.as_deref() {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("missing {var} for {} model", config.provider.as_str()))?,
            ),
            None => None,
        };
        Self::new(
            config.provider.clone(),
            &config.model_id,
            config.endpoint.as_deref(),
            api_key.as_deref(),
            config.timeout_ms,
        )
    }

    fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = self.provider.as_str(), url = %url, "completion request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("failed to call {} completion API", self.provider.as_str()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!(
                "{} completion failed: {} {}",
                self.provider.as_str(),
                status.as_u16(),
                body
            );
        }
        Ok(response)
    }

    fn complete_ollama(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.post(
            "/api/chat",
            serde_json::json!({
                "model": self.model_id,
                "stream": false,
                "messages": [
                    { "role": "system", "content": request.system_prompt },
                    { "role": "user", "content": request.user_prompt },
                ],
            }),
        )?;
        let body: OllamaChatResponse = response
            .json()
            .with_context(|| "failed to parse ollama chat response")?;
        body.message
            .content
            .ok_or_else(|| anyhow!("ollama response has no message content"))
    }

    fn complete_openai(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.post(
            "/v1/chat/completions",
            serde_json::json!({
                "model": self.model_id,
                "messages": [
                    { "role": "system", "content": request.system_prompt },
                    { "role": "user", "content": request.user_prompt },
                ],
            }),
        )?;
        let body: OpenAiChatResponse = response
            .json()
            .with_context(|| "failed to parse chat completion response")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion response has no choices"))
    }

    fn complete_anthropic(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.post(
            "/v1/messages",
            serde_json::json!({
                "model": self.model_id,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "system": request.system_prompt,
                "messages": [
                    { "role": "user", "content": request.user_prompt },
                ],
            }),
        )?;
        let body: AnthropicResponse = response
            .json()
            .with_context(|| "failed to parse anthropic messages response")?;
        let text = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            bail!("anthropic response has no text content");
        }
        Ok(text)
    }
}

impl CompletionService for HttpCompletionService {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let text = match self.provider {
            ModelProvider::Ollama => self.complete_ollama(request)?,
            ModelProvider::OpenAi | ModelProvider::Custom => self.complete_openai(request)?,
            ModelProvider::Anthropic => self.complete_anthropic(request)?,
        };
        Ok(CompletionResponse { text })
    }
}
