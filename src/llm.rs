use crate::error::{Error, Result};
use crate::http::HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// LLM provider — determines API format and endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[default]
    OpenRouter,
    /// Any OpenAI-compatible API (together.ai, local ollama, etc.)
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
}

impl Provider {
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "http://localhost:11434/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
        }
    }

    fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }
}

/// Token usage from a single API call.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    http: HttpClient,
}

// -- Anthropic simple completion wire types --

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Msg<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// -- OpenAI-compatible simple completion wire types --

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Msg<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// -- Shared simple message --

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

/// Result of a single-turn completion: the raw text plus usage, so callers
/// can cost-meter without a second round trip.
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = HttpClient::new("scamwatch-agent/0.1.0")?;
        let base_url = base_url.unwrap_or_else(|| provider.default_base_url().into());
        Ok(Self {
            provider,
            api_key,
            model,
            max_tokens,
            base_url,
            http,
        })
    }

    /// Build from config, reading the API key from the specified env var.
    pub fn from_config(
        provider: Provider,
        model: String,
        max_tokens: u32,
        api_key_env: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let env_var = api_key_env.unwrap_or_else(|| provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        Self::new(provider, api_key, model, max_tokens, base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-turn completion: system prompt + one user message, no history.
    /// Both the reasoner (Mode A) and the fast-path classifier use this —
    /// neither needs multi-turn tool use.
    pub async fn complete(&self, system: &str, user_message: &str) -> Result<String> {
        Ok(self.complete_with_usage(system, user_message).await?.text)
    }

    pub async fn complete_with_usage(&self, system: &str, user_message: &str) -> Result<Completion> {
        debug!(provider = ?self.provider, model = %self.model, "sending LLM request");

        match self.provider {
            Provider::Anthropic => self.complete_anthropic(system, user_message).await,
            Provider::OpenRouter | Provider::OpenAi | Provider::Groq => {
                self.complete_openai(system, user_message).await
            }
        }
    }

    /// Send a prompt and parse the response as JSON, stripping markdown fences if present.
    pub async fn complete_json<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user_message: &str,
    ) -> Result<T> {
        let text = self.complete(system, user_message).await?;
        let json_str = extract_json(&text);
        serde_json::from_str(json_str)
            .map_err(|e| Error::parse(format!("parse LLM JSON: {e}\nraw: {text}")))
    }

    async fn complete_anthropic(&self, system: &str, user_message: &str) -> Result<Completion> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Msg {
                role: "user",
                content: user_message,
            }],
        };

        let body = serde_json::to_string(&request)
            .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/messages", self.base_url);
        let response_text = self
            .http
            .post_json_raw(
                &url,
                &body,
                &[
                    ("x-api-key", &self.api_key),
                    ("anthropic-version", "2023-06-01"),
                ],
            )
            .await
            .map_err(|e| {
                warn!("Anthropic API error: {e}");
                e
            })?;

        let resp: AnthropicResponse = serde_json::from_str(&response_text)
            .map_err(|e| Error::parse(format!("parse Anthropic response: {e}")))?;

        let text = resp
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Completion {
            text,
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
        })
    }

    async fn complete_openai(&self, system: &str, user_message: &str) -> Result<Completion> {
        let request = OpenAiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user_message,
                },
            ],
        };

        let body = serde_json::to_string(&request)
            .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/chat/completions", self.base_url);
        let response_text = self
            .http
            .post_json_raw(
                &url,
                &body,
                &[("Authorization", &format!("Bearer {}", self.api_key))],
            )
            .await
            .map_err(|e| {
                warn!("LLM API error: {e}");
                e
            })?;

        let resp: OpenAiResponse = serde_json::from_str(&response_text)
            .map_err(|e| Error::parse(format!("parse LLM response: {e}")))?;

        let usage = resp
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let text = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::parse("empty response from LLM"))?;

        Ok(Completion { text, usage })
    }
}

/// Extract JSON from a response that might be wrapped in markdown code fences.
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let content = &text[start + 7..];
        if let Some(end) = content.find("```") {
            return content[..end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let content = &text[start + 3..];
        if let Some(end) = content.find("```") {
            let inner = content[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return inner;
            }
        }
    }
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
    {
        return &text[start..=end];
    }
    text
}

// -- Task-based model routing --

/// What kind of LLM task is being performed — determines which model to use.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TaskKind {
    /// Evidence-weighted reasoning over collected tool evidence (Mode A).
    Reasoning,
    /// Ingress fast-path text classification when no entities are found.
    FastPathClassification,
}

/// Routes LLM requests to different models based on task kind.
#[derive(Clone)]
pub struct ModelRouter {
    clients: HashMap<TaskKind, LlmClient>,
    default: LlmClient,
}

impl ModelRouter {
    pub fn new(default: LlmClient) -> Self {
        Self {
            clients: HashMap::new(),
            default,
        }
    }

    pub fn with_client(mut self, kind: TaskKind, client: LlmClient) -> Self {
        self.clients.insert(kind, client);
        self
    }

    /// Get the LLM client for a specific task kind. Falls back to the default.
    pub fn client_for(&self, kind: TaskKind) -> &LlmClient {
        self.clients.get(&kind).unwrap_or(&self.default)
    }

    /// Get the default LLM client.
    #[allow(dead_code)]
    pub fn default_client(&self) -> &LlmClient {
        &self.default
    }
}

/// Estimate cost in USD for a single API call based on token usage and model.
///
/// Rates are approximate — verify against provider pricing pages.
pub fn estimate_cost_usd(usage: &Usage, model: &str) -> f64 {
    // Per-million-token rates (input, output)
    let (input_per_m, output_per_m) = match model {
        m if m.contains("opus") => (15.0, 75.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (0.25, 1.25),
        m if m.contains("gpt-4o") => (2.50, 10.0),
        m if m.contains("gpt-4") => (10.0, 30.0),
        m if m.contains(":free") => (0.0, 0.0),
        _ => (1.0, 2.0), // conservative default for unknown models
    };
    (usage.input_tokens as f64 * input_per_m + usage.output_tokens as f64 * output_per_m)
        / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_strips_json_fences() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn extract_json_strips_bare_fences_with_json() {
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn extract_json_embedded_object() {
        let input = "some text {\"a\":1} more text";
        assert_eq!(extract_json(input), "{\"a\":1}");
    }

    #[test]
    fn extract_json_no_json_returns_input() {
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[test]
    fn extract_json_array_in_fences() {
        assert_eq!(extract_json("```json\n[1,2,3]\n```"), "[1,2,3]");
    }

    #[test]
    fn estimate_cost_opus() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        let cost = estimate_cost_usd(&usage, "claude-opus-4-20250514");
        assert!((cost - 0.0525).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_cost_free_model() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        let cost = estimate_cost_usd(&usage, "arcee-ai/trinity:free");
        assert!((cost - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_cost_unknown_model() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        let cost = estimate_cost_usd(&usage, "some-unknown-model");
        assert!((cost - 0.002).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_cost_sonnet() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        let cost = estimate_cost_usd(&usage, "claude-sonnet-4-20250514");
        assert!((cost - 0.0105).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_cost_zero_tokens() {
        let zero = Usage {
            input_tokens: 0,
            output_tokens: 0,
        };
        assert!((estimate_cost_usd(&zero, "opus") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn router_falls_back_to_default() {
        let default = LlmClient::new(
            Provider::OpenRouter,
            "key".into(),
            "default-model".into(),
            1024,
            None,
        )
        .unwrap();
        let router = ModelRouter::new(default);
        assert_eq!(router.client_for(TaskKind::Reasoning).model(), "default-model");
    }

    #[test]
    fn router_uses_override_for_matching_kind() {
        let default = LlmClient::new(
            Provider::OpenRouter,
            "key".into(),
            "default-model".into(),
            1024,
            None,
        )
        .unwrap();
        let fast = LlmClient::new(
            Provider::Groq,
            "key".into(),
            "fast-model".into(),
            256,
            None,
        )
        .unwrap();
        let router = ModelRouter::new(default).with_client(TaskKind::FastPathClassification, fast);
        assert_eq!(
            router.client_for(TaskKind::FastPathClassification).model(),
            "fast-model"
        );
        assert_eq!(router.client_for(TaskKind::Reasoning).model(), "default-model");
    }
}
