use crate::chat::{Reply, ToolDescriptor, Turn};
use crate::traits::ChatClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sibyl_common::{Result, SibylError};
use sibyl_http::{HttpClient, HttpError};
use std::time::Duration;

/// Client for any server implementing `POST {endpoint}/chat/completions`.
pub struct OpenAiChatClient {
    client: HttpClient,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDescriptor]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Reply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl OpenAiChatClient {
    /// Create a client for `endpoint` (e.g. `https://api.openai.com/v1`).
    ///
    /// An empty `api_key` sends no Authorization header, which local gateways
    /// usually accept.
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = HttpClient::new(endpoint)
            .map_err(|e| SibylError::Config(format!("HttpClient init failed: {e}")))?
            .with_timeout(Duration::from_secs(120));

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.client = self.client.with_retries(retries);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, turns: &[Turn], tools: &[ToolDescriptor]) -> Result<Reply> {
        let use_tools = !tools.is_empty();
        let req = ChatCompletionRequest {
            model: &self.model,
            messages: turns,
            tools: use_tools.then_some(tools),
            tool_choice: use_tools.then_some("auto"),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            model = %self.model,
            turns = turns.len(),
            tools = tools.len(),
            "llm.chat.request"
        );

        let auth = (!self.api_key.is_empty()).then_some(self.api_key.as_str());
        let resp: ChatCompletionResponse = self
            .client
            .post_json("chat/completions", auth, &req)
            .await
            .map_err(http_to_sibyl)?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SibylError::Llm("completion returned no choices".to_string()))?;

        tracing::debug!(
            model = resp.model.as_deref().unwrap_or(&self.model),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("-"),
            tool_calls = choice.message.tool_calls.len(),
            total_tokens = ?resp.usage.and_then(|u| u.total_tokens),
            "llm.chat.reply"
        );

        Ok(choice.message)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn http_to_sibyl(e: HttpError) -> SibylError {
    SibylError::Llm(format!("{e}"))
}
