//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions` with function calling.
//!
//! These endpoints have no server-side prompt cache, so caching is emulated:
//! `create_cache` stores the prompt locally under a fresh handle and
//! `generate_text_cached` sends it inline.

use async_trait::async_trait;
use replybot_core::error::ProviderError;
use replybot_core::message::{ToolCall, ToolOutcome, Turn};
use replybot_core::provider::{CacheRef, ModelOutput, Provider, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::common::{GenerationSettings, http_client, status_error, transport_error};

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    settings: GenerationSettings,
    client: reqwest::Client,
    prompts: RwLock<HashMap<String, String>>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
            client: http_client(timeout)?,
            prompts: RwLock::new(HashMap::new()),
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(
        api_key: impl Into<String>,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, settings, timeout)
    }

    /// Convert the system prompt and turns to OpenAI API format.
    fn to_api_messages(system_prompt: &str, conversation: &[Turn]) -> Vec<ApiMessage> {
        let mut messages = vec![ApiMessage::plain("system", system_prompt)];
        for turn in conversation {
            match turn {
                Turn::User { text, .. } => messages.push(ApiMessage::plain("user", text)),
                Turn::ModelText { text } => messages.push(ApiMessage::plain("assistant", text)),
                Turn::ModelToolCalls { calls } => messages.push(ApiMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(
                        calls
                            .iter()
                            .map(|c| ApiToolCall {
                                id: c.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: c.name.clone(),
                                    arguments: c.arguments.to_string(),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                }),
                Turn::ToolResults { results } => {
                    for result in results {
                        let content = match &result.outcome {
                            ToolOutcome::Success(payload) => payload.to_string(),
                            ToolOutcome::Error(message) => {
                                serde_json::json!({ "error": message }).to_string()
                            }
                        };
                        messages.push(ApiMessage {
                            role: "tool".into(),
                            content: Some(content),
                            tool_calls: None,
                            tool_call_id: Some(result.call_id.clone()),
                        });
                    }
                }
            }
        }
        messages
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Interpret the first choice of a completion response.
    fn parse_output(response: ApiResponse) -> Result<ModelOutput, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                // Unparsable arguments are passed through as a string so the
                // dispatcher reports them back to the model.
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments)),
            })
            .collect();

        Ok(ModelOutput::from_parts(
            choice.message.content.unwrap_or_default(),
            calls,
        ))
    }

    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": Self::to_api_messages(system_prompt, conversation),
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_output_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(tools));
        }

        debug!(
            provider = %self.name,
            model = %self.settings.model,
            turns = conversation.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ProviderError::ModelNotFound(self.settings.model.clone()));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(status_error(status, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| {
                ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
            })?;
        Self::parse_output(api_response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        self.complete(system_prompt, conversation, tools).await
    }

    async fn generate_text_cached(
        &self,
        cache: &CacheRef,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        let prompt = self
            .prompts
            .read()
            .await
            .get(&cache.0)
            .cloned()
            .ok_or_else(|| ProviderError::CacheNotFound(cache.0.clone()))?;
        self.complete(&prompt, conversation, tools).await
    }

    async fn create_cache(
        &self,
        system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<CacheRef, ProviderError> {
        let id = format!("local-{}", uuid::Uuid::new_v4());
        self.prompts
            .write()
            .await
            .insert(id.clone(), system_prompt.to_string());
        Ok(CacheRef(id))
    }

    async fn delete_cache(&self, cache: &CacheRef) -> Result<(), ProviderError> {
        match self.prompts.write().await.remove(&cache.0) {
            Some(_) => Ok(()),
            None => Err(ProviderError::CacheNotFound(cache.0.clone())),
        }
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.prompts.write().await.clear();
        Ok(())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
