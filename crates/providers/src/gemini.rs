//! Google Gemini provider over the Generative Language REST API.
//!
//! Supports:
//! - `generateContent` with function declarations
//! - native prompt caching through `cachedContents` (system instruction and
//!   tools are stored in the cache; per-request payloads then carry only
//!   the conversation)

use async_trait::async_trait;
use replybot_core::error::ProviderError;
use replybot_core::message::{ToolCall, ToolOutcome, Turn};
use replybot_core::provider::{CacheRef, ModelOutput, Provider, ToolDefinition};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::common::{GenerationSettings, http_client, status_error, transport_error};

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Schema keywords the function-declaration dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "$id"];

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    settings: GenerationSettings,
    cache_ttl: Duration,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_url: Option<&str>,
        settings: GenerationSettings,
        cache_ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: api_url
                .unwrap_or(DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            settings,
            cache_ttl,
            client: http_client(timeout)?,
        })
    }

    fn model_path(&self) -> String {
        if self.settings.model.starts_with("models/") {
            self.settings.model.clone()
        } else {
            format!("models/{}", self.settings.model)
        }
    }

    fn to_contents(conversation: &[Turn]) -> Vec<Value> {
        conversation
            .iter()
            .map(|turn| match turn {
                Turn::User { text, .. } => json!({ "role": "user", "parts": [{ "text": text }] }),
                Turn::ModelText { text } => json!({ "role": "model", "parts": [{ "text": text }] }),
                Turn::ModelToolCalls { calls } => json!({
                    "role": "model",
                    "parts": calls
                        .iter()
                        .map(|c| {
                            json!({
                                "functionCall": { "id": c.id, "name": c.name, "args": c.arguments }
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
                Turn::ToolResults { results } => json!({
                    "role": "user",
                    "parts": results
                        .iter()
                        .map(|r| {
                            let response = match &r.outcome {
                                ToolOutcome::Success(Value::Object(map)) => {
                                    Value::Object(map.clone())
                                }
                                ToolOutcome::Success(other) => json!({ "result": other }),
                                ToolOutcome::Error(message) => json!({ "error": message }),
                            };
                            json!({
                                "functionResponse": {
                                    "id": r.call_id,
                                    "name": r.tool_name,
                                    "response": response
                                }
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
            })
            .collect()
    }

    fn to_tools(tools: &[ToolDefinition]) -> Value {
        json!([{
            "functionDeclarations": tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_schema(&t.parameters),
                }))
                .collect::<Vec<_>>(),
        }])
    }

    fn system_instruction(system_prompt: &str) -> Value {
        json!({ "parts": [{ "text": system_prompt }] })
    }

    fn parse_output(response: GenerateResponse) -> Result<ModelOutput, ProviderError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No candidates in response".into()))?;
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        if parts.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "Empty candidate (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let mut text = String::new();
        let mut calls = Vec::new();
        for part in parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(fc) = part.function_call {
                calls.push(ToolCall {
                    id: fc
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: fc.name,
                    arguments: fc.args.unwrap_or_else(|| json!({})),
                });
            }
        }
        Ok(ModelOutput::from_parts(text, calls))
    }

    async fn generate(
        &self,
        body: Value,
        cached: Option<&CacheRef>,
    ) -> Result<ModelOutput, ProviderError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model_path());
        debug!(
            model = %self.settings.model,
            cached = cached.is_some(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(match (status, cached) {
                (404, Some(cache)) => ProviderError::CacheNotFound(cache.0.clone()),
                (404, None) => ProviderError::ModelNotFound(self.settings.model.clone()),
                _ => status_error(status, error_body),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| {
                ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
            })?;
        Self::parse_output(parsed)
    }

    fn generation_config(&self) -> Value {
        json!({
            "temperature": self.settings.temperature,
            "maxOutputTokens": self.settings.max_output_tokens,
        })
    }
}

/// Strip keywords Gemini's schema dialect does not accept, recursively.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        let mut body = json!({
            "systemInstruction": Self::system_instruction(system_prompt),
            "contents": Self::to_contents(conversation),
            "generationConfig": self.generation_config(),
        });
        if !tools.is_empty() {
            body["tools"] = Self::to_tools(tools);
        }
        self.generate(body, None).await
    }

    async fn generate_text_cached(
        &self,
        cache: &CacheRef,
        conversation: &[Turn],
        _tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        let body = json!({
            "cachedContent": cache.0,
            "contents": Self::to_contents(conversation),
            "generationConfig": self.generation_config(),
        });
        self.generate(body, Some(cache)).await
    }

    async fn create_cache(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<CacheRef, ProviderError> {
        let mut body = json!({
            "model": self.model_path(),
            "systemInstruction": Self::system_instruction(system_prompt),
            "ttl": format!("{}s", self.cache_ttl.as_secs()),
        });
        if !tools.is_empty() {
            body["tools"] = Self::to_tools(tools);
        }

        let response = self
            .client
            .post(format!("{}/cachedContents", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(status, error_body));
        }

        let created: CachedContent = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse cache: {e}")))?;
        debug!(cache = %created.name, "Created cached content");
        Ok(CacheRef(created.name))
    }

    async fn delete_cache(&self, cache: &CacheRef) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.base_url, cache.0))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status().as_u16() {
            200 => Ok(()),
            404 => Err(ProviderError::CacheNotFound(cache.0.clone())),
            status => Err(status_error(status, response.text().await.unwrap_or_default())),
        }
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CachedContent {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use replybot_core::message::ToolResult;

    fn provider(url: &str) -> GeminiProvider {
        GeminiProvider::new(
            "test-key",
            Some(url),
            GenerationSettings::default(),
            Duration::from_secs(600),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn contents_mapping() {
        let call = ToolCall {
            id: "c1".into(),
            name: "weather_forecast".into(),
            arguments: json!({"location": "Tokyo"}),
        };
        let contents = GeminiProvider::to_contents(&[
            Turn::user("weather?"),
            Turn::ModelToolCalls {
                calls: vec![call.clone()],
            },
            Turn::ToolResults {
                results: vec![ToolResult::success(&call, json!({"condition": "sunny"}))],
            },
            Turn::model_text("Sunny."),
        ]);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "weather_forecast");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["condition"],
            "sunny"
        );
        assert_eq!(contents[3]["role"], "model");
    }

    #[test]
    fn error_results_are_wrapped() {
        let call = ToolCall {
            id: "c1".into(),
            name: "create_event".into(),
            arguments: json!({}),
        };
        let contents = GeminiProvider::to_contents(&[Turn::ToolResults {
            results: vec![ToolResult::error(&call, "create_event failed")],
        }]);
        assert_eq!(
            contents[0]["parts"][0]["functionResponse"]["response"]["error"],
            "create_event failed"
        );
    }

    #[test]
    fn schema_sanitizing() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "nested": { "type": "object", "additionalProperties": false }
            }
        });
        let clean = sanitize_schema(&schema);
        assert!(clean.get("additionalProperties").is_none());
        assert!(clean["properties"]["nested"].get("additionalProperties").is_none());
        assert_eq!(clean["type"], "object");
    }

    #[test]
    fn parse_function_calls_win() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[
            {"text":"Checking."},
            {"functionCall":{"name":"weather_forecast","args":{"location":"Tokyo","days_ahead":1}}}
        ]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(data).unwrap();
        let ModelOutput::ToolCalls(calls) = GeminiProvider::parse_output(parsed).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments["days_ahead"], 1);
    }

    #[test]
    fn parse_text() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(data).unwrap();
        assert_eq!(
            GeminiProvider::parse_output(parsed).unwrap(),
            ModelOutput::Text("Hello".into())
        );
    }

    #[test]
    fn blocked_candidate_is_malformed() {
        let data = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(data).unwrap();
        let err = GeminiProvider::parse_output(parsed).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn cached_generation_against_fake_endpoint() {
        use axum::extract::Path;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::{delete, post};
        use axum::{Json, Router};

        let app = Router::new()
            .route(
                "/cachedContents",
                post(|Json(body): Json<Value>| async move {
                    assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
                    Json(json!({ "name": "cachedContents/abc123" }))
                }),
            )
            .route(
                "/cachedContents/{id}",
                delete(|Path(id): Path<String>| async move {
                    if id == "abc123" {
                        StatusCode::OK.into_response()
                    } else {
                        StatusCode::NOT_FOUND.into_response()
                    }
                }),
            )
            .route(
                "/models/{action}",
                post(|Json(body): Json<Value>| async move {
                    if body["cachedContent"] == "cachedContents/gone" {
                        return StatusCode::NOT_FOUND.into_response();
                    }
                    Json(json!({"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}))
                        .into_response()
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider = provider(&format!("http://{addr}"));
        let cache = provider.create_cache("Be brief", &[]).await.unwrap();
        assert_eq!(cache.0, "cachedContents/abc123");

        let output = provider
            .generate_text_cached(&cache, &[Turn::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(output, ModelOutput::Text("ok".into()));

        let gone = CacheRef("cachedContents/gone".into());
        assert!(matches!(
            provider.generate_text_cached(&gone, &[Turn::user("hi")], &[]).await,
            Err(ProviderError::CacheNotFound(_))
        ));

        provider.delete_cache(&cache).await.unwrap();
        assert!(matches!(
            provider.delete_cache(&gone).await,
            Err(ProviderError::CacheNotFound(_))
        ));
    }
}
