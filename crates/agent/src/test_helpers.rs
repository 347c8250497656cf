//! Shared test helpers for agent tests.

use async_trait::async_trait;
use replybot_core::channel::{Messenger, OutboundMessage};
use replybot_core::error::{ChannelError, HistoryError, ProviderError, ToolError};
use replybot_core::history::{HistoryStore, StoredRevision};
use replybot_core::message::{ConversationHistory, ConversationKey, ToolCall, Turn};
use replybot_core::provider::{CacheRef, ModelOutput, Provider, ToolDefinition};
use replybot_core::tool::Tool;
use replybot_core::{ReplyHandle, RequestContext};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the provider was asked on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub cache: Option<CacheRef>,
    pub system_prompt: Option<String>,
    pub conversation: Vec<Turn>,
}

/// A mock provider that returns a sequence of scripted outputs.
///
/// Panics if more calls are made than outputs provided.
pub struct ScriptedProvider {
    outputs: Mutex<VecDeque<Result<ModelOutput, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    expired: Mutex<HashSet<CacheRef>>,
    pub created_caches: AtomicUsize,
    pub deleted_caches: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(outputs: Vec<Result<ModelOutput, ProviderError>>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
            delay: None,
            expired: Mutex::new(HashSet::new()),
            created_caches: AtomicUsize::new(0),
            deleted_caches: AtomicUsize::new(0),
        }
    }

    pub fn outputs(outputs: Vec<ModelOutput>) -> Self {
        Self::new(outputs.into_iter().map(Ok).collect())
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make cached calls against `cache` fail as if its TTL ran out.
    pub fn expire(&self, cache: &CacheRef) {
        self.expired.lock().unwrap().insert(cache.clone());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn next(&self, recorded: RecordedCall) -> Result<ModelOutput, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(recorded);
        let next = self.outputs.lock().unwrap().pop_front();
        next.unwrap_or_else(|| panic!("ScriptedProvider: no more outputs"))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        conversation: &[Turn],
        _tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        self.next(RecordedCall {
            cache: None,
            system_prompt: Some(system_prompt.to_string()),
            conversation: conversation.to_vec(),
        })
        .await
    }

    async fn generate_text_cached(
        &self,
        cache: &CacheRef,
        conversation: &[Turn],
        _tools: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        if self.expired.lock().unwrap().contains(cache) {
            return Err(ProviderError::CacheNotFound(cache.0.clone()));
        }
        self.next(RecordedCall {
            cache: Some(cache.clone()),
            system_prompt: None,
            conversation: conversation.to_vec(),
        })
        .await
    }

    async fn create_cache(
        &self,
        _system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<CacheRef, ProviderError> {
        let n = self.created_caches.fetch_add(1, Ordering::SeqCst);
        Ok(CacheRef(format!("cache-{n}")))
    }

    async fn delete_cache(&self, _cache: &CacheRef) -> Result<(), ProviderError> {
        self.deleted_caches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A messenger that records every reply.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, Vec<OutboundMessage>)>>,
}

impl RecordingMessenger {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, messages)| messages.iter().map(|m| m.as_text().to_string()))
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn reply(&self, token: &str, messages: &[OutboundMessage]) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), messages.to_vec()));
        Ok(())
    }
}

/// Wraps a store; lets another writer commit before each of our first N appends.
pub struct ContendedHistory<S> {
    pub inner: S,
    pub interference: AtomicUsize,
}

#[async_trait]
impl<S: HistoryStore> HistoryStore for ContendedHistory<S> {
    fn name(&self) -> &str {
        "contended"
    }

    async fn get(
        &self,
        key: &ConversationKey,
    ) -> Result<(ConversationHistory, StoredRevision), HistoryError> {
        self.inner.get(key).await
    }

    async fn append(
        &self,
        key: &ConversationKey,
        expected: StoredRevision,
        turns: &[Turn],
    ) -> Result<StoredRevision, HistoryError> {
        let remaining = self.interference.load(Ordering::SeqCst);
        if remaining > 0 {
            self.interference.store(remaining - 1, Ordering::SeqCst);
            let (_, current) = self.inner.get(key).await?;
            self.inner
                .append(key, current, &[Turn::user_from("other", "meanwhile")])
                .await?;
        }
        self.inner.append(key, expected, turns).await
    }
}

/// Wraps a store; every append sleeps first.
pub struct SlowAppendHistory<S> {
    pub inner: S,
    pub delay: Duration,
}

#[async_trait]
impl<S: HistoryStore> HistoryStore for SlowAppendHistory<S> {
    fn name(&self) -> &str {
        "slow-append"
    }

    async fn get(
        &self,
        key: &ConversationKey,
    ) -> Result<(ConversationHistory, StoredRevision), HistoryError> {
        self.inner.get(key).await
    }

    async fn append(
        &self,
        key: &ConversationKey,
        expected: StoredRevision,
        turns: &[Turn],
    ) -> Result<StoredRevision, HistoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(key, expected, turns).await
    }
}

/// A store whose every operation fails with the given error.
pub struct BrokenHistory(pub HistoryError);

#[async_trait]
impl HistoryStore for BrokenHistory {
    fn name(&self) -> &str {
        "broken"
    }

    async fn get(
        &self,
        _key: &ConversationKey,
    ) -> Result<(ConversationHistory, StoredRevision), HistoryError> {
        Err(self.0.clone())
    }

    async fn append(
        &self,
        _key: &ConversationKey,
        _expected: StoredRevision,
        _turns: &[Turn],
    ) -> Result<StoredRevision, HistoryError> {
        Err(self.0.clone())
    }
}

#[derive(Deserialize)]
pub struct TextArgs {
    pub text: String,
}

#[derive(Serialize)]
pub struct TextOutput {
    pub text: String,
}

/// A tool that sends `text` through a messenger and ends the loop.
pub struct SendTool {
    pub messenger: Arc<RecordingMessenger>,
}

#[async_trait]
impl Tool for SendTool {
    type Args = TextArgs;
    type Output = TextOutput;

    fn name(&self) -> &str {
        "reply"
    }
    fn description(&self) -> &str {
        "Send a message"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, ctx: &RequestContext, args: TextArgs) -> Result<TextOutput, ToolError> {
        let token = ctx.reply_handle.take().ok_or(ToolError::ReplyAlreadySent)?;
        self.messenger
            .reply(token, &[OutboundMessage::text(args.text.clone())])
            .await
            .map_err(|e| ToolError::Upstream {
                tool_name: "reply".into(),
                service: "messaging".into(),
                detail: e.to_string(),
            })?;
        Ok(TextOutput { text: args.text })
    }
    fn is_final(&self, _output: &TextOutput) -> bool {
        true
    }
    fn transcript(&self, output: &TextOutput) -> Option<String> {
        Some(output.text.clone())
    }
}

/// A tool that looks something up and never ends the loop.
pub struct LookupTool {
    pub runs: AtomicUsize,
}

#[async_trait]
impl Tool for LookupTool {
    type Args = serde_json::Value;
    type Output = serde_json::Value;

    fn name(&self) -> &str {
        "lookup"
    }
    fn description(&self) -> &str {
        "Look something up"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "required": ["answer"] })
    }
    async fn execute(
        &self,
        _ctx: &RequestContext,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if args.get("break_contract").is_some() {
            return Ok(serde_json::json!({ "wrong": true }));
        }
        Ok(serde_json::json!({ "answer": 42 }))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

pub fn ctx(key: &str) -> RequestContext {
    RequestContext::new(ConversationKey::from(key), "U1", ReplyHandle::new("reply-token"))
}
