//! The agent reasoning loop implementation.

use replybot_config::{AgentSettings, PersistMode};
use replybot_core::context::RequestContext;
use replybot_core::error::{HistoryError, ProviderError};
use replybot_core::history::{HistoryStore, StoredRevision};
use replybot_core::message::{ConversationKey, Turn};
use replybot_core::provider::{CacheRef, ModelOutput, Provider, ToolDefinition};
use replybot_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::prompt_cache::PromptCache;

/// Tunables for one [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_rounds: u32,
    pub append_attempts: u32,
    pub deadline: Duration,
    pub history_window: usize,
    pub stateless_fallback: bool,
    pub persist: PersistMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_rounds: settings.max_rounds.max(1),
            append_attempts: settings.append_attempts.max(1),
            deadline: Duration::from_secs(settings.deadline_secs),
            history_window: settings.history_window,
            stateless_fallback: settings.stateless_fallback,
            persist: settings.persist,
        }
    }
}

/// What happened to the cycle's turns after it finished.
#[derive(Debug)]
pub enum Persistence {
    Committed(StoredRevision),
    /// History was unreachable and the agent ran statelessly
    Skipped,
    /// The cycle completed but its turns could not be stored
    Gap(AgentError),
}

/// Result of a completed invocation.
#[derive(Debug)]
pub struct Outcome {
    /// Model calls made
    pub rounds: u32,
    /// Plain final answer, or the final tool's transcript
    pub final_text: Option<String>,
    /// A final tool consumed the reply handle
    pub reply_delivered: bool,
    pub appended_turns: Vec<Turn>,
    pub persistence: Persistence,
}

struct Cycle {
    rounds: u32,
    final_text: Option<String>,
    ended_by_tool: bool,
    turns: Vec<Turn>,
}

/// Runs one tool-calling cycle per inbound message.
///
/// Shared across concurrent invocations; holds no per-invocation state.
pub struct Agent {
    provider: Arc<dyn Provider>,
    history: Arc<dyn HistoryStore>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    cache: Option<Arc<PromptCache>>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        history: Arc<dyn HistoryStore>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            history,
            tools,
            system_prompt: system_prompt.into(),
            cache: None,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a cached system prompt instead of sending it inline.
    pub fn with_cache(mut self, cache: Option<Arc<PromptCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Handle one inbound message end to end.
    ///
    /// The whole invocation, persistence included, runs under
    /// `config.deadline`. Errors are returned, not logged; the caller owns
    /// error reporting.
    pub async fn respond(&self, ctx: &RequestContext, text: &str) -> Result<Outcome, AgentError> {
        let deadline = Instant::now() + self.config.deadline;
        let timed_out = || AgentError::Timeout {
            after: self.config.deadline,
        };
        let key = &ctx.conversation_key;
        info!(conversation = %key, sender = %ctx.sender_id, "Handling message");

        let (prior, revision) = timeout_at(deadline, self.load(key))
            .await
            .map_err(|_| timed_out())??;

        let cycle = timeout_at(deadline, self.run_cycle(ctx, prior, text))
            .await
            .map_err(|_| timed_out())??;

        let appended_turns = self.turns_to_persist(&cycle);
        let persistence = match revision {
            None => Persistence::Skipped,
            Some(expected) => {
                let persisted = timeout_at(deadline, self.persist(key, expected, &appended_turns));
                match persisted.await {
                    Ok(Ok(revision)) => Persistence::Committed(revision),
                    Ok(Err(e)) => Persistence::Gap(e),
                    Err(_) => Persistence::Gap(timed_out()),
                }
            }
        };

        let outcome = Outcome {
            rounds: cycle.rounds,
            reply_delivered: cycle.ended_by_tool && ctx.reply_handle.is_used(),
            final_text: cycle.final_text,
            appended_turns,
            persistence,
        };
        info!(
            conversation = %key,
            rounds = outcome.rounds,
            reply_delivered = outcome.reply_delivered,
            "Message handled"
        );
        Ok(outcome)
    }

    /// Load history. `None` for the revision means "run statelessly".
    async fn load(
        &self,
        key: &ConversationKey,
    ) -> Result<(Vec<Turn>, Option<StoredRevision>), AgentError> {
        match self.history.get(key).await {
            Ok((history, revision)) => {
                Ok((history.window(self.config.history_window).to_vec(), Some(revision)))
            }
            Err(e @ (HistoryError::Unavailable(_) | HistoryError::Timeout(_)))
                if self.config.stateless_fallback =>
            {
                warn!(
                    conversation = %key,
                    error = %e,
                    "History unavailable, continuing without it"
                );
                Ok((Vec::new(), None))
            }
            Err(e) => Err(AgentError::History(e)),
        }
    }

    async fn call_model(
        &self,
        working: &[Turn],
        definitions: &[ToolDefinition],
    ) -> Result<ModelOutput, AgentError> {
        let cached = match &self.cache {
            Some(cache) => cache.cache_ref().await.map(|live| (cache, live)),
            None => None,
        };
        let Some((cache, live)) = cached else {
            return Ok(self.call_inline(working, definitions).await?);
        };

        match self.call_cached(&live, working, definitions).await {
            Err(ProviderError::CacheNotFound(name)) => {
                warn!(cache = %name, "Prompt cache expired, re-creating it");
                match cache.renew(&live).await? {
                    Some(fresh) => Ok(self.call_cached(&fresh, working, definitions).await?),
                    None => Ok(self.call_inline(working, definitions).await?),
                }
            }
            output => Ok(output?),
        }
    }

    async fn call_cached(
        &self,
        cache: &CacheRef,
        working: &[Turn],
        definitions: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        self.provider
            .generate_text_cached(cache, working, definitions)
            .await
    }

    async fn call_inline(
        &self,
        working: &[Turn],
        definitions: &[ToolDefinition],
    ) -> Result<ModelOutput, ProviderError> {
        self.provider
            .generate_text(&self.system_prompt, working, definitions)
            .await
    }

    async fn run_cycle(
        &self,
        ctx: &RequestContext,
        prior: Vec<Turn>,
        text: &str,
    ) -> Result<Cycle, AgentError> {
        let user_turn = Turn::user_from(ctx.sender_id.clone(), text);
        let mut working = prior;
        working.push(user_turn.clone());
        let mut turns = vec![user_turn];
        let definitions = self.tools.definitions();

        for round in 1..=self.config.max_rounds {
            debug!(
                conversation = %ctx.conversation_key,
                round,
                turns = working.len(),
                "Calling model"
            );

            let calls = match self.call_model(&working, &definitions).await? {
                ModelOutput::Text(answer) => {
                    turns.push(Turn::model_text(answer.clone()));
                    return Ok(Cycle {
                        rounds: round,
                        final_text: Some(answer),
                        ended_by_tool: false,
                        turns,
                    });
                }
                ModelOutput::ToolCalls(calls) => calls,
            };

            // Sequential on purpose: sibling calls may observe each other's side effects.
            let mut results = Vec::with_capacity(calls.len());
            let mut finished = false;
            let mut transcript = None;
            for call in &calls {
                let dispatched = self.tools.dispatch(ctx, call).await?;
                debug!(
                    tool = %call.name,
                    call_id = %call.id,
                    failed = dispatched.result.is_error(),
                    is_final = dispatched.is_final,
                    "Tool dispatched"
                );
                if dispatched.is_final {
                    finished = true;
                    transcript = transcript.or(dispatched.transcript);
                }
                results.push(dispatched.result);
            }

            let call_turn = Turn::ModelToolCalls { calls };
            let result_turn = Turn::ToolResults { results };
            working.push(call_turn.clone());
            working.push(result_turn.clone());
            turns.push(call_turn);
            turns.push(result_turn);

            if finished {
                return Ok(Cycle {
                    rounds: round,
                    final_text: transcript,
                    ended_by_tool: true,
                    turns,
                });
            }
        }

        Err(AgentError::BudgetExhausted {
            rounds: self.config.max_rounds,
        })
    }

    fn turns_to_persist(&self, cycle: &Cycle) -> Vec<Turn> {
        match self.config.persist {
            PersistMode::Full => cycle.turns.clone(),
            PersistMode::Transcript => {
                let mut turns: Vec<Turn> = cycle.turns.iter().take(1).cloned().collect();
                if let Some(text) = &cycle.final_text {
                    turns.push(Turn::model_text(text.clone()));
                }
                turns
            }
        }
    }

    /// Append with bounded retry; every retry starts from a fresh read.
    async fn persist(
        &self,
        key: &ConversationKey,
        mut expected: StoredRevision,
        turns: &[Turn],
    ) -> Result<StoredRevision, AgentError> {
        let attempts = self.config.append_attempts;
        for attempt in 1..=attempts {
            match self.history.append(key, expected, turns).await {
                Ok(revision) => return Ok(revision),
                Err(e) if e.is_conflict() => {
                    debug!(conversation = %key, attempt, "History append conflicted");
                    if attempt < attempts {
                        let (_, fresh) = self.history.get(key).await?;
                        expected = fresh;
                    }
                }
                Err(e) => return Err(AgentError::History(e)),
            }
        }
        Err(AgentError::ConflictRetriesExhausted { attempts })
    }
}
