//! Webhook HTTP gateway for replybot.
//!
//! `POST /webhook` verifies the platform signature, answers at once, and
//! runs one agent invocation per text message on its own task.
//! `GET /health` is a liveness probe.
//!
//! Invocation tasks are tracked so shutdown can wait for them with
//! [`GatewayState::drain`] before the provider is torn down.

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use replybot_agent::{Agent, Persistence};
use replybot_channels::WebhookBatch;
use replybot_channels::signature::{SIGNATURE_HEADER, verify_signature};
use replybot_core::channel::{InboundMessage, Messenger, OutboundMessage};
use replybot_core::context::{ReplyHandle, RequestContext};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Shared state for every request.
pub struct GatewayState {
    pub agent: Arc<Agent>,
    pub messenger: Arc<dyn Messenger>,
    pub channel_secret: String,
    /// Send plain-text answers when the model never used the reply tool
    pub relay_final_text: bool,
    invocations: Mutex<JoinSet<()>>,
}

type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        agent: Arc<Agent>,
        messenger: Arc<dyn Messenger>,
        channel_secret: impl Into<String>,
        relay_final_text: bool,
    ) -> Self {
        Self {
            agent,
            messenger,
            channel_secret: channel_secret.into(),
            relay_final_text,
            invocations: Mutex::new(JoinSet::new()),
        }
    }

    /// Start one tracked invocation, reaping any that already finished.
    pub async fn spawn_invocation(self: &Arc<Self>, message: InboundMessage) {
        let mut invocations = self.invocations.lock().await;
        while let Some(finished) = invocations.try_join_next() {
            report_join(finished);
        }
        invocations.spawn(handle_message(self.clone(), message));
    }

    pub async fn in_flight(&self) -> usize {
        self.invocations.lock().await.len()
    }

    /// Wait up to `limit` for in-flight invocations, then abort the rest.
    ///
    /// Returns how many were aborted. Invocations spawned after this call
    /// are not waited for.
    pub async fn drain(&self, limit: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.invocations.lock().await);
        if pending.is_empty() {
            return 0;
        }
        info!(in_flight = pending.len(), "Waiting for in-flight invocations");
        let joined = tokio::time::timeout(limit, async {
            while let Some(finished) = pending.join_next().await {
                report_join(finished);
            }
        })
        .await;
        if joined.is_ok() {
            return 0;
        }
        let aborted = pending.len();
        warn!(
            aborted,
            waited_secs = limit.as_secs(),
            "Aborting invocations still running at shutdown"
        );
        pending.shutdown().await;
        aborted
    }
}

fn report_join(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            error!(error = %e, "Agent invocation task panicked");
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: SharedState,
    body_limit: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, build_router(state, body_limit))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct WebhookResponse {
    accepted: usize,
}

async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !verify_signature(&state.channel_secret, &body, signature) {
        warn!("Rejected webhook with a bad signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let batch = WebhookBatch::parse(&body).map_err(|e| {
        warn!(error = %e, "Rejected malformed webhook body");
        StatusCode::BAD_REQUEST
    })?;

    let messages = batch.text_messages();
    debug!(
        events = batch.events.len(),
        text_messages = messages.len(),
        "Webhook accepted"
    );
    let accepted = messages.len();
    for message in messages {
        state.spawn_invocation(message).await;
    }
    Ok(Json(WebhookResponse { accepted }))
}

/// Run one invocation and report its result. Every failure ends here.
pub async fn handle_message(state: SharedState, message: InboundMessage) {
    let handle = ReplyHandle::new(message.reply_token);
    let ctx = RequestContext::new(message.conversation_key, message.sender_id, handle.clone());

    let outcome = match state.agent.respond(&ctx, &message.text).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                conversation = %ctx.conversation_key,
                sender = %ctx.sender_id,
                kind = e.kind(),
                error = %e,
                "Agent invocation failed"
            );
            return;
        }
    };

    if let Persistence::Gap(e) = &outcome.persistence {
        error!(
            conversation = %ctx.conversation_key,
            kind = e.kind(),
            error = %e,
            turns = outcome.appended_turns.len(),
            "Conversation turns were not stored; history has a gap"
        );
    }

    if outcome.reply_delivered || !state.relay_final_text {
        return;
    }
    let Some(text) = outcome.final_text.as_deref().filter(|t| !t.trim().is_empty()) else {
        return;
    };
    if let Some(token) = handle.take() {
        if let Err(e) = state
            .messenger
            .reply(token, &[OutboundMessage::text(text)])
            .await
        {
            error!(conversation = %ctx.conversation_key, error = %e, "Failed to relay final text");
        }
    }
}
