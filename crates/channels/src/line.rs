//! LINE Messaging API adapter.
//!
//! Inbound: the webhook body is a batch of events. Only text-message events
//! become [`InboundMessage`]s; follows, stickers, postbacks and the rest are
//! ignored. Outbound: replies go through the reply endpoint with the event's
//! single-use reply token.

use async_trait::async_trait;
use replybot_config::ChannelConfig;
use replybot_core::channel::{InboundMessage, Messenger, OutboundMessage};
use replybot_core::error::ChannelError;
use replybot_core::message::ConversationKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_API_URL: &str = "https://api.line.me";

/// The platform accepts at most this many messages per reply.
pub const MAX_MESSAGES_PER_REPLY: usize = 5;

/// One webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBatch {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

impl WebhookBatch {
    pub fn parse(body: &[u8]) -> Result<Self, ChannelError> {
        serde_json::from_slice(body).map_err(|e| ChannelError::InvalidPayload(e.to_string()))
    }

    /// The text messages in this batch, in delivery order.
    pub fn text_messages(&self) -> Vec<InboundMessage> {
        self.events.iter().filter_map(WebhookEvent::to_inbound).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub reply_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    User {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    Room {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Source {
    /// History partition for this source.
    pub fn conversation_key(&self) -> Option<ConversationKey> {
        match self {
            Self::User { user_id } => Some(ConversationKey::user(user_id)),
            Self::Group { group_id, .. } => Some(ConversationKey::group(group_id)),
            Self::Room { room_id, .. } => Some(ConversationKey::room(room_id)),
            Self::Unknown => None,
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Self::User { user_id } => Some(user_id),
            Self::Group { user_id, .. } | Self::Room { user_id, .. } => user_id.as_deref(),
            Self::Unknown => None,
        }
    }
}

impl WebhookEvent {
    pub fn to_inbound(&self) -> Option<InboundMessage> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message.as_ref().filter(|m| m.kind == "text")?;
        let source = self.source.as_ref()?;
        Some(InboundMessage {
            conversation_key: source.conversation_key()?,
            sender_id: source.sender_id().unwrap_or("unknown").to_string(),
            text: message.text.clone()?,
            reply_token: self.reply_token.clone()?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: &'a [OutboundMessage],
}

/// Sends replies through the LINE reply endpoint.
pub struct LineMessenger {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl LineMessenger {
    pub fn new(
        access_token: impl Into<String>,
        api_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        let base = api_url.unwrap_or(DEFAULT_API_URL).trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{base}/v2/bot/message/reply"),
            access_token: access_token.into(),
        })
    }

    /// Build from the `[channel]` section; requires an access token.
    pub fn from_config(config: &ChannelConfig, timeout: Duration) -> Result<Self, ChannelError> {
        let token = config
            .channel_access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured("channel_access_token is not set".into()))?;
        let messenger = Self::new(token, config.api_url.as_deref(), timeout)?;
        info!(endpoint = %messenger.endpoint, "LINE messenger ready");
        Ok(messenger)
    }

    fn delivery_failed(reason: impl Into<String>) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "line".into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Messenger for LineMessenger {
    fn name(&self) -> &str {
        "line"
    }

    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), ChannelError> {
        if messages.is_empty() || messages.len() > MAX_MESSAGES_PER_REPLY {
            return Err(ChannelError::InvalidPayload(format!(
                "a reply carries 1 to {MAX_MESSAGES_PER_REPLY} messages, got {}",
                messages.len()
            )));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&ReplyRequest {
                reply_token,
                messages,
            })
            .send()
            .await
            .map_err(|e| Self::delivery_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::delivery_failed(format!("HTTP {}: {body}", status.as_u16())));
        }
        debug!(messages = messages.len(), "Reply delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};

    const SAMPLE: &str = r#"{
        "destination": "Ubot",
        "events": [
            {
                "type": "message",
                "message": {"type": "text", "id": "1", "text": "weather in Tokyo tomorrow"},
                "timestamp": 1700000000000,
                "source": {"type": "user", "userId": "U1"},
                "replyToken": "tok-1",
                "mode": "active"
            },
            {
                "type": "message",
                "message": {"type": "sticker", "id": "2", "packageId": "1", "stickerId": "1"},
                "source": {"type": "group", "groupId": "G1", "userId": "U2"},
                "replyToken": "tok-2"
            },
            {
                "type": "follow",
                "source": {"type": "user", "userId": "U3"},
                "replyToken": "tok-3"
            },
            {
                "type": "message",
                "message": {"type": "text", "id": "4", "text": "dinner plans?"},
                "source": {"type": "room", "roomId": "R1"},
                "replyToken": "tok-4"
            }
        ]
    }"#;

    #[test]
    fn only_text_messages_are_extracted() {
        let batch = WebhookBatch::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(batch.events.len(), 4);

        let messages = batch.text_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].conversation_key, ConversationKey::user("U1"));
        assert_eq!(messages[0].sender_id, "U1");
        assert_eq!(messages[0].reply_token, "tok-1");
        assert_eq!(messages[1].conversation_key, ConversationKey::room("R1"));
        assert_eq!(messages[1].sender_id, "unknown");
    }

    #[test]
    fn group_source_uses_group_key() {
        let source: Source =
            serde_json::from_str(r#"{"type":"group","groupId":"G1","userId":"U2"}"#).unwrap();
        assert_eq!(source.conversation_key(), Some(ConversationKey::group("G1")));
        assert_eq!(source.sender_id(), Some("U2"));
    }

    #[test]
    fn unknown_source_is_skipped() {
        let batch = WebhookBatch::parse(
            br#"{"events":[{"type":"message","message":{"type":"text","text":"hi"},
                "source":{"type":"channel"},"replyToken":"t"}]}"#,
        )
        .unwrap();
        assert!(batch.text_messages().is_empty());
    }

    #[test]
    fn empty_body_is_invalid() {
        assert!(matches!(
            WebhookBatch::parse(b"not json"),
            Err(ChannelError::InvalidPayload(_))
        ));
        // Verification pings carry no events.
        assert!(WebhookBatch::parse(br#"{"events":[]}"#).unwrap().text_messages().is_empty());
    }

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn fake_platform(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let sink = captured.clone();
        let app = Router::new().route(
            "/v2/bot/message/reply",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    sink.lock().unwrap().push((auth, body));
                    (status, "{}")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), captured)
    }

    #[tokio::test]
    async fn reply_posts_token_and_messages() {
        let (url, captured) = fake_platform(StatusCode::OK).await;
        let messenger = LineMessenger::new("access", Some(&url), Duration::from_secs(5)).unwrap();
        messenger
            .reply("tok-1", &[OutboundMessage::text("Sunny, 22°C")])
            .await
            .unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.as_deref(), Some("Bearer access"));
        assert_eq!(
            captured[0].1,
            serde_json::json!({
                "replyToken": "tok-1",
                "messages": [{"type": "text", "text": "Sunny, 22°C"}]
            })
        );
    }

    #[tokio::test]
    async fn platform_rejection_is_delivery_failure() {
        let (url, _) = fake_platform(StatusCode::BAD_REQUEST).await;
        let messenger = LineMessenger::new("access", Some(&url), Duration::from_secs(5)).unwrap();
        let err = messenger
            .reply("expired", &[OutboundMessage::text("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::DeliveryFailed { .. }));
        assert!(err.to_string().contains("HTTP 400"));
    }

    #[tokio::test]
    async fn too_many_messages_rejected_locally() {
        let messenger =
            LineMessenger::new("access", Some("http://127.0.0.1:9"), Duration::from_secs(1))
                .unwrap();
        let messages = vec![OutboundMessage::text("x"); 6];
        assert!(matches!(
            messenger.reply("t", &messages).await,
            Err(ChannelError::InvalidPayload(_))
        ));
    }

    #[test]
    fn from_config_requires_token() {
        let config = ChannelConfig::default();
        assert!(matches!(
            LineMessenger::from_config(&config, Duration::from_secs(1)),
            Err(ChannelError::NotConfigured(_))
        ));
    }
}
