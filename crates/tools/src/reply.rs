//! Reply tool: deliver the answer to the user on the originating channel.
//!
//! A successful reply ends the agent loop. Each inbound message can be
//! answered once; the reply handle in the request context enforces that.

use async_trait::async_trait;
use replybot_core::channel::{Messenger, OutboundMessage};
use replybot_core::context::RequestContext;
use replybot_core::error::ToolError;
use replybot_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const TOOL_NAME: &str = "reply";

/// Platform limit for one text message.
pub const MAX_REPLY_CHARS: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct ReplyArgs {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyOutput {
    pub delivered_text: String,
    pub characters: usize,
}

pub struct ReplyTool {
    messenger: Arc<dyn Messenger>,
}

impl ReplyTool {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }
}

#[async_trait]
impl Tool for ReplyTool {
    type Args = ReplyArgs;
    type Output = ReplyOutput;

    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Send a text message to the user in this chat."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "minLength": 1,
                    "maxLength": MAX_REPLY_CHARS,
                    "description": "The message to send"
                }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "delivered_text": { "type": "string" },
                "characters": { "type": "integer", "minimum": 1 }
            },
            "required": ["delivered_text", "characters"]
        })
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        args: ReplyArgs,
    ) -> Result<ReplyOutput, ToolError> {
        let token = ctx.reply_handle.take().ok_or(ToolError::ReplyAlreadySent)?;

        self.messenger
            .reply(token, &[OutboundMessage::text(args.text.clone())])
            .await
            .map_err(|e| ToolError::Upstream {
                tool_name: TOOL_NAME.into(),
                service: self.messenger.name().to_string(),
                detail: e.to_string(),
            })?;

        let characters = args.text.chars().count();
        info!(conversation = %ctx.conversation_key, characters, "Reply delivered");
        Ok(ReplyOutput {
            delivered_text: args.text,
            characters,
        })
    }

    fn is_final(&self, _output: &ReplyOutput) -> bool {
        true
    }

    fn transcript(&self, output: &ReplyOutput) -> Option<String> {
        Some(output.delivered_text.clone())
    }
}
