//! Console messenger for local chat sessions.

use async_trait::async_trait;
use replybot_core::channel::{Messenger, OutboundMessage};
use replybot_core::error::ChannelError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes every reply to a terminal-like sink, one message per line.
pub struct ConsoleMessenger<W = tokio::io::Stdout> {
    out: Mutex<W>,
    prefix: String,
}

impl ConsoleMessenger {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout(), "bot> ")
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsoleMessenger<W> {
    pub fn new(out: W, prefix: impl Into<String>) -> Self {
        Self {
            out: Mutex::new(out),
            prefix: prefix.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Messenger for ConsoleMessenger<W> {
    fn name(&self) -> &str {
        "console"
    }

    async fn reply(
        &self,
        _reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), ChannelError> {
        let mut out = self.out.lock().await;
        for message in messages {
            let line = format!("{}{}\n", self.prefix, message.as_text());
            out.write_all(line.as_bytes())
                .await
                .map_err(|e| ChannelError::DeliveryFailed {
                    channel: "console".into(),
                    reason: e.to_string(),
                })?;
        }
        out.flush().await.map_err(|e| ChannelError::DeliveryFailed {
            channel: "console".into(),
            reason: e.to_string(),
        })
    }
}
