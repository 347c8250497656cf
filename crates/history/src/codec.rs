//! Encoding of one conversation's stored object.

use chrono::{DateTime, Utc};
use replybot_core::message::{ConversationKey, Turn};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;

/// The JSON document stored per conversation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub version: u32,
    pub key: ConversationKey,
    pub turns: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryDocument {
    pub fn new(key: ConversationKey, turns: Vec<Turn>) -> Self {
        Self {
            version: FORMAT_VERSION,
            key,
            turns,
            updated_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode and check the document belongs to `key`.
    pub fn decode(key: &ConversationKey, bytes: &[u8]) -> Result<Self, String> {
        let doc: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if doc.version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", doc.version));
        }
        if &doc.key != key {
            return Err(format!("document belongs to {}", doc.key));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replybot_core::message::{ToolCall, ToolResult};

    #[test]
    fn every_turn_kind_survives_encoding() {
        let call = ToolCall {
            id: "c1".into(),
            name: "weather_forecast".into(),
            arguments: serde_json::json!({"location": "Tokyo", "days_ahead": 1}),
        };
        let turns = vec![
            Turn::user_from("U1", "weather in Tokyo tomorrow"),
            Turn::ModelToolCalls {
                calls: vec![call.clone()],
            },
            Turn::ToolResults {
                results: vec![
                    ToolResult::success(&call, serde_json::json!({"condition": "sunny"})),
                    ToolResult::error(&call, "weather_forecast failed"),
                ],
            },
            Turn::model_text("Sunny tomorrow."),
        ];
        let key = ConversationKey::user("U1");
        let doc = HistoryDocument::new(key.clone(), turns.clone());

        let decoded = HistoryDocument::decode(&key, &doc.encode().unwrap()).unwrap();
        assert_eq!(decoded.turns, turns);
    }

    #[test]
    fn wrong_key_rejected() {
        let doc = HistoryDocument::new(ConversationKey::user("U1"), vec![]);
        let err = HistoryDocument::decode(&ConversationKey::group("G1"), &doc.encode().unwrap())
            .unwrap_err();
        assert!(err.contains("user:U1"));
    }

    #[test]
    fn garbage_rejected() {
        assert!(HistoryDocument::decode(&ConversationKey::user("U1"), b"not json").is_err());
    }
}
