//! Event creation tool: add an event to the conversation's calendar.

use async_trait::async_trait;
use chrono::Utc;
use replybot_core::context::RequestContext;
use replybot_core::error::ToolError;
use replybot_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::calendar::{Event, EventCalendar};
use crate::event_query::{parse_instant, storage_failure};

const TOOL_NAME: &str = "create_event";

#[derive(Debug, Deserialize)]
pub struct CreateArgs {
    pub title: String,
    pub starts_at: String,
    pub location: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateOutput {
    pub event: Event,
}

pub struct CreateEventTool {
    calendar: Arc<EventCalendar>,
}

impl CreateEventTool {
    pub fn new(calendar: Arc<EventCalendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for CreateEventTool {
    type Args = CreateArgs;
    type Output = CreateOutput;

    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Add an event to this conversation's calendar and return the stored event."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "minLength": 1, "maxLength": 200 },
                "starts_at": { "type": "string", "description": "Start time, RFC 3339 with offset" },
                "location": { "type": "string" },
                "note": { "type": "string", "maxLength": 1000 }
            },
            "required": ["title", "starts_at"],
            "additionalProperties": false
        })
    }

    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "event": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "starts_at": { "type": "string" },
                        "created_by": { "type": "string" }
                    },
                    "required": ["id", "title", "starts_at", "created_by"]
                }
            },
            "required": ["event"]
        })
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        args: CreateArgs,
    ) -> Result<CreateOutput, ToolError> {
        let title = args.title.trim();
        if title.is_empty() {
            return Err(ToolError::InvalidArguments("title must not be blank".into()));
        }
        let event = Event {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            title: title.to_string(),
            starts_at: parse_instant("starts_at", &args.starts_at)?,
            location: args.location,
            note: args.note,
            created_by: ctx.sender_id.clone(),
            created_at: Utc::now(),
        };
        let event = self
            .calendar
            .add(&ctx.conversation_key, event)
            .await
            .map_err(|e| storage_failure(TOOL_NAME, e))?;
        info!(conversation = %ctx.conversation_key, event_id = %event.id, "Event created");
        Ok(CreateOutput { event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventFilter;
    use replybot_core::context::ReplyHandle;
    use replybot_core::message::ConversationKey;
    use replybot_history::InMemoryObjectStore;

    fn setup() -> (CreateEventTool, Arc<EventCalendar>, RequestContext) {
        let calendar = Arc::new(EventCalendar::new(Arc::new(InMemoryObjectStore::new()), ""));
        let ctx = RequestContext::new(ConversationKey::group("G1"), "U7", ReplyHandle::new("t"));
        (CreateEventTool::new(calendar.clone()), calendar, ctx)
    }

    #[tokio::test]
    async fn creates_and_stores_event() {
        let (tool, calendar, ctx) = setup();
        let out = tool
            .execute(
                &ctx,
                CreateArgs {
                    title: " Team dinner ".into(),
                    starts_at: "2026-10-20T19:00:00+09:00".into(),
                    location: Some("Shibuya".into()),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.event.title, "Team dinner");
        assert_eq!(out.event.created_by, "U7");

        let stored = calendar
            .query(&ConversationKey::group("G1"), &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(stored, vec![out.event]);
    }

    #[tokio::test]
    async fn rejects_blank_title() {
        let (tool, calendar, ctx) = setup();
        let err = tool
            .execute(
                &ctx,
                CreateArgs {
                    title: "   ".into(),
                    starts_at: "2026-10-20T19:00:00+09:00".into(),
                    location: None,
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(
            calendar
                .query(&ConversationKey::group("G1"), &EventFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn rejects_unparsable_start() {
        let (tool, calendar, ctx) = setup();
        let err = tool
            .execute(
                &ctx,
                CreateArgs {
                    title: "Dinner".into(),
                    starts_at: "tomorrow 7pm".into(),
                    location: None,
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(
            calendar
                .query(&ConversationKey::group("G1"), &EventFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
