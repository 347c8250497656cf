//! Event query tool: list the conversation's calendar.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use replybot_core::context::RequestContext;
use replybot_core::error::ToolError;
use replybot_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::calendar::{CalendarError, Event, EventCalendar, EventFilter};

const TOOL_NAME: &str = "query_events";
const MAX_EVENTS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct QueryArgs {
    pub from: Option<String>,
    pub to: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub events: Vec<Event>,
}

pub struct QueryEventsTool {
    calendar: Arc<EventCalendar>,
}

impl QueryEventsTool {
    pub fn new(calendar: Arc<EventCalendar>) -> Self {
        Self { calendar }
    }
}

pub(crate) fn parse_instant(field: &str, raw: &str) -> Result<DateTime<FixedOffset>, ToolError> {
    DateTime::parse_from_rfc3339(raw).map_err(|_| {
        ToolError::InvalidArguments(format!(
            "{field} must be an RFC 3339 timestamp such as 2026-10-20T19:00:00+09:00"
        ))
    })
}

pub(crate) fn storage_failure(tool_name: &str, e: CalendarError) -> ToolError {
    ToolError::Upstream {
        tool_name: tool_name.into(),
        service: "calendar".into(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl Tool for QueryEventsTool {
    type Args = QueryArgs;
    type Output = QueryOutput;

    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "List events in this conversation's calendar, optionally limited to a time range or to events mentioning a keyword."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "from": { "type": "string", "description": "Earliest start time, RFC 3339" },
                "to": { "type": "string", "description": "Latest start time, RFC 3339" },
                "keyword": { "type": "string", "description": "Text to look for in title, location or note" }
            },
            "additionalProperties": false
        })
    }

    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "events": {
                    "type": "array",
                    "maxItems": MAX_EVENTS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "starts_at": { "type": "string" }
                        },
                        "required": ["id", "title", "starts_at"]
                    }
                }
            },
            "required": ["events"]
        })
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        args: QueryArgs,
    ) -> Result<QueryOutput, ToolError> {
        let filter = EventFilter {
            from: args.from.as_deref().map(|raw| parse_instant("from", raw)).transpose()?,
            to: args.to.as_deref().map(|raw| parse_instant("to", raw)).transpose()?,
            keyword: args.keyword.filter(|k| !k.trim().is_empty()),
        };
        let mut events = self
            .calendar
            .query(&ctx.conversation_key, &filter)
            .await
            .map_err(|e| storage_failure(TOOL_NAME, e))?;
        events.truncate(MAX_EVENTS);
        Ok(QueryOutput { events })
    }
}
