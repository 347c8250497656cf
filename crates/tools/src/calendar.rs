//! Per-conversation event calendar stored in the shared object store.
//!
//! Each conversation (user, group or room) owns one calendar document.
//! Additions use the same conditional-write protocol as history, retried a
//! bounded number of times on conflict.

use chrono::{DateTime, FixedOffset, Utc};
use replybot_core::message::ConversationKey;
use replybot_history::object_store::{ObjectStore, ObjectStoreError, Precondition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const ADD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub starts_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Filter for [`EventCalendar::query`]. All bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    pub keyword: Option<String>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if self.from.is_some_and(|from| event.starts_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.starts_at > to) {
            return false;
        }
        match &self.keyword {
            Some(keyword) => {
                let keyword = keyword.to_lowercase();
                [Some(&event.title), event.location.as_ref(), event.note.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&keyword))
            }
            None => true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CalendarDocument {
    events: Vec<Event>,
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Calendar storage failed: {0}")]
    Storage(#[from] ObjectStoreError),

    #[error("Calendar for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Calendar for {key} kept changing; gave up after {attempts} attempts")]
    Contended { key: String, attempts: u32 },
}

pub struct EventCalendar {
    objects: Arc<dyn ObjectStore>,
    prefix: String,
}

impl EventCalendar {
    pub fn new(objects: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            objects,
            prefix: prefix.into(),
        }
    }

    fn object_name(&self, key: &ConversationKey) -> String {
        format!("{}{}.json", self.prefix, key)
    }

    async fn load(
        &self,
        key: &ConversationKey,
    ) -> Result<(CalendarDocument, Precondition), CalendarError> {
        match self.objects.get(&self.object_name(key)).await? {
            None => Ok((CalendarDocument::default(), Precondition::DoesNotExist)),
            Some(object) => {
                let doc = serde_json::from_slice(&object.bytes).map_err(|e| {
                    CalendarError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok((doc, Precondition::GenerationMatch(object.generation)))
            }
        }
    }

    /// Events matching `filter`, ordered by start time.
    pub async fn query(
        &self,
        key: &ConversationKey,
        filter: &EventFilter,
    ) -> Result<Vec<Event>, CalendarError> {
        let (doc, _) = self.load(key).await?;
        let mut events: Vec<Event> = doc.events.into_iter().filter(|e| filter.matches(e)).collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    /// Add an event, retrying when another writer got there first.
    pub async fn add(&self, key: &ConversationKey, event: Event) -> Result<Event, CalendarError> {
        let name = self.object_name(key);
        for attempt in 1..=ADD_ATTEMPTS {
            let (mut doc, precondition) = self.load(key).await?;
            doc.events.push(event.clone());
            let bytes = serde_json::to_vec(&doc).map_err(|e| CalendarError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            match self.objects.put(&name, bytes, precondition).await {
                Ok(generation) => {
                    debug!(conversation = %key, event_id = %event.id, generation, "Event stored");
                    return Ok(event);
                }
                Err(ObjectStoreError::PreconditionFailed { .. }) => {
                    debug!(
                        conversation = %key,
                        attempt,
                        "Calendar changed underneath us, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CalendarError::Contended {
            key: key.to_string(),
            attempts: ADD_ATTEMPTS,
        })
    }
}
