//! Item notifications over a narrow publish/consume interface.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::AppError;
use crate::frontier::{CompletionOutcome, FrontierEntry};

pub const TOPIC_COMPLETED: &str = "ingest.completed";
pub const TOPIC_FAILED: &str = "ingest.failed";
pub const TOPIC_DEAD_LETTER: &str = "ingest.dead_letter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl EventMessage {
    pub fn new(payload: serde_json::Value, published_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            published_at,
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload published for every finished frontier entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub job_id: Uuid,
    pub entry_id: Uuid,
    pub url: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub document_id: Option<Uuid>,
}

impl ItemEvent {
    pub fn new(entry: &FrontierEntry, outcome: &CompletionOutcome, document_id: Option<Uuid>) -> Self {
        Self {
            job_id: entry.job_id,
            entry_id: entry.id,
            url: entry.url.clone(),
            outcome: outcome.label().to_string(),
            detail: outcome.message().map(str::to_string),
            document_id,
        }
    }

    /// Topic an outcome is announced on. Dead-lettered items are announced
    /// here as failures; the dead-letter entry itself goes to
    /// [`TOPIC_DEAD_LETTER`].
    pub fn topic_for(outcome: &CompletionOutcome) -> &'static str {
        if outcome.is_success() {
            TOPIC_COMPLETED
        } else {
            TOPIC_FAILED
        }
    }
}

/// External message bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<(), AppError>;

    /// Waits for the next message on `topic`.
    async fn consume(&self, topic: &str) -> Result<EventMessage, AppError>;
}

/// Unbounded in-process bus, FIFO per topic.
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    topics: Mutex<HashMap<String, VecDeque<EventMessage>>>,
    notify: Notify,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<EventMessage>>> {
        self.topics.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Event bus mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn try_consume(&self, topic: &str) -> Option<EventMessage> {
        self.lock_topics().get_mut(topic)?.pop_front()
    }

    pub fn len(&self, topic: &str) -> usize {
        self.lock_topics().get(topic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<(), AppError> {
        self.lock_topics()
            .entry(topic.to_string())
            .or_default()
            .push_back(message);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<EventMessage, AppError> {
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_consume(topic) {
                return Ok(message);
            }
            notified.await;
        }
    }
}
