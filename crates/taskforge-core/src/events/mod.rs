//! Event Bus: per-project pub/sub with two transports sharing one schema.
//!
//! In-process: a `tokio::sync::broadcast` channel per `project:<id>`
//! topic, lazily created on first subscribe and reaped once its last
//! subscriber drops. Cross-process: the same schema delivered over
//! Postgres `LISTEN`/`NOTIFY` on a channel named `project:<id>`, so the
//! API process and worker processes observe the same events without a
//! second piece of shared infrastructure beyond the database already
//! used by the Job Queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// The shared event schema for both bus transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventPayload {
    TaskCreated { task_id: Uuid },
    TaskUpdated { task_id: Uuid },
    TaskDeleted { task_id: Uuid },
    TaskStatusChanged { task_id: Uuid, from: Option<String>, to: String },
    PlanUpdated { task_id: Uuid, plan_id: Uuid },
    PrCreated { task_id: Uuid, pull_request_id: Uuid },
    PrUpdated { task_id: Uuid, pull_request_id: Uuid },
    PrMerged { task_id: Uuid, pull_request_id: Uuid },
    PrClosed { task_id: Uuid, pull_request_id: Uuid },
    ExecutionLogAppended { execution_id: Uuid, line_number: i64 },
    UserJoined { connection_id: Uuid },
    UserLeft { connection_id: Uuid },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: EventPayload,
}

impl Event {
    pub fn new(data: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            data,
        }
    }
}

fn channel_name(project_id: Uuid) -> String {
    format!("project:{project_id}")
}

/// In-process topic registry. One `broadcast` channel per project,
/// created lazily and dropped once its sender's subscriber count hits zero
/// (checked opportunistically on publish, since `broadcast::Sender` alone
/// has no reliable "last subscriber dropped" hook).
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<Uuid, broadcast::Sender<Event>>>>,
    pool: PgPool,
}

impl EventBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Subscribe to a project's topic, creating it if necessary.
    pub async fn subscribe(&self, project_id: Uuid) -> broadcast::Receiver<Event> {
        let mut topics = self.topics.write().await;
        let sender = topics
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish to the in-process topic and the cross-process broker.
    /// Delivery is best-effort: a publish with zero subscribers is not an
    /// error, and an in-process send failure never blocks the broker
    /// publish.
    pub async fn publish(&self, project_id: Uuid, data: EventPayload) -> anyhow::Result<()> {
        let event = Event::new(data);

        {
            let mut topics = self.topics.write().await;
            if let Some(sender) = topics.get(&project_id) {
                if sender.receiver_count() == 0 {
                    topics.remove(&project_id);
                } else {
                    let _ = sender.send(event.clone());
                }
            }
        }

        let payload = serde_json::to_string(&event)?;
        let channel = channel_name(project_id);
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&channel)
            .bind(&payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Run a broker listener that re-publishes notifications for
    /// `project_id` into the in-process topic, for processes that did not
    /// originate the event (e.g. a worker receiving an API-published
    /// event). Runs until the channel errors or the pool closes.
    pub async fn bridge_broker(&self, project_id: Uuid) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        let channel = channel_name(project_id);
        listener.listen(&channel).await?;

        loop {
            let notification = listener.recv().await?;
            match serde_json::from_str::<Event>(notification.payload()) {
                Ok(event) => {
                    let topics = self.topics.read().await;
                    if let Some(sender) = topics.get(&project_id) {
                        let _ = sender.send(event);
                    }
                }
                Err(e) => {
                    warn!(error = %e, channel = %channel, "dropping malformed broker notification");
                }
            }
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_serializes_with_type_tag() {
        let payload = EventPayload::TaskStatusChanged {
            task_id: Uuid::nil(),
            from: Some("todo".into()),
            to: "planning".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "task_status_changed");
        assert_eq!(json["to"], "planning");
    }

    #[test]
    fn event_wraps_payload_with_id_and_timestamp() {
        let event = Event::new(EventPayload::TaskCreated { task_id: Uuid::nil() });
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("id").is_some());
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["type"], "task_created");
    }

    #[test]
    fn channel_name_is_project_prefixed() {
        let id = Uuid::nil();
        assert_eq!(channel_name(id), format!("project:{id}"));
    }
}
