//! Durable, typed, per-swarm messaging over [`persistence`], with a
//! write-through to [`message_bus`] for low-latency fan-out. Durability
//! lives in Postgres; the bus publish happens *after* the persist and is
//! best-effort (swallow + log) because the bus is never the source of
//! truth.

use anyhow::Result;
use message_bus::{MessageBus, Priority as BusPriority};
use persistence::{BlackboardRow, Database, MessageFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Status,
    Directive,
    Checkpoint,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Status => "status",
            MessageType::Directive => "directive",
            MessageType::Checkpoint => "checkpoint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    fn to_i16(self) -> i16 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    fn from_i16(v: i16) -> Self {
        match v {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Critical,
            _ => Priority::Normal,
        }
    }

    fn to_bus(self) -> BusPriority {
        match self {
            Priority::Low => BusPriority::Low,
            Priority::Normal => BusPriority::Normal,
            Priority::High => BusPriority::High,
            Priority::Critical => BusPriority::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub swarm_id: String,
    pub sender_handle: String,
    pub message_type: String,
    pub target_handle: Option<String>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub read_by: HashSet<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<BlackboardRow> for Message {
    fn from(r: BlackboardRow) -> Self {
        Self {
            id: r.id,
            swarm_id: r.swarm_id,
            sender_handle: r.sender_handle,
            message_type: r.message_type,
            target_handle: r.target_handle,
            priority: Priority::from_i16(r.priority),
            payload: r.payload,
            read_by: r.read_by.into_iter().collect(),
            created_at: r.created_at,
            archived_at: r.archived_at,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReadOptions {
    pub message_type: Option<MessageType>,
    pub target_handle: Option<String>,
    pub priority: Option<Priority>,
    pub unread_only: bool,
    pub reader_handle: Option<String>,
    pub limit: i64,
    pub include_archived: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self { limit: 100, ..Default::default() }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub total: i64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub by_priority: std::collections::HashMap<i16, i64>,
    pub unread: i64,
    pub archived: i64,
}

pub struct Blackboard {
    db: Database,
    bus: Arc<MessageBus>,
}

impl Blackboard {
    pub fn new(db: Database, bus: Arc<MessageBus>) -> Self {
        Self { db, bus }
    }

    pub fn bus_topic(swarm_id: &str, message_type: &str) -> String {
        format!("bb:{swarm_id}:{message_type}")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn post_message(
        &self,
        swarm_id: &str,
        sender_handle: &str,
        message_type: MessageType,
        payload: serde_json::Value,
        target_handle: Option<String>,
        priority: Priority,
    ) -> Result<Message> {
        let row = BlackboardRow {
            id: uuid::Uuid::new_v4().to_string(),
            swarm_id: swarm_id.to_string(),
            sender_handle: sender_handle.to_string(),
            message_type: message_type.as_str().to_string(),
            target_handle,
            priority: priority.to_i16(),
            payload,
            read_by: Vec::new(),
            created_at: chrono::Utc::now(),
            archived_at: None,
        };

        self.db.insert_message(&row).await?;

        // Bus publish happens after the durable write and never fails the
        // call — the bus is a cache, not the source of truth.
        let topic = Self::bus_topic(swarm_id, message_type.as_str());
        self.bus.publish(&topic, sender_handle, priority.to_bus(), row.payload.clone());

        Ok(row.into())
    }

    pub async fn read_messages(&self, swarm_id: &str, opts: &ReadOptions) -> Result<Vec<Message>> {
        let filter = MessageFilter {
            message_type: opts.message_type.map(|t| t.as_str().to_string()),
            target_handle: opts.target_handle.clone(),
            priority: opts.priority.map(|p| p.to_i16()),
            unread_only: opts.unread_only,
            reader_handle: opts.reader_handle.clone(),
            limit: opts.limit,
            include_archived: opts.include_archived,
        };
        let rows = self.db.read_messages(swarm_id, &filter).await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.db.get_message(id).await?.map(Message::from))
    }

    pub async fn mark_read(&self, ids: &[String], reader_handle: &str) -> Result<u64> {
        self.db.mark_read(ids, reader_handle).await
    }

    pub async fn archive_message(&self, id: &str) -> Result<bool> {
        self.db.archive_message(id).await
    }

    pub async fn archive_messages(&self, ids: &[String]) -> Result<u64> {
        self.db.archive_messages(ids).await
    }

    pub async fn archive_old_messages(&self, swarm_id: &str, max_age_ms: i64) -> Result<u64> {
        self.db.archive_old_messages(swarm_id, max_age_ms).await
    }

    pub async fn delete_archived(&self, swarm_id: &str) -> Result<u64> {
        self.db.delete_archived(swarm_id).await
    }

    pub async fn get_unread_count(&self, swarm_id: &str, reader_handle: &str) -> Result<i64> {
        self.db.get_unread_count(swarm_id, reader_handle).await
    }

    pub async fn get_stats(&self, swarm_id: &str) -> Result<Stats> {
        let s = self.db.get_stats(swarm_id).await?;
        Ok(Stats {
            total: s.total,
            by_type: s.by_type,
            by_priority: s.by_priority,
            unread: s.unread,
            archived: s.archived,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips_through_i16() {
        for p in [Priority::Low, Priority::Normal, Priority::High, Priority::Critical] {
            assert_eq!(Priority::from_i16(p.to_i16()), p);
        }
    }

    #[test]
    fn bus_topic_format() {
        assert_eq!(Blackboard::bus_topic("s1", "status"), "bb:s1:status");
    }
}
