//! In-memory topic -> ring-buffer pub/sub substrate.
//!
//! This is deliberately NOT durable — the [`Blackboard`](../blackboard)
//! crate is the authoritative store; this bus exists purely for
//! low-latency fan-out and is rebuilt from scratch on process restart.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

/// Maximum entries retained per topic before the oldest is evicted.
pub const MAX_MESSAGES_PER_TOPIC: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Numeric mapping used when handing priority to storage / the bus:
    /// `{low=0, normal=1, high=2, critical=3}`.
    pub fn as_u8(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub topic: String,
    pub sender: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BusStats {
    pub total_messages: usize,
    pub topic_count: usize,
    pub subscriber_count: usize,
    pub messages_per_topic: HashMap<String, usize>,
}

struct Topic {
    messages: VecDeque<BusMessage>,
    subscribers: DashSet<String>,
}

impl Topic {
    fn new() -> Self {
        Self { messages: VecDeque::new(), subscribers: DashSet::new() }
    }

    fn push(&mut self, msg: BusMessage) {
        if self.messages.len() >= MAX_MESSAGES_PER_TOPIC {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
    }
}

/// Thread-safe pub/sub substrate. All operations may be invoked from
/// parallel tasks; `DashMap`'s per-shard locking serializes writes per
/// topic without a single global lock.
pub struct MessageBus {
    topics: DashMap<String, Topic>,
    /// handle -> set of topics it is subscribed to.
    subscriptions: DashMap<String, DashSet<String>>,
    /// handle -> set of message ids it has already read.
    seen: DashMap<String, DashSet<String>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            seen: DashMap::new(),
        }
    }

    /// Publish to `topic`. O(1) amortized; evicts the oldest entry once
    /// the topic is at capacity.
    pub fn publish(&self, topic: &str, sender: &str, priority: Priority, payload: serde_json::Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = BusMessage {
            id: id.clone(),
            topic: topic.to_string(),
            sender: sender.to_string(),
            priority,
            payload,
            created_at: now_millis(),
        };

        self.topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .push(msg);

        tracing::debug!(topic, sender, id = %id, "message published to bus");
        id
    }

    pub fn subscribe(&self, handle: &str, topic: &str) {
        self.subscriptions
            .entry(handle.to_string())
            .or_insert_with(DashSet::new)
            .insert(topic.to_string());
        self.topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .subscribers
            .insert(handle.to_string());
    }

    pub fn unsubscribe(&self, handle: &str, topic: &str) {
        if let Some(subs) = self.subscriptions.get(handle) {
            subs.remove(topic);
        }
        if let Some(mut t) = self.topics.get_mut(topic) {
            t.subscribers.remove(handle);
        }
    }

    /// Scan `handle`'s subscribed topics, sort by `(priority desc,
    /// created_at asc)`, and mark the returned messages as read for
    /// `handle`.
    pub fn read(&self, handle: &str, limit: usize, unread_only: bool) -> Vec<BusMessage> {
        let Some(topics) = self.subscriptions.get(handle) else {
            return Vec::new();
        };
        let seen = self.seen.entry(handle.to_string()).or_insert_with(DashSet::new);

        let mut all: Vec<BusMessage> = topics
            .iter()
            .filter_map(|t| self.topics.get(t.key()).map(|topic| topic.messages.iter().cloned().collect::<Vec<_>>()))
            .flatten()
            .filter(|m| !unread_only || !seen.contains(&m.id))
            .collect();

        all.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        all.truncate(limit);

        for m in &all {
            seen.insert(m.id.clone());
        }
        all
    }

    /// Diagnostic read of a single topic with no read-tracking side effects.
    pub fn read_topic(&self, topic: &str, limit: usize) -> Vec<BusMessage> {
        self.topics
            .get(topic)
            .map(|t| {
                let mut msgs: Vec<BusMessage> = t.messages.iter().cloned().collect();
                msgs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
                msgs.truncate(limit);
                msgs
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> BusStats {
        let mut messages_per_topic = HashMap::new();
        let mut total = 0;
        for entry in self.topics.iter() {
            let count = entry.messages.len();
            total += count;
            messages_per_topic.insert(entry.key().clone(), count);
        }
        BusStats {
            total_messages: total,
            topic_count: self.topics.len(),
            subscriber_count: self.subscriptions.len(),
            messages_per_topic,
        }
    }

    /// Evict entries older than `max_age_ms` across all topics. Returns
    /// the number evicted.
    pub fn drain_old(&self, max_age_ms: i64) -> usize {
        let cutoff = now_millis() - max_age_ms;
        let mut evicted = 0;
        for mut topic in self.topics.iter_mut() {
            let before = topic.messages.len();
            topic.messages.retain(|m| m.created_at >= cutoff);
            evicted += before - topic.messages.len();
        }
        evicted
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_and_read_back() {
        let bus = MessageBus::new();
        bus.subscribe("alice", "t1");
        bus.publish("t1", "bob", Priority::Normal, json!({"x": 1}));
        let msgs = bus.read("alice", 10, false);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn read_sorts_priority_desc_then_created_at_asc() {
        let bus = MessageBus::new();
        bus.subscribe("alice", "t1");
        bus.publish("t1", "bob", Priority::Low, json!(1));
        bus.publish("t1", "bob", Priority::Critical, json!(2));
        bus.publish("t1", "bob", Priority::High, json!(3));

        let msgs = bus.read("alice", 10, false);
        let prios: Vec<_> = msgs.iter().map(|m| m.priority).collect();
        assert_eq!(prios, vec![Priority::Critical, Priority::High, Priority::Low]);
    }

    #[test]
    fn unread_only_excludes_already_read() {
        let bus = MessageBus::new();
        bus.subscribe("alice", "t1");
        bus.publish("t1", "bob", Priority::Normal, json!(1));

        let first = bus.read("alice", 10, true);
        assert_eq!(first.len(), 1);
        let second = bus.read("alice", 10, true);
        assert!(second.is_empty());
    }

    #[test]
    fn eviction_at_capacity_drops_oldest() {
        let bus = MessageBus::new();
        for i in 0..MAX_MESSAGES_PER_TOPIC + 1 {
            bus.publish("t1", "bob", Priority::Normal, json!(i));
        }
        let all = bus.read_topic("t1", usize::MAX);
        assert_eq!(all.len(), MAX_MESSAGES_PER_TOPIC);
    }

    #[test]
    fn unsubscribe_stops_future_reads() {
        let bus = MessageBus::new();
        bus.subscribe("alice", "t1");
        bus.unsubscribe("alice", "t1");
        bus.publish("t1", "bob", Priority::Normal, json!(1));
        assert!(bus.read("alice", 10, false).is_empty());
    }

    #[test]
    fn stats_reflect_topics_and_subscribers() {
        let bus = MessageBus::new();
        bus.subscribe("alice", "t1");
        bus.publish("t1", "bob", Priority::Normal, json!(1));
        let stats = bus.stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.topic_count, 1);
        assert_eq!(stats.subscriber_count, 1);
    }

    #[test]
    fn drain_old_is_idempotent() {
        let bus = MessageBus::new();
        bus.publish("t1", "bob", Priority::Normal, json!(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let first = bus.drain_old(0);
        assert_eq!(first, 1);
        let second = bus.drain_old(0);
        assert_eq!(second, 0);
    }
}
