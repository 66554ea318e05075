//! File-based message delivery to each worker's inbox directory.
//!
//! Each worker gets a directory under the bridge's base dir. `send`
//! appends a framed message file using a write-temp-then-rename so a
//! reader never observes a partially written file. Delivery is
//! append-only: the worker consumes its inbox by reading and deleting.

use anyhow::{Context, Result};
use dashmap::{DashMap, DashSet};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub from: Option<String>,
    pub body: serde_json::Value,
    pub created_at: i64,
}

pub struct InboxBridge {
    base_dir: PathBuf,
    /// team_name -> member handles, maintained by the caller so
    /// `broadcast` knows who to fan out to.
    teams: DashMap<String, DashSet<String>>,
}

impl InboxBridge {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), teams: DashMap::new() }
    }

    pub fn register(&self, handle: &str, team_name: &str) {
        self.teams.entry(team_name.to_string()).or_insert_with(DashSet::new).insert(handle.to_string());
    }

    pub fn unregister(&self, handle: &str, team_name: &str) {
        if let Some(members) = self.teams.get(team_name) {
            members.remove(handle);
        }
    }

    fn inbox_dir(&self, handle: &str) -> PathBuf {
        self.base_dir.join(handle)
    }

    pub async fn ensure_inbox(&self, handle: &str) -> Result<PathBuf> {
        let dir = self.inbox_dir(handle);
        tokio::fs::create_dir_all(&dir).await.with_context(|| format!("creating inbox dir for {handle}"))?;
        Ok(dir)
    }

    /// Append a framed message file atomically: write to a `.tmp` sibling
    /// then rename into place so a concurrent reader never sees a partial
    /// write.
    pub async fn send(&self, handle: &str, from: Option<&str>, body: serde_json::Value) -> Result<String> {
        let dir = self.ensure_inbox(handle).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let msg = InboxMessage { id: id.clone(), from: from.map(str::to_string), body, created_at: now_millis() };

        let final_path = dir.join(format!("{:013}-{id}.json", msg.created_at));
        let tmp_path = dir.join(format!(".{id}.tmp"));

        let bytes = serde_json::to_vec(&msg)?;
        tokio::fs::write(&tmp_path, &bytes).await.context("writing inbox temp file")?;
        tokio::fs::rename(&tmp_path, &final_path).await.context("renaming inbox message into place")?;

        tracing::debug!(handle, id = %id, "message delivered to inbox");
        Ok(id)
    }

    pub async fn broadcast(&self, team_name: &str, from: Option<&str>, body: serde_json::Value) -> Result<Vec<String>> {
        let Some(members) = self.teams.get(team_name) else {
            return Ok(Vec::new());
        };
        let handles: Vec<String> = members.iter().map(|h| h.clone()).collect();
        let mut ids = Vec::with_capacity(handles.len());
        for handle in handles {
            ids.push(self.send(&handle, from, body.clone()).await?);
        }
        Ok(ids)
    }

    /// Read all pending messages for `handle` in filename (delivery)
    /// order, deleting each as it is consumed.
    pub async fn consume(&self, handle: &str) -> Result<Vec<InboxMessage>> {
        let dir = self.inbox_dir(handle);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_framed = path.file_name().and_then(|n| n.to_str()).map(|n| !n.starts_with('.')).unwrap_or(false);
            if is_framed {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await?;
            if let Ok(msg) = serde_json::from_slice::<InboxMessage>(&bytes) {
                messages.push(msg);
            }
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(messages)
    }

    /// Watch a handle's inbox directory for new deliveries. Returns a
    /// receiver that yields whenever a new file appears, plus the
    /// underlying watcher (drop it, or the returned shutdown sender, to
    /// stop watching).
    pub async fn watch(&self, handle: &str) -> Result<(mpsc::Receiver<()>, RecommendedWatcher)> {
        let dir = self.ensure_inbox(handle).await?;
        let (tx, rx) = mpsc::channel(16);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(event.kind, notify::EventKind::Create(_)) {
                    let _ = tx.try_send(());
                }
            }
        })?;
        watcher.watch(&dir as &Path, RecursiveMode::NonRecursive)?;

        Ok((rx, watcher))
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub type SharedInboxBridge = Arc<InboxBridge>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_consume_round_trips_in_order() {
        let dir = tempdir();
        let bridge = InboxBridge::new(dir.clone());

        bridge.send("w1", Some("orchestrator"), serde_json::json!({"n": 1})).await.unwrap();
        bridge.send("w1", Some("orchestrator"), serde_json::json!({"n": 2})).await.unwrap();

        let msgs = bridge.consume("w1").await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].body["n"], 1);
        assert_eq!(msgs[1].body["n"], 2);

        // Consuming again finds nothing — delivery is append-only, consumed once.
        let drained = bridge.consume("w1").await.unwrap();
        assert!(drained.is_empty());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn consume_on_unknown_handle_is_empty_not_error() {
        let dir = tempdir();
        let bridge = InboxBridge::new(dir.clone());
        let msgs = bridge.consume("ghost").await.unwrap();
        assert!(msgs.is_empty());
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_registered_team_members() {
        let dir = tempdir();
        let bridge = InboxBridge::new(dir.clone());
        bridge.register("w1", "team-a");
        bridge.register("w2", "team-a");

        bridge.broadcast("team-a", Some("lead"), serde_json::json!("go")).await.unwrap();

        assert_eq!(bridge.consume("w1").await.unwrap().len(), 1);
        assert_eq!(bridge.consume("w2").await.unwrap().len(), 1);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    fn tempdir() -> PathBuf {
        std::env::temp_dir().join(format!("inbox-bridge-test-{}", uuid::Uuid::new_v4()))
    }
}
