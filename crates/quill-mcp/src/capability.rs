//! Capability snapshots from successful discovery.

use crate::client::ToolInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a server advertised as of its last successful discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<serde_json::Value>,
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<serde_json::Value>,
    pub prompts: Vec<serde_json::Value>,
}

struct CacheEntry {
    session_id: Uuid,
    snapshot: CapabilitySnapshot,
}

/// Per-identity snapshot cache. A snapshot is valid only for the session
/// that produced it; replacing or stopping that session invalidates it.
#[derive(Default)]
pub struct CapabilityCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, identity: &str, session_id: Uuid, snapshot: CapabilitySnapshot) {
        self.entries.lock().await.insert(
            identity.to_string(),
            CacheEntry {
                session_id,
                snapshot,
            },
        );
    }

    /// Snapshot for `identity`, but only if it came from `session_id`.
    pub async fn get(&self, identity: &str, session_id: Uuid) -> Option<CapabilitySnapshot> {
        let entries = self.entries.lock().await;
        let entry = entries.get(identity)?;
        (entry.session_id == session_id).then(|| entry.snapshot.clone())
    }

    pub async fn invalidate(&self, identity: &str) {
        self.entries.lock().await.remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_tool(name: &str) -> CapabilitySnapshot {
        CapabilitySnapshot {
            tools: vec![ToolInfo {
                name: name.to_string(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn snapshot_is_scoped_to_its_session() {
        let cache = CapabilityCache::new();
        let session = Uuid::new_v4();
        cache.put("a", session, snapshot_with_tool("read")).await;

        assert!(cache.get("a", session).await.is_some());
        // A replacement session must not see the old snapshot.
        assert!(cache.get("a", Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = CapabilityCache::new();
        let session = Uuid::new_v4();
        cache.put("a", session, snapshot_with_tool("read")).await;
        cache.invalidate("a").await;

        assert!(cache.get("a", session).await.is_none());
    }

    #[tokio::test]
    async fn replacement_overwrites_previous_snapshot() {
        let cache = CapabilityCache::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.put("a", first, snapshot_with_tool("old")).await;
        cache.put("a", second, snapshot_with_tool("new")).await;

        assert!(cache.get("a", first).await.is_none());
        let snapshot = cache.get("a", second).await.unwrap();
        assert_eq!(snapshot.tools[0].name, "new");
    }
}
