//! Typed memory store.
//!
//! Read by the planner and hooks, written by the post-step hook and approval
//! outcomes. Expired entries are filtered on read and pruned on write.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::models::memory::{MemoryCategory, MemoryEntry};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryDocument {
    entries: Vec<MemoryEntry>,
}

/// Process-wide memory store.
pub struct MemoryService {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    path: Option<PathBuf>,
}

impl MemoryService {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path,
        }
    }

    /// Load persisted entries, dropping any that have expired.
    pub async fn load(&self) {
        let Some(ref path) = self.path else { return };
        let Ok(raw) = tokio::fs::read_to_string(path).await else {
            return;
        };
        match serde_json::from_str::<MemoryDocument>(&raw) {
            Ok(doc) => {
                let mut entries = self.entries.write().await;
                for entry in doc.entries {
                    if !entry.is_expired() {
                        entries.insert(entry.key.clone(), entry);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to parse memory store, starting empty"),
        }
    }

    /// Store a value. Prunes expired entries before inserting.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        category: MemoryCategory,
        ttl_seconds: Option<u64>,
    ) {
        let key = key.into();
        {
            let mut entries = self.entries.write().await;
            entries.retain(|_, e| !e.is_expired());

            match entries.get_mut(&key) {
                Some(existing) => {
                    existing.value = value;
                    existing.category = category;
                    existing.ttl_seconds = ttl_seconds;
                    existing.updated_at = Utc::now();
                }
                None => {
                    entries.insert(key.clone(), MemoryEntry::new(key, value, category, ttl_seconds));
                }
            }
        }
        self.persist().await;
    }

    /// Fetch a value; expired entries read as absent.
    pub async fn get(&self, key: &str) -> Option<MemoryEntry> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|e| !e.is_expired()).cloned()
    }

    /// All live entries in a category.
    pub async fn by_category(&self, category: MemoryCategory) -> Vec<MemoryEntry> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.category == category && !e.is_expired())
            .cloned()
            .collect()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self) {
        let Some(ref path) = self.path else { return };
        let doc = {
            let entries = self.entries.read().await;
            MemoryDocument {
                entries: entries.values().cloned().collect(),
            }
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&doc) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "Failed to persist memory store");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize memory store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryService::new(None);
        store
            .set("user:alice:theme", json!("dark"), MemoryCategory::UserPreference, None)
            .await;

        let entry = store.get("user:alice:theme").await.unwrap();
        assert_eq!(entry.value, json!("dark"));
        assert_eq!(entry.category, MemoryCategory::UserPreference);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemoryService::new(None);
        store
            .set("session:x:step", json!(1), MemoryCategory::Session, Some(0))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(store.get("session:x:step").await.is_none());
    }

    #[tokio::test]
    async fn test_by_category() {
        let store = MemoryService::new(None);
        store.set("a", json!(1), MemoryCategory::Session, None).await;
        store.set("b", json!(2), MemoryCategory::Operational, None).await;
        store.set("c", json!(3), MemoryCategory::Operational, None).await;

        assert_eq!(store.by_category(MemoryCategory::Operational).await.len(), 2);
        assert_eq!(store.by_category(MemoryCategory::Session).await.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let store = MemoryService::new(Some(path.clone()));
        store
            .set("org:sla", json!("24h"), MemoryCategory::Organizational, None)
            .await;

        let reloaded = MemoryService::new(Some(path));
        reloaded.load().await;
        let entry = reloaded.get("org:sla").await.unwrap();
        assert_eq!(entry.value, json!("24h"));
    }
}
