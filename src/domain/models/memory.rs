//! Typed memory entries with category and time-to-live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Current execution state
    Session,
    /// Past failures and their fixes
    Operational,
    /// Per-user preferences and thresholds
    UserPreference,
    /// Policies and SLAs
    Organizational,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Operational => "operational",
            Self::UserPreference => "user_preference",
            Self::Organizational => "organizational",
        }
    }
}

/// A single key/value memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub category: MemoryCategory,
    /// Optional time-to-live in seconds; entries past it are expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        category: MemoryCategory,
        ttl_seconds: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            category,
            ttl_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the entry has outlived its TTL as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            None => false,
            Some(ttl) => {
                let elapsed = (now - self.created_at).num_seconds();
                elapsed >= 0 && elapsed as u64 > ttl
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = MemoryEntry::new("theme", json!("dark"), MemoryCategory::UserPreference, None);
        assert!(!entry.is_expired_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = MemoryEntry::new(
            "current_step",
            json!(3),
            MemoryCategory::Session,
            Some(60),
        );
        assert!(!entry.is_expired_at(entry.created_at + Duration::seconds(59)));
        assert!(entry.is_expired_at(entry.created_at + Duration::seconds(61)));
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&MemoryCategory::UserPreference).unwrap();
        assert_eq!(json, r#""user_preference""#);
    }
}
