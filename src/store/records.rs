//! Record types persisted in the object store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Record, Value};

/// One cached network resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical resource URL
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub status: u16,
    /// Lower is more essential; eviction starts from the highest number
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Always `payload.len()`
    pub size_bytes: u64,
    /// Manifest fingerprint the entry was cached under (app-shell entries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: Vec<u8>,
        content_type: Option<String>,
        status: u16,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Self {
        let size_bytes = payload.len() as u64;
        Self {
            key: key.into(),
            payload,
            content_type,
            status,
            priority,
            created_at: now,
            last_accessed_at: now,
            size_bytes,
            manifest_version: None,
        }
    }
}

impl Record for CacheEntry {
    const COLLECTION: Collection = Collection::CachedContent;

    fn key(&self) -> Value {
        Value::from(self.key.as_str())
    }

    fn index_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("priority", Value::from(self.priority as i64)),
            ("last_accessed", Value::from(self.last_accessed_at)),
        ]
    }

    fn quota_charge(&self, _encoded_len: usize) -> u64 {
        self.size_bytes
    }
}

/// One progress write from a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: i64,
    pub section: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl Record for ProgressRecord {
    const COLLECTION: Collection = Collection::Progress;

    fn key(&self) -> Value {
        Value::Int(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("timestamp", Value::from(self.timestamp)),
            ("section", Value::from(self.section.as_str())),
            ("synced", Value::from(self.synced)),
        ]
    }
}

/// A user favorite, upserted by caller-supplied id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl FavoriteRecord {
    /// Same favorite content, ignoring the sync flag
    pub fn same_state(&self, other: &FavoriteRecord) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.title == other.title
            && self.url == other.url
            && self.timestamp == other.timestamp
    }
}

impl Record for FavoriteRecord {
    const COLLECTION: Collection = Collection::Favorites;

    fn key(&self) -> Value {
        Value::from(self.id.as_str())
    }

    fn index_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("timestamp", Value::from(self.timestamp)),
            ("type", Value::from(self.kind.as_str())),
        ]
    }
}

/// A tracked analytics event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

impl Record for AnalyticsEvent {
    const COLLECTION: Collection = Collection::AnalyticsEvents;

    fn key(&self) -> Value {
        Value::Int(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("timestamp", Value::from(self.timestamp)),
            ("type", Value::from(self.event_type.as_str())),
            ("synced", Value::from(self.synced)),
        ]
    }
}

/// What a queued sync item delivers, and where
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Progress,
    Favorites,
    Analytics,
    Profile,
}

impl SyncKind {
    pub const ALL: [SyncKind; 4] = [
        SyncKind::Progress,
        SyncKind::Favorites,
        SyncKind::Analytics,
        SyncKind::Profile,
    ];

    /// Remote endpoint path for this kind
    pub fn endpoint(&self) -> &'static str {
        match self {
            SyncKind::Progress => "/api/sync/progress",
            SyncKind::Favorites => "/api/sync/favorites",
            SyncKind::Analytics => "/api/analytics/events",
            SyncKind::Profile => "/api/sync/profile",
        }
    }

    pub fn default_priority(&self) -> u8 {
        match self {
            SyncKind::Progress => 1,
            SyncKind::Favorites | SyncKind::Profile => 2,
            SyncKind::Analytics => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Progress => "progress",
            SyncKind::Favorites => "favorites",
            SyncKind::Analytics => "analytics",
            SyncKind::Profile => "profile",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a queue item back to the record it snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceKey {
    Id(i64),
    Name(String),
}

impl From<SourceKey> for Value {
    fn from(key: SourceKey) -> Self {
        match key {
            SourceKey::Id(id) => Value::Int(id),
            SourceKey::Name(name) => Value::Text(name),
        }
    }
}

/// A pending outbound delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: i64,
    pub kind: SyncKind,
    /// Snapshot of the originating record at enqueue time
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKey>,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl SyncQueueItem {
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Record for SyncQueueItem {
    const COLLECTION: Collection = Collection::SyncQueue;

    fn key(&self) -> Value {
        Value::Int(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("priority", Value::from(self.priority as i64)),
            ("kind", Value::from(self.kind.as_str())),
            ("enqueued_at", Value::from(self.enqueued_at)),
        ]
    }
}

/// Byte payloads are stored as base64 text inside the JSON record body
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
