//! Agent memory storage
//!
//! The control loop only needs the four operations of [`Storage`]. How the store is
//! replicated is up to the implementation. [`LocalStorage`] is an in-memory map with an
//! optional JSON snapshot standing in for the durable remote copy.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Entry counts and last sync time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub entries: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Memory store consumed by the healer and heartbeat jobs
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError>;

    /// Store a value. Returns once the durable copy has been written.
    async fn set(&self, key: &str, value: Value, metadata: HashMap<String, String>) -> Result<(), AgentError>;

    /// Pull durable state into the local cache. Safe to call repeatedly.
    async fn sync_from_relays(&self) -> Result<(), AgentError>;

    async fn stats(&self) -> Result<StorageStats, AgentError>;
}

/// A stored value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory storage with an optional snapshot file
pub struct LocalStorage {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    snapshot: Option<File>,
}

impl LocalStorage {
    /// Storage that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_sync: RwLock::new(None),
            snapshot: None,
        }
    }

    /// Storage backed by a snapshot file, loading it if present
    pub async fn with_snapshot(snapshot: File) -> Result<Self, AgentError> {
        let storage = Self {
            entries: RwLock::new(HashMap::new()),
            last_sync: RwLock::new(None),
            snapshot: Some(snapshot),
        };
        storage.load_snapshot().await?;
        Ok(storage)
    }

    async fn load_snapshot(&self) -> Result<usize, AgentError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(0);
        };
        if !snapshot.exists().await {
            return Ok(0);
        }

        let stored: HashMap<String, MemoryEntry> = snapshot.read_json().await?;
        let count = stored.len();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (key, entry) in stored {
            let newer = entries
                .get(&key)
                .map(|current| entry.updated_at >= current.updated_at)
                .unwrap_or(true);
            if newer {
                entries.insert(key, entry);
            }
        }
        Ok(count)
    }

    async fn write_snapshot(&self) -> Result<(), AgentError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner()).clone();
        snapshot.write_json(&entries).await
    }

    /// Drop every entry and the snapshot file
    pub async fn wipe(&self) -> Result<(), AgentError> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(snapshot) = &self.snapshot {
            snapshot.delete().await?;
        }
        info!("Agent memory wiped");
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, metadata: HashMap<String, String>) -> Result<(), AgentError> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value,
                    metadata,
                    updated_at: Utc::now(),
                },
            );
        }
        self.write_snapshot().await
    }

    async fn sync_from_relays(&self) -> Result<(), AgentError> {
        let count = self.load_snapshot().await?;
        debug!("Synced {} entries from snapshot", count);
        *self.last_sync.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats, AgentError> {
        Ok(StorageStats {
            entries: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
            last_sync: *self.last_sync.read().unwrap_or_else(|e| e.into_inner()),
        })
    }
}
