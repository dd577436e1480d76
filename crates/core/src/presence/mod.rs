//! Call presence records
//!
//! When a call is joined a record is written so invitees can find it; when
//! the call ends the record is marked `ended`. Both writes are best effort:
//! the call never waits on or fails because of the store.

pub mod appwrite;

pub use appwrite::AppwritePresenceStore;

use crate::config::MeshCallConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status written when a call ends
pub const STATUS_ENDED: &str = "ended";

/// One call document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Store-assigned document id
    #[serde(rename = "$id", default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    pub meeting_url: String,

    #[serde(rename = "room")]
    pub room_id: String,

    pub caller_id: String,

    #[serde(default)]
    pub callee_ids: Vec<String>,

    pub caller_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl PresenceRecord {
    pub fn new(
        meeting_url: &str,
        room_id: &str,
        caller_id: &str,
        callee_ids: &[String],
        caller_name: &str,
    ) -> Self {
        Self {
            document_id: None,
            meeting_url: meeting_url.to_string(),
            room_id: room_id.to_string(),
            caller_id: caller_id.to_string(),
            callee_ids: callee_ids.to_vec(),
            caller_name: caller_name.to_string(),
            status: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status.as_deref() == Some(STATUS_ENDED)
    }
}

/// Document store for call presence
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Create the record for a joined call
    async fn record_join(
        &self,
        meeting_url: &str,
        room_id: &str,
        caller_id: &str,
        callee_ids: &[String],
        caller_name: &str,
    ) -> Result<PresenceRecord>;

    /// Set `status = "ended"` on the first record created by `caller_id`
    ///
    /// # Errors
    ///
    /// `Error::Persistence` when no record exists for the caller.
    async fn mark_ended(&self, caller_id: &str) -> Result<PresenceRecord>;

    /// Records for one room, or all records
    async fn list(&self, room_id: Option<&str>) -> Result<Vec<PresenceRecord>>;
}

/// Store selected by the configuration: remote when configured, else in-memory
pub fn store_from_config(config: &MeshCallConfig) -> Result<Arc<dyn PresenceStore>> {
    match &config.presence {
        Some(presence) => Ok(Arc::new(AppwritePresenceStore::new(presence.clone())?)),
        None => Ok(Arc::new(MemoryPresenceStore::new())),
    }
}

/// Process-local store
///
/// ```
/// # tokio_test::block_on(async {
/// use meshcall_core::{MemoryPresenceStore, PresenceStore};
///
/// let store = MemoryPresenceStore::new();
/// store
///     .record_join("http://localhost:3000/call?roomId=r1", "r1", "user-1", &[], "Ada")
///     .await
///     .unwrap();
/// store.mark_ended("user-1").await.unwrap();
/// assert!(store.list(Some("r1")).await.unwrap()[0].is_ended());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: RwLock<Vec<PresenceRecord>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn record_join(
        &self,
        meeting_url: &str,
        room_id: &str,
        caller_id: &str,
        callee_ids: &[String],
        caller_name: &str,
    ) -> Result<PresenceRecord> {
        let mut records = self.records.write().await;
        let mut record = PresenceRecord::new(meeting_url, room_id, caller_id, callee_ids, caller_name);
        record.document_id = Some(format!("local-{}", records.len() + 1));
        records.push(record.clone());
        Ok(record)
    }

    async fn mark_ended(&self, caller_id: &str) -> Result<PresenceRecord> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.caller_id == caller_id)
            .ok_or_else(|| {
                Error::Persistence(format!("No document found for callerId {}", caller_id))
            })?;
        record.status = Some(STATUS_ENDED.to_string());
        Ok(record.clone())
    }

    async fn list(&self, room_id: Option<&str>) -> Result<Vec<PresenceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| room_id.map_or(true, |room| r.room_id == room))
            .cloned()
            .collect())
    }
}
