//! JSON-file adapter for the conversation-state persistence port.
//!
//! One pretty-printed JSON array of toggle records (e.g.
//! `~/.chatrep/state.json`). Reads happen on hydration; every upsert
//! rewrites the file under a lock so concurrent toggles cannot interleave
//! a read-modify-write cycle.

use crate::state::{ConversationId, ConversationState, StateError, StatePersistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct JsonStateFile {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl JsonStateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Read all records. A missing file is an empty store; an unreadable
    /// or unparseable file is an error (never silently clobbered).
    async fn read_records(&self) -> Result<Vec<ConversationState>, StateError> {
        let s = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StateError::Load(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&s)
            .map_err(|e| StateError::Load(format!("{}: {}", self.path.display(), e)))
    }

    async fn write_records(&self, records: &[ConversationState]) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| StateError::Persist(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::Persist(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StateError::Persist(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl StatePersistence for JsonStateFile {
    async fn load_all_enabled(&self) -> Result<HashSet<ConversationId>, StateError> {
        let records = self.read_records().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| r.conversation_id)
            .collect())
    }

    async fn upsert(
        &self,
        conversation_id: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_records().await?;
        if let Some(r) = records
            .iter_mut()
            .find(|r| r.conversation_id == conversation_id)
        {
            r.enabled = enabled;
            r.updated_at = updated_at;
        } else {
            records.push(ConversationState {
                conversation_id: conversation_id.to_string(),
                enabled,
                updated_at,
            });
        }
        self.write_records(&records).await
    }
}
