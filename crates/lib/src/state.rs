//! Per-conversation enable/disable state.
//!
//! A conversation never explicitly toggled is disabled. State records are
//! upserted through a pluggable persistence port and cached in memory; the
//! cache is hydrated from the port at most once per process, on first use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

/// Opaque conversation key (e.g. Telegram chat id as a decimal string).
pub type ConversationId = String;

/// One persisted toggle record. Records are upserted, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Persistence failures, surfaced to whoever issued the toggle so the
/// state the user sees matches persisted truth.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("loading conversation state: {0}")]
    Load(String),
    #[error("persisting conversation state: {0}")]
    Persist(String),
}

/// Key-value contract the store needs from persistent storage.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Ids of all conversations currently enabled.
    async fn load_all_enabled(&self) -> Result<HashSet<ConversationId>, StateError>;
    /// Write one toggle record.
    async fn upsert(
        &self,
        conversation_id: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StateError>;
}

/// Enabled-set cache over a persistence port.
pub struct ConversationStateStore {
    port: Arc<dyn StatePersistence>,
    cache: RwLock<HashSet<ConversationId>>,
    hydrated: OnceCell<()>,
}

impl ConversationStateStore {
    pub fn new(port: Arc<dyn StatePersistence>) -> Self {
        Self {
            port,
            cache: RwLock::new(HashSet::new()),
            hydrated: OnceCell::new(),
        }
    }

    /// Load the enabled set from the port exactly once. Concurrent first
    /// callers all await the same load; a failed load leaves the gate
    /// unset so a later call retries.
    async fn hydrate(&self) -> Result<(), StateError> {
        self.hydrated
            .get_or_try_init(|| async {
                let enabled = self.port.load_all_enabled().await?;
                log::debug!("hydrated conversation state: {} enabled", enabled.len());
                *self.cache.write().await = enabled;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Whether the responder is on in this conversation. May hit the port
    /// on first access, then serves from cache.
    pub async fn is_enabled(&self, conversation_id: &str) -> Result<bool, StateError> {
        self.hydrate().await?;
        Ok(self.cache.read().await.contains(conversation_id))
    }

    /// Toggle a conversation. Writes through to the port first; the cache
    /// is updated only after the write succeeds, so a failed write leaves
    /// the observable state unchanged.
    pub async fn set_enabled(
        &self,
        conversation_id: &str,
        enabled: bool,
    ) -> Result<(), StateError> {
        self.hydrate().await?;
        self.port
            .upsert(conversation_id, enabled, Utc::now())
            .await?;
        let mut cache = self.cache.write().await;
        if enabled {
            cache.insert(conversation_id.to_string());
        } else {
            cache.remove(conversation_id);
        }
        Ok(())
    }
}
