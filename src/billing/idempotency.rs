//! Ledger of processed billing event ids.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Records processed event ids so redelivered events are not applied twice
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Check if an event has already been processed
    async fn is_processed(&self, event_id: &str) -> Result<bool>;

    /// Mark an event as processed
    async fn mark_processed(&self, event_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Drop entries older than `before`. Returns how many were removed.
    ///
    /// Called daily by [`LedgerCleanupJob`](crate::jobs::LedgerCleanupJob)
    /// with a cutoff [`LEDGER_RETENTION_DAYS`] in the past.
    async fn cleanup_old_entries(&self, before: DateTime<Utc>) -> Result<usize>;
}

/// In-memory idempotency store (for development/testing)
///
/// In production, use a database-backed store so the ledger survives
/// restarts.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    processed: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.processed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processed.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.processed.read().await.contains_key(event_id))
    }

    async fn mark_processed(&self, event_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.processed
            .write()
            .await
            .entry(event_id.to_string())
            .or_insert(at);
        Ok(())
    }

    async fn cleanup_old_entries(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut processed = self.processed.write().await;
        let len = processed.len();
        processed.retain(|_, at| *at >= before);
        Ok(len - processed.len())
    }
}

/// Processors stop redelivering well before this.
pub const LEDGER_RETENTION_DAYS: i64 = 30;
