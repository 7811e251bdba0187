//! Local cache of last known claim state
//!
//! The cache is the single owner of persisted record state. The
//! reconciliation coordinator and the polling diff step write to it, and
//! only through [`LocalCache::update_claim`]; everything else reads.

use super::transport::BackendQuery;
use crate::models::ClaimRecord;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Key-value store of the last known record state per claim
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Prepare the store for use
    async fn initialize(&self) -> Result<()>;

    /// Last known state of a single claim
    async fn get_claim(&self, id: &str) -> Result<Option<ClaimRecord>>;

    /// Last known state of all claims owned by a user
    async fn get_user_claims(&self, user_id: &str) -> Result<Vec<ClaimRecord>>;

    /// Replace the stored state for one claim
    async fn update_claim(&self, id: &str, record: ClaimRecord) -> Result<()>;

    /// Bulk-replace a user's claims from the authoritative server list
    async fn sync_with_server(
        &self,
        user_id: &str,
        query: &dyn BackendQuery,
    ) -> Result<Vec<ClaimRecord>>;
}

/// In-memory cache implementation
///
/// Used by every test and usable by the host app before a persistent
/// store is wired in.
#[derive(Default)]
pub struct MemoryCache {
    claims: DashMap<String, ClaimRecord>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached claims
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_claim(&self, id: &str) -> Result<Option<ClaimRecord>> {
        Ok(self.claims.get(id).map(|r| r.clone()))
    }

    async fn get_user_claims(&self, user_id: &str) -> Result<Vec<ClaimRecord>> {
        Ok(self
            .claims
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect())
    }

    async fn update_claim(&self, id: &str, record: ClaimRecord) -> Result<()> {
        debug!(claim_id = %id, status = ?record.status, "Updating cached claim");
        self.claims.insert(id.to_string(), record);
        Ok(())
    }

    async fn sync_with_server(
        &self,
        user_id: &str,
        query: &dyn BackendQuery,
    ) -> Result<Vec<ClaimRecord>> {
        let fetched = query.fetch_user_claims(user_id).await?;
        let now = chrono::Utc::now().timestamp();

        for claim in &fetched {
            let mut stamped = claim.clone();
            stamped.last_synced_at = Some(now);
            self.claims.insert(stamped.id.clone(), stamped);
        }

        debug!(user_id = %user_id, claims = fetched.len(), "Cache synced with server");
        Ok(fetched)
    }
}
