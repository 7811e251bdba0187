//! Core data models for the claim sync engine

use serde::{Deserialize, Serialize};

/// Lifecycle status of a claim on a time-limited offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    /// Claim created but not yet confirmed by the backend
    Pending,
    /// Claim is live and redeemable
    Active,
    /// Claim was redeemed at the venue
    Redeemed,
    /// Claim expired before redemption
    Expired,
    /// Claim was cancelled or rejected by the backend
    Cancelled,
}

impl ClaimStatus {
    /// Returns true if no further legitimate transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Redeemed | ClaimStatus::Expired | ClaimStatus::Cancelled
        )
    }
}

/// Last known representation of a server-owned claim record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub user_id: String,
    pub offer_id: String,
    pub status: ClaimStatus,
    /// Opaque redemption reference issued by the backend
    pub token: String,
    /// Populated when the backend rejects or cancels the claim
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

/// Where an update was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Realtime,
    Polling,
}

/// Update delivered to a subscription's callback
#[derive(Debug, Clone)]
pub struct ClaimUpdate {
    pub claim: ClaimRecord,
    pub source: UpdateSource,
}

/// Sync mode of an actively tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Push-delivered updates over a pooled channel
    Realtime,
    /// Timer-driven polling, chosen at subscribe time
    Polling,
    /// Polling reached via transport failure; never returns to realtime
    Fallback,
}

/// Identity used to key pooled channels and sync records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// A single claim by id
    Claim(String),
    /// All claims owned by a user
    UserClaims(String),
}

impl ResourceKey {
    /// Channel key string for the pool map
    pub fn channel_key(&self) -> String {
        match self {
            ResourceKey::Claim(id) => format!("claim:{}", id),
            ResourceKey::UserClaims(user_id) => format!("user-claims:{}", user_id),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.channel_key())
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Records fetched from the backend and written to the cache
    pub claims_synced: usize,
    /// Records whose status differed between the snapshots
    pub status_changes: usize,
    /// The changed subset, in fetched order
    pub changed_claims: Vec<ClaimRecord>,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncResult {
    /// Result for a pass that could not fetch from the backend
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ClaimStatus::Pending.is_terminal());
        assert!(!ClaimStatus::Active.is_terminal());
        assert!(ClaimStatus::Redeemed.is_terminal());
        assert!(ClaimStatus::Expired.is_terminal());
        assert!(ClaimStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_resource_key_channel_key() {
        assert_eq!(
            ResourceKey::Claim("c1".to_string()).channel_key(),
            "claim:c1"
        );
        assert_eq!(
            ResourceKey::UserClaims("u1".to_string()).channel_key(),
            "user-claims:u1"
        );
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&ClaimStatus::Redeemed).unwrap();
        assert_eq!(json, "\"redeemed\"");

        let status: ClaimStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(status, ClaimStatus::Active);
    }

    #[test]
    fn test_failed_result() {
        let result = SyncResult::failed("network unreachable");
        assert!(!result.success);
        assert_eq!(result.claims_synced, 0);
        assert_eq!(result.error.as_deref(), Some("network unreachable"));
    }
}
