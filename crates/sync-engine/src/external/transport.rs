//! Backend real-time transport and query interfaces
//!
//! The engine never speaks a wire protocol itself. The host app supplies
//! implementations of these traits; the channel pool is the only component
//! allowed to open transport channels.

use crate::error::TransportError;
use crate::models::ClaimRecord;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Row-level filter for a channel subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    /// Changes to a single claim by id
    Claim { id: String },
    /// Changes to all claims owned by a user
    UserClaims { user_id: String },
}

/// Transport-level channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    /// Expected during normal teardown, not an error
    Closed,
}

/// Fixed tagged payload crossing the pool boundary
///
/// Downstream logic never inspects loosely-typed transport payloads; the
/// transport implementation converts to this shape.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A changed claim row carried on the channel
    Update(ClaimRecord),
    /// A channel lifecycle transition
    Status {
        status: ChannelStatus,
        error: Option<TransportError>,
    },
}

/// Transport-side handle for one open channel
///
/// Dropping the handle must release the underlying subscription.
pub trait ChannelHandle: Send {}

impl<T: Send> ChannelHandle for T {}

/// A live channel yielded by the transport
pub struct TransportChannel {
    /// Inbound events; the stream ends when the transport closes the channel
    pub events: mpsc::Receiver<ChannelEvent>,
    /// Held for the channel's lifetime, dropped on teardown
    pub guard: Box<dyn ChannelHandle>,
}

/// Subscribe-by-filter primitive over the backend's change feed
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel delivering change events matching `filter`
    async fn open_channel(&self, filter: &ChannelFilter)
        -> Result<TransportChannel, TransportError>;
}

/// Point and list queries against the backend
#[async_trait]
pub trait BackendQuery: Send + Sync {
    /// Fetch a single claim by id
    async fn fetch_claim(&self, id: &str) -> Result<Option<ClaimRecord>>;

    /// Fetch the authoritative set of claims owned by a user
    async fn fetch_user_claims(&self, user_id: &str) -> Result<Vec<ClaimRecord>>;
}
