//! Client-side real-time synchronization engine for claim records
//!
//! Keeps a local cache of server-owned claims consistent with the
//! backend under unreliable connectivity:
//! - Pool of shared subscription channels, at most one per resource key
//! - Per-record debouncing of bursty push updates
//! - Aggregate connection state tracking
//! - Per-resource fallback from push to polling on transport failure
//! - Reconciliation passes on launch and offline→online transitions

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod models;
pub mod sync;

pub use channel::{ConnectionState, PoolStats};
pub use config::EngineConfig;
pub use engine::{global, set_global, SyncEngine, SyncEngineBuilder};
pub use error::TransportError;
pub use models::{
    ClaimRecord, ClaimStatus, ClaimUpdate, ResourceKey, SyncMode, SyncResult, UpdateSource,
};
pub use sync::{ErrorCallback, ReconcileStats, Subscription, UpdateCallback};
