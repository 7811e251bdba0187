//! Shared transport channels
//!
//! This module owns everything between the raw transport and the sync
//! layer:
//! - Reference-counted channel pool with single-flight acquisition
//! - Per-record update debouncing
//! - Aggregate connection state tracking with listener fan-out

mod connection;
mod debounce;
mod pool;

pub use connection::{ConnectionState, ConnectionStateTracker, ListenerHandle};
pub use debounce::UpdateDebouncer;
pub use pool::{ChannelPool, PoolErrorCallback, PoolStats, PoolTicket, PoolUpdateCallback};
