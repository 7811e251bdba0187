//! Interfaces to out-of-scope collaborators
//!
//! This module holds the seams between the engine and the systems it
//! depends on but does not own:
//! - Backend real-time transport and query endpoints
//! - Local persistent cache
//! - Feedback/UI notifier
//! - Device network reachability

mod cache;
mod network;
mod notifier;
mod transport;

pub use cache::{LocalCache, MemoryCache};
pub use network::{ConnectivityMonitor, StaticConnectivity};
pub use notifier::{FeedbackNotifier, NoopNotifier};
pub use transport::{
    BackendQuery, ChannelEvent, ChannelFilter, ChannelHandle, ChannelStatus, RealtimeTransport,
    TransportChannel,
};
