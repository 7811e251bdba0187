//! Sync strategy and reconciliation
//!
//! This module decides how each tracked resource stays consistent with
//! the backend:
//! - Per-resource mode selection between pooled realtime channels and
//!   polling, with one-way fallback on non-retryable failure
//! - Reconciliation passes that diff authoritative server state against
//!   the local cache across offline periods

mod mode;
mod reconcile;


pub use mode::{ErrorCallback, Subscription, SyncModeSelector, UpdateCallback};
pub use reconcile::{ReconcileCoordinator, ReconcileStats};
