//! Aggregate connection state tracking
//!
//! Folds channel lifecycle events from the pool into one process-wide
//! [`ConnectionState`] and fans out changes to registered listeners.
//! Duplicate identical states are suppressed.

use crate::error::TransportError;
use crate::external::ChannelStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Process-wide transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Tracks connection state and notifies listeners on actual changes
pub struct ConnectionStateTracker {
    state: Mutex<ConnectionState>,
    listeners: Mutex<HashMap<u64, StateCallback>>,
    next_listener_id: AtomicU64,
    self_ref: Weak<Self>,
}

impl ConnectionStateTracker {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(ConnectionState::Disconnected),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Register a listener; returns a handle whose `unsubscribe` detaches it
    pub fn on_state_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));

        ListenerHandle {
            id,
            tracker: self.self_ref.clone(),
        }
    }

    /// Move to `new_state`, notifying listeners only on an actual change
    pub fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == new_state {
                return;
            }
            debug!(from = ?*state, to = ?new_state, "Connection state changed");
            *state = new_state;
        }

        // Snapshot outside the listener lock so callbacks can re-enter
        let callbacks: Vec<StateCallback> = {
            let listeners = self.listeners.lock().unwrap();
            listeners.values().cloned().collect()
        };

        for callback in callbacks {
            callback(new_state);
        }
    }

    /// Fold a channel status event into the aggregate state
    ///
    /// Returns the classified error for `ChannelError`/`TimedOut` so the
    /// pool can forward it to subscriber error callbacks. `Closed` is
    /// expected during normal teardown and only logged.
    pub fn apply_status(
        &self,
        channel_key: &str,
        status: ChannelStatus,
        error: Option<TransportError>,
    ) -> Option<TransportError> {
        match status {
            ChannelStatus::Subscribed => {
                self.set_state(ConnectionState::Connected);
                None
            }
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
                let error = error.unwrap_or_else(|| {
                    TransportError::ConnectionFailed(format!(
                        "channel {} reported {:?} without detail",
                        channel_key, status
                    ))
                });
                warn!(
                    channel = %channel_key,
                    error = %error,
                    retryable = error.is_retryable(),
                    "Channel failure"
                );
                self.set_state(ConnectionState::Failed);
                Some(error)
            }
            ChannelStatus::Closed => {
                debug!(channel = %channel_key, "Channel closed");
                None
            }
        }
    }

    fn remove_listener(&self, id: u64) {
        self.listeners.lock().unwrap().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// Detaches a state listener; idempotent
pub struct ListenerHandle {
    id: u64,
    tracker: Weak<ConnectionStateTracker>,
}

impl ListenerHandle {
    pub fn unsubscribe(&self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.remove_listener(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_initial_state_disconnected() {
        let tracker = ConnectionStateTracker::new();
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_duplicate_states_suppressed() {
        let tracker = ConnectionStateTracker::new();
        let notifications = Arc::new(AtomicUsize::new(0));

        let counter = notifications.clone();
        let _handle = tracker.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.set_state(ConnectionState::Connected);
        tracker.set_state(ConnectionState::Connected);
        tracker.set_state(ConnectionState::Connected);

        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let tracker = ConnectionStateTracker::new();
        let notifications = Arc::new(AtomicUsize::new(0));

        let counter = notifications.clone();
        let handle = tracker.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.unsubscribe();
        handle.unsubscribe();
        assert_eq!(tracker.listener_count(), 0);

        tracker.set_state(ConnectionState::Connected);
        assert_eq!(notifications.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribed_maps_to_connected() {
        let tracker = ConnectionStateTracker::new();
        let forwarded = tracker.apply_status("claim:c1", ChannelStatus::Subscribed, None);

        assert!(forwarded.is_none());
        assert_eq!(tracker.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_channel_error_maps_to_failed_and_forwards() {
        let tracker = ConnectionStateTracker::new();
        let forwarded = tracker.apply_status(
            "claim:c1",
            ChannelStatus::ChannelError,
            Some(TransportError::AuthFailed("expired".into())),
        );

        assert_eq!(tracker.state(), ConnectionState::Failed);
        assert!(matches!(forwarded, Some(TransportError::AuthFailed(_))));
    }

    #[test]
    fn test_timeout_without_detail_defaults_retryable() {
        let tracker = ConnectionStateTracker::new();
        let forwarded = tracker
            .apply_status("claim:c1", ChannelStatus::TimedOut, None)
            .unwrap();

        assert!(forwarded.is_retryable());
    }

    #[test]
    fn test_closed_is_not_an_error() {
        let tracker = ConnectionStateTracker::new();
        tracker.set_state(ConnectionState::Connected);

        let forwarded = tracker.apply_status("claim:c1", ChannelStatus::Closed, None);
        assert!(forwarded.is_none());
        assert_eq!(tracker.state(), ConnectionState::Connected);
    }
}
