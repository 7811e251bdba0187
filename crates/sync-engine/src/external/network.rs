//! Device network reachability
//!
//! Reachability comes from platform callbacks outside this crate; the
//! engine consumes it as a watch channel of online/offline flips.

use tokio::sync::watch;

/// Source of device online/offline transitions
pub trait ConnectivityMonitor: Send + Sync {
    /// Current reachability
    fn is_online(&self) -> bool;

    /// Receiver that observes every reachability flip
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Monitor driven by explicit `set_online` calls
///
/// Hosts bridge their platform reachability callbacks into this; tests
/// drive it directly.
pub struct StaticConnectivity {
    tx: watch::Sender<bool>,
}

impl StaticConnectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Report a reachability change
    pub fn set_online(&self, online: bool) {
        // send_if_modified keeps duplicate reports from waking watchers
        self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for StaticConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
