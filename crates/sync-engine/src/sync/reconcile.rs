//! Reconciliation against authoritative server state
//!
//! Watches device reachability, runs one initial catch-up sync per
//! process, and on every offline→online transition diffs the backend's
//! claim set against the local cache to detect transitions missed while
//! disconnected. This path is never debounced; it is the source of truth.

use crate::external::{BackendQuery, ConnectivityMonitor, FeedbackNotifier, LocalCache};
use crate::models::{ClaimStatus, SyncResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Accumulated reconciliation statistics
#[derive(Debug, Default, Clone)]
pub struct ReconcileStats {
    pub passes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_sync_at: Option<i64>,
}

/// Orchestrates catch-up syncs and missed-transition notifications
pub struct ReconcileCoordinator {
    query: Arc<dyn BackendQuery>,
    cache: Arc<dyn LocalCache>,
    notifier: Arc<dyn FeedbackNotifier>,
    monitor: Arc<dyn ConnectivityMonitor>,
    device_online: AtomicBool,
    initial_sync_done: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
    /// (claim id, new status) pairs already announced; the same
    /// transition is never announced twice
    announced: Mutex<HashSet<(String, ClaimStatus)>>,
    stats: Mutex<ReconcileStats>,
    self_ref: Weak<Self>,
}

impl ReconcileCoordinator {
    pub fn new(
        query: Arc<dyn BackendQuery>,
        cache: Arc<dyn LocalCache>,
        notifier: Arc<dyn FeedbackNotifier>,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> Arc<Self> {
        let device_online = AtomicBool::new(monitor.is_online());
        Arc::new_cyclic(|self_ref| Self {
            query,
            cache,
            notifier,
            monitor,
            device_online,
            initial_sync_done: AtomicBool::new(false),
            watcher: Mutex::new(None),
            announced: Mutex::new(HashSet::new()),
            stats: Mutex::new(ReconcileStats::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Wire the reachability listener and run the one-time initial sync
    ///
    /// Repeated calls after the first are no-ops.
    pub async fn initialize(&self, user_id: &str) {
        {
            let mut watcher = self.watcher.lock().unwrap();
            if watcher.is_some() {
                debug!("Reconcile coordinator already initialized");
                return;
            }

            self.device_online
                .store(self.monitor.is_online(), Ordering::SeqCst);

            let Some(coordinator) = self.self_ref.upgrade() else {
                return;
            };
            let user_id_owned = user_id.to_string();
            *watcher = Some(tokio::spawn(async move {
                coordinator.watch_connectivity(user_id_owned).await;
            }));
        }

        info!(user_id = %user_id, "Reconcile coordinator initialized");

        if !self.initial_sync_done.swap(true, Ordering::SeqCst) {
            let result = self.sync_now(user_id).await;
            if !result.success {
                warn!(
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Initial sync failed; next reconnection will retry"
                );
            }
        }
    }

    /// Whether the device currently has connectivity
    pub fn is_online(&self) -> bool {
        self.device_online.load(Ordering::SeqCst)
    }

    /// Accumulated statistics
    pub fn stats(&self) -> ReconcileStats {
        self.stats.lock().unwrap().clone()
    }

    /// Detach the reachability listener and reset the initial-sync guard
    ///
    /// Safe to call repeatedly, and without a prior `initialize`.
    pub fn cleanup(&self) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.abort();
        }
        self.initial_sync_done.store(false, Ordering::SeqCst);
        debug!("Reconcile coordinator cleaned up");
    }

    /// Snapshot-diff the backend against the cache
    ///
    /// Never returns an error: fetch failure yields a result with
    /// `success == false`, per-record cache write failures are logged
    /// and reflected in the synced count.
    pub async fn sync_now(&self, user_id: &str) -> SyncResult {
        let cached = match self.cache.get_user_claims(user_id).await {
            Ok(cached) => cached,
            Err(e) => return self.record_failure(format!("cache read failed: {}", e)),
        };

        let fetched = match self.query.fetch_user_claims(user_id).await {
            Ok(fetched) => fetched,
            Err(e) => return self.record_failure(format!("server fetch failed: {}", e)),
        };

        let cached_status: HashMap<&str, ClaimStatus> =
            cached.iter().map(|c| (c.id.as_str(), c.status)).collect();

        // A status change requires a previous status to have changed from;
        // records new to the cache are written but not announced
        let changed_claims: Vec<_> = fetched
            .iter()
            .filter(|remote| {
                cached_status
                    .get(remote.id.as_str())
                    .map(|&status| status != remote.status)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let now = chrono::Utc::now().timestamp();
        let mut claims_synced = 0;
        for remote in &fetched {
            let mut stamped = remote.clone();
            stamped.last_synced_at = Some(now);
            match self.cache.update_claim(&remote.id, stamped).await {
                Ok(()) => claims_synced += 1,
                Err(e) => {
                    warn!(claim_id = %remote.id, error = %e, "Cache write failed during sync")
                }
            }
        }

        // Notify only after the cache writes, so a UI re-read of the
        // cache is already consistent
        for claim in &changed_claims {
            self.announce(&claim.id, claim.status, claim.rejection_reason.as_deref());
        }

        {
            let mut stats = self.stats.lock().unwrap();
            stats.passes += 1;
            stats.last_sync_at = Some(now);
            stats.last_error = None;
        }

        info!(
            user_id = %user_id,
            claims_synced,
            status_changes = changed_claims.len(),
            "Reconciliation pass complete"
        );

        SyncResult {
            claims_synced,
            status_changes: changed_claims.len(),
            changed_claims,
            success: true,
            error: None,
        }
    }

    async fn watch_connectivity(self: Arc<Self>, user_id: String) {
        let mut rx = self.monitor.watch();

        while rx.changed().await.is_ok() {
            let online = *rx.borrow();
            let was_online = self.device_online.swap(online, Ordering::SeqCst);
            if online == was_online {
                continue;
            }

            if online {
                info!("Device back online, reconciling");
                self.notifier.hide_connectivity_warning();

                // Failures are logged, not surfaced; the next
                // reconnection attempt will retry
                let result = self.sync_now(&user_id).await;
                if !result.success {
                    warn!(
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Reconnection sync failed"
                    );
                }
            } else {
                info!("Device went offline");
                self.notifier.show_connectivity_warning();
            }
        }
    }

    /// Forward one outcome notification per (id, status), at most once
    fn announce(&self, claim_id: &str, status: ClaimStatus, reason: Option<&str>) {
        let first_time = self
            .announced
            .lock()
            .unwrap()
            .insert((claim_id.to_string(), status));
        if !first_time {
            return;
        }

        match status {
            ClaimStatus::Redeemed => self.notifier.notify_finalized(claim_id),
            ClaimStatus::Expired => self.notifier.notify_expired(claim_id),
            ClaimStatus::Cancelled => self
                .notifier
                .notify_rejected(claim_id, reason.unwrap_or("cancelled by server")),
            ClaimStatus::Pending | ClaimStatus::Active => {
                debug!(claim_id = %claim_id, status = ?status, "Status change without notification")
            }
        }
    }

    fn record_failure(&self, error: String) -> SyncResult {
        warn!(error = %error, "Reconciliation pass failed");

        let mut stats = self.stats.lock().unwrap();
        stats.failures += 1;
        stats.last_error = Some(error.clone());

        SyncResult::failed(error)
    }
}

impl Drop for ReconcileCoordinator {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.abort();
        }
    }
}
