//! Public engine facade
//!
//! Composes the channel pool, sync mode selector, and reconciliation
//! coordinator behind one API. Construct explicit instances via the
//! builder; the module-scoped global accessor is a thin convenience
//! wrapper, not the source of truth.

use crate::channel::{
    ChannelPool, ConnectionState, ConnectionStateTracker, ListenerHandle, PoolStats,
    UpdateDebouncer,
};
use crate::config::EngineConfig;
use crate::external::{
    BackendQuery, ConnectivityMonitor, FeedbackNotifier, LocalCache, NoopNotifier,
    RealtimeTransport,
};
use crate::models::{ResourceKey, SyncMode, SyncResult};
use crate::sync::{
    ErrorCallback, ReconcileCoordinator, ReconcileStats, Subscription, SyncModeSelector,
    UpdateCallback,
};
use anyhow::Result;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::info;

/// Real-time claim synchronization engine
pub struct SyncEngine {
    tracker: Arc<ConnectionStateTracker>,
    pool: Arc<ChannelPool>,
    selector: Arc<SyncModeSelector>,
    coordinator: Arc<ReconcileCoordinator>,
    cache: Arc<dyn LocalCache>,
    current_user: Mutex<Option<String>>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// Subscribe to updates for a single claim
    pub async fn subscribe_to_claim(
        &self,
        claim_id: &str,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Result<Subscription> {
        self.selector
            .subscribe(ResourceKey::Claim(claim_id.to_string()), on_update, on_error)
            .await
    }

    /// Subscribe to updates for all of a user's claims over one channel
    pub async fn subscribe_to_user_claims(
        &self,
        user_id: &str,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Result<Subscription> {
        self.selector
            .subscribe(
                ResourceKey::UserClaims(user_id.to_string()),
                on_update,
                on_error,
            )
            .await
    }

    /// Prepare the cache, wire reachability monitoring, and run the
    /// one-time initial sync
    pub async fn initialize_sync(&self, user_id: &str) -> Result<()> {
        self.cache.initialize().await?;
        *self.current_user.lock().unwrap() = Some(user_id.to_string());
        self.coordinator.initialize(user_id).await;
        Ok(())
    }

    /// Run a reconciliation pass for the initialized user
    pub async fn manual_sync(&self) -> SyncResult {
        let user_id = self.current_user.lock().unwrap().clone();
        match user_id {
            Some(user_id) => self.coordinator.sync_now(&user_id).await,
            None => SyncResult::failed("sync engine not initialized"),
        }
    }

    /// Aggregate transport connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Listen for connection state changes
    pub fn on_connection_state_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.tracker.on_state_change(callback)
    }

    /// Current sync mode of a tracked claim, if any
    pub async fn sync_mode(&self, claim_id: &str) -> Option<SyncMode> {
        self.selector
            .mode_for(&ResourceKey::Claim(claim_id.to_string()))
            .await
    }

    /// Whether the device currently has connectivity
    pub fn is_online(&self) -> bool {
        self.coordinator.is_online()
    }

    /// Channel pool diagnostics
    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Reconciliation statistics
    pub fn reconcile_stats(&self) -> ReconcileStats {
        self.coordinator.stats()
    }

    /// Detach reachability monitoring; safe to call repeatedly
    pub fn cleanup(&self) {
        self.coordinator.cleanup();
    }
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn RealtimeTransport>>,
    query: Option<Arc<dyn BackendQuery>>,
    cache: Option<Arc<dyn LocalCache>>,
    notifier: Arc<dyn FeedbackNotifier>,
    monitor: Option<Arc<dyn ConnectivityMonitor>>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            transport: None,
            query: None,
            cache: None,
            notifier: Arc::new(NoopNotifier),
            monitor: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn query(mut self, query: Arc<dyn BackendQuery>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn FeedbackNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("transport is required"))?;
        let query = self
            .query
            .ok_or_else(|| anyhow::anyhow!("query is required"))?;
        let cache = self
            .cache
            .ok_or_else(|| anyhow::anyhow!("cache is required"))?;
        let monitor = self
            .monitor
            .ok_or_else(|| anyhow::anyhow!("connectivity monitor is required"))?;

        let tracker = ConnectionStateTracker::new();
        let debouncer = Arc::new(UpdateDebouncer::new(self.config.debounce_interval()));
        let pool = Arc::new(ChannelPool::new(
            transport,
            tracker.clone(),
            debouncer,
        ));
        let selector = SyncModeSelector::new(
            pool.clone(),
            query.clone(),
            cache.clone(),
            self.config.clone(),
        );
        let coordinator = ReconcileCoordinator::new(
            query,
            cache.clone(),
            self.notifier,
            monitor,
        );

        info!("Sync engine assembled");
        Ok(SyncEngine {
            tracker,
            pool,
            selector,
            coordinator,
            cache,
            current_user: Mutex::new(None),
        })
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_ENGINE: OnceLock<Arc<SyncEngine>> = OnceLock::new();

/// Install the process-wide engine instance; returns false if one is
/// already installed
pub fn set_global(engine: Arc<SyncEngine>) -> bool {
    GLOBAL_ENGINE.set(engine).is_ok()
}

/// The process-wide engine instance, if one was installed
pub fn global() -> Option<Arc<SyncEngine>> {
    GLOBAL_ENGINE.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{MemoryCache, StaticConnectivity};

    mod mocks {
        use super::*;
        use crate::error::TransportError;
        use crate::external::{ChannelFilter, TransportChannel};
        use crate::models::ClaimRecord;
        use async_trait::async_trait;

        pub struct IdleTransport;

        #[async_trait]
        impl RealtimeTransport for IdleTransport {
            async fn open_channel(
                &self,
                _filter: &ChannelFilter,
            ) -> std::result::Result<TransportChannel, TransportError> {
                let (tx, rx) = tokio::sync::mpsc::channel(8);
                Ok(TransportChannel {
                    events: rx,
                    guard: Box::new(tx),
                })
            }
        }

        pub struct EmptyQuery;

        #[async_trait]
        impl BackendQuery for EmptyQuery {
            async fn fetch_claim(&self, _id: &str) -> Result<Option<ClaimRecord>> {
                Ok(None)
            }

            async fn fetch_user_claims(&self, _user_id: &str) -> Result<Vec<ClaimRecord>> {
                Ok(vec![])
            }
        }
    }

    fn test_engine() -> SyncEngine {
        SyncEngine::builder()
            .transport(Arc::new(mocks::IdleTransport))
            .query(Arc::new(mocks::EmptyQuery))
            .cache(Arc::new(MemoryCache::new()))
            .connectivity(Arc::new(StaticConnectivity::new(true)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_missing_parts() {
        let result = SyncEngine::builder()
            .cache(Arc::new(MemoryCache::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_manual_sync_before_initialize_fails_softly() {
        let engine = test_engine();
        let result = engine.manual_sync().await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("sync engine not initialized"));
    }

    #[tokio::test]
    async fn test_initialize_then_manual_sync() {
        let engine = test_engine();
        engine.initialize_sync("u1").await.unwrap();

        let result = engine.manual_sync().await;
        assert!(result.success);
        assert_eq!(result.claims_synced, 0);
    }

    #[tokio::test]
    async fn test_sync_mode_for_untracked_claim() {
        let engine = test_engine();
        assert_eq!(engine.sync_mode("missing").await, None);
    }

    #[tokio::test]
    async fn test_cleanup_without_initialize_is_safe() {
        let engine = test_engine();
        engine.cleanup();
        engine.cleanup();
    }

    #[tokio::test]
    async fn test_initial_connection_state() {
        let engine = test_engine();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    }
}
