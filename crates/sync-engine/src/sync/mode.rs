//! Per-resource sync mode selection
//!
//! Each tracked resource gets exactly one live sync record, either
//! push-delivered over a pooled channel or timer-driven polling. A
//! non-retryable channel failure moves the record to fallback polling,
//! one-way for the life of the subscription.

use crate::channel::{ChannelPool, PoolErrorCallback, PoolTicket, PoolUpdateCallback};
use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::external::{BackendQuery, ChannelFilter, LocalCache};
use crate::models::{ClaimRecord, ClaimUpdate, ResourceKey, SyncMode, UpdateSource};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback receiving claim updates for a subscription
pub type UpdateCallback = Arc<dyn Fn(ClaimUpdate) + Send + Sync>;
/// Callback receiving non-retryable transport errors
pub type ErrorCallback = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Bookkeeping for one actively tracked resource
struct SyncRecord {
    mode: SyncMode,
    /// Distinguishes this record from a later one for the same key
    generation: u64,
    /// Cleared first on any teardown; gates every callback
    active: Arc<AtomicBool>,
    ticket: Option<PoolTicket>,
    poll_task: Option<JoinHandle<()>>,
    last_poll_at: Arc<StdMutex<Option<i64>>>,
}

/// Consumer-facing handle for one subscription
///
/// Unsubscribing is idempotent and stops callback delivery immediately,
/// even while teardown of the underlying channel or timer is in flight.
pub struct Subscription {
    map_key: String,
    generation: u64,
    active: Arc<AtomicBool>,
    selector: Weak<SyncModeSelector>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn unsubscribe(&self) {
        // Stop callbacks before any async teardown; in-flight results
        // for this subscription are discarded from here on
        self.active.store(false, Ordering::SeqCst);

        if let Some(selector) = self.selector.upgrade() {
            selector.remove_record(&self.map_key, self.generation).await;
        }
    }
}

/// Chooses and runs the sync strategy per resource key
pub struct SyncModeSelector {
    pool: Arc<ChannelPool>,
    query: Arc<dyn BackendQuery>,
    cache: Arc<dyn LocalCache>,
    config: EngineConfig,
    records: Mutex<HashMap<String, SyncRecord>>,
    next_generation: AtomicU64,
    self_ref: Weak<Self>,
}

impl SyncModeSelector {
    pub fn new(
        pool: Arc<ChannelPool>,
        query: Arc<dyn BackendQuery>,
        cache: Arc<dyn LocalCache>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            pool,
            query,
            cache,
            config,
            records: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    /// Start syncing `key`, delivering updates to `on_update`
    ///
    /// A second subscribe for a key whose first subscription is still
    /// live tears the first down before establishing the second.
    pub async fn subscribe(
        &self,
        key: ResourceKey,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Result<Subscription> {
        let map_key = key.channel_key();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        let last_poll_at = Arc::new(StdMutex::new(None));

        let mut records = self.records.lock().await;

        if let Some(previous) = records.remove(&map_key) {
            debug!(resource = %map_key, "Replacing live sync record");
            self.teardown(previous).await;
        }

        let initial_mode = self.initial_mode(&key).await;
        let mut record = SyncRecord {
            mode: initial_mode,
            generation,
            active: active.clone(),
            ticket: None,
            poll_task: None,
            last_poll_at: last_poll_at.clone(),
        };

        match initial_mode {
            SyncMode::Realtime => {
                let acquired = self
                    .acquire_channel(
                        &key,
                        generation,
                        active.clone(),
                        on_update.clone(),
                        on_error.clone(),
                    )
                    .await;

                match acquired {
                    Ok(ticket) => record.ticket = Some(ticket),
                    Err(e) if self.config.fallback_enabled => {
                        warn!(
                            resource = %map_key,
                            error = %e,
                            "Channel acquisition failed, falling back to polling"
                        );
                        record.mode = SyncMode::Fallback;
                        record.poll_task = Some(self.spawn_poll_task(
                            key.clone(),
                            active.clone(),
                            on_update.clone(),
                            last_poll_at.clone(),
                        ));
                    }
                    Err(e) => {
                        on_error(e.clone());
                        return Err(e.into());
                    }
                }
            }
            SyncMode::Polling | SyncMode::Fallback => {
                record.poll_task = Some(self.spawn_poll_task(
                    key.clone(),
                    active.clone(),
                    on_update.clone(),
                    last_poll_at.clone(),
                ));
            }
        }

        info!(resource = %map_key, mode = ?record.mode, "Subscribed");
        records.insert(map_key.clone(), record);

        Ok(Subscription {
            map_key,
            generation,
            active,
            selector: self.self_ref.clone(),
        })
    }

    /// Current mode of the sync record for `key`, if one is live
    pub async fn mode_for(&self, key: &ResourceKey) -> Option<SyncMode> {
        let records = self.records.lock().await;
        records.get(&key.channel_key()).map(|r| r.mode)
    }

    /// Unix timestamp of the last polling cycle for `key`
    pub async fn last_poll_at(&self, key: &ResourceKey) -> Option<i64> {
        let records = self.records.lock().await;
        records
            .get(&key.channel_key())
            .and_then(|r| *r.last_poll_at.lock().unwrap())
    }

    /// Number of live sync records
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Remove the record for `map_key` if it still matches `generation`
    pub(crate) async fn remove_record(&self, map_key: &str, generation: u64) {
        let mut records = self.records.lock().await;
        let matches = records
            .get(map_key)
            .map(|r| r.generation == generation)
            .unwrap_or(false);

        if matches {
            let record = records.remove(map_key).expect("record present under lock");
            drop(records);
            self.teardown(record).await;
            debug!(resource = %map_key, "Sync record removed");
        }
    }

    async fn teardown(&self, record: SyncRecord) {
        record.active.store(false, Ordering::SeqCst);

        if let Some(task) = record.poll_task {
            task.abort();
        }

        if let Some(ticket) = record.ticket {
            self.pool.release(ticket).await;
        }
    }

    /// Claims created before the configured cutoff start in polling mode;
    /// cache misses and an unset cutoff default to realtime
    async fn initial_mode(&self, key: &ResourceKey) -> SyncMode {
        let Some(cutoff) = self.config.legacy_cutoff_ts else {
            return SyncMode::Realtime;
        };
        let ResourceKey::Claim(id) = key else {
            return SyncMode::Realtime;
        };

        match self.cache.get_claim(id).await {
            Ok(Some(cached)) if cached.created_at < cutoff => {
                debug!(claim_id = %id, "Legacy claim, starting in polling mode");
                SyncMode::Polling
            }
            Ok(_) => SyncMode::Realtime,
            Err(e) => {
                warn!(claim_id = %id, error = %e, "Cache read failed, defaulting to realtime");
                SyncMode::Realtime
            }
        }
    }

    async fn acquire_channel(
        &self,
        key: &ResourceKey,
        generation: u64,
        active: Arc<AtomicBool>,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Result<PoolTicket, TransportError> {
        let map_key = key.channel_key();
        let filter = match key {
            ResourceKey::Claim(id) => ChannelFilter::Claim { id: id.clone() },
            ResourceKey::UserClaims(user_id) => ChannelFilter::UserClaims {
                user_id: user_id.clone(),
            },
        };

        // A user-wide subscription outlives any single claim; only a
        // single-claim subscription tears itself down on terminal status
        let auto_teardown = matches!(key, ResourceKey::Claim(_));

        let pool_update: PoolUpdateCallback = {
            let active = active.clone();
            let on_update = on_update.clone();
            let selector = self.self_ref.clone();
            let map_key = map_key.clone();
            let grace = self.config.terminal_grace();

            Arc::new(move |record: ClaimRecord| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }

                let terminal = auto_teardown && record.status.is_terminal();
                let claim_id = record.id.clone();
                on_update(ClaimUpdate {
                    claim: record,
                    source: UpdateSource::Realtime,
                });

                if terminal {
                    // Let in-flight UI updates settle, then tear down
                    // rather than holding the channel open indefinitely
                    if let Some(selector) = selector.upgrade() {
                        let map_key = map_key.clone();
                        debug!(claim_id = %claim_id, "Terminal status, scheduling teardown");
                        tokio::spawn(async move {
                            tokio::time::sleep(grace).await;
                            selector.remove_record(&map_key, generation).await;
                        });
                    }
                }
            })
        };

        let pool_status: PoolErrorCallback = {
            let active = active.clone();
            let selector = self.self_ref.clone();
            let map_key = map_key.clone();
            let key = key.clone();
            let fallback_enabled = self.config.fallback_enabled;

            Arc::new(move |error: TransportError| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }

                if error.is_retryable() {
                    warn!(
                        resource = %map_key,
                        error = %error,
                        "Retryable channel failure, awaiting transport recovery"
                    );
                    return;
                }

                on_error(error.clone());

                if fallback_enabled {
                    if let Some(selector) = selector.upgrade() {
                        let map_key = map_key.clone();
                        let key = key.clone();
                        let on_update = on_update.clone();
                        tokio::spawn(async move {
                            selector
                                .fall_back(map_key, key, generation, on_update)
                                .await;
                        });
                    }
                }
            })
        };

        self.pool
            .acquire(&map_key, &filter, pool_update, pool_status)
            .await
    }

    /// Transition a realtime record to fallback polling; one-way
    async fn fall_back(
        &self,
        map_key: String,
        key: ResourceKey,
        generation: u64,
        on_update: UpdateCallback,
    ) {
        let ticket = {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(&map_key) else {
                return;
            };
            // Ignore stale failures from a replaced record, and never
            // leave fallback once entered
            if record.generation != generation || record.mode != SyncMode::Realtime {
                return;
            }

            record.mode = SyncMode::Fallback;
            let ticket = record.ticket.take();
            record.poll_task = Some(self.spawn_poll_task(
                key,
                record.active.clone(),
                on_update,
                record.last_poll_at.clone(),
            ));
            ticket
        };

        if let Some(ticket) = ticket {
            self.pool.release(ticket).await;
        }

        info!(resource = %map_key, "Fell back to polling");
    }

    fn spawn_poll_task(
        &self,
        key: ResourceKey,
        active: Arc<AtomicBool>,
        on_update: UpdateCallback,
        last_poll_at: Arc<StdMutex<Option<i64>>>,
    ) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let query = self.query.clone();
        let interval = self.config.poll_interval();

        tokio::spawn(async move {
            // First cycle runs immediately; the interval applies between
            // cycles
            loop {
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                poll_cycle(&key, &*cache, &*query, &on_update, &active).await;
                *last_poll_at.lock().unwrap() = Some(chrono::Utc::now().timestamp());

                tokio::time::sleep(interval).await;
            }
        })
    }
}

/// One fetch-and-diff cycle
///
/// Writes to the cache and invokes the callback only when the fetched
/// status differs from the cached one; unconditional overwrites on every
/// tick are forbidden.
async fn poll_cycle(
    key: &ResourceKey,
    cache: &dyn LocalCache,
    query: &dyn BackendQuery,
    on_update: &UpdateCallback,
    active: &AtomicBool,
) {
    let fetched = match key {
        ResourceKey::Claim(id) => match query.fetch_claim(id).await {
            Ok(claim) => claim.into_iter().collect::<Vec<_>>(),
            Err(e) => {
                warn!(claim_id = %id, error = %e, "Poll fetch failed");
                return;
            }
        },
        ResourceKey::UserClaims(user_id) => match query.fetch_user_claims(user_id).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Poll fetch failed");
                return;
            }
        },
    };

    let now = chrono::Utc::now().timestamp();
    for remote in fetched {
        if !active.load(Ordering::SeqCst) {
            return;
        }

        let cached_status = match cache.get_claim(&remote.id).await {
            Ok(cached) => cached.map(|c| c.status),
            Err(e) => {
                warn!(claim_id = %remote.id, error = %e, "Cache read failed during poll");
                continue;
            }
        };

        if cached_status == Some(remote.status) {
            continue;
        }

        let mut stamped = remote.clone();
        stamped.last_synced_at = Some(now);
        if let Err(e) = cache.update_claim(&remote.id, stamped).await {
            warn!(claim_id = %remote.id, error = %e, "Cache write failed during poll");
        }

        on_update(ClaimUpdate {
            claim: remote,
            source: UpdateSource::Polling,
        });
    }
}
