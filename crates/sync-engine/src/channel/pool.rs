//! Shared channel pool
//!
//! Owns every transport channel in the process, keyed by resource
//! identity. Consumers attach to an existing channel when one is live for
//! their key; the transport connection is opened once and torn down when
//! the last consumer detaches, in the same call.

use super::connection::{ConnectionState, ConnectionStateTracker};
use super::debounce::UpdateDebouncer;
use crate::error::TransportError;
use crate::external::{ChannelEvent, ChannelFilter, ChannelHandle, RealtimeTransport};
use crate::models::ClaimRecord;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Update callback attached through the pool
pub type PoolUpdateCallback = Arc<dyn Fn(ClaimRecord) + Send + Sync>;
/// Error callback attached through the pool
pub type PoolErrorCallback = Arc<dyn Fn(TransportError) + Send + Sync>;

struct PoolSubscriber {
    on_update: PoolUpdateCallback,
    on_status: PoolErrorCallback,
}

/// One pooled transport channel and its attached subscriptions
///
/// The reference count is the size of the subscriber map, never a
/// separately maintained counter.
struct SharedChannel {
    subscribers: Arc<StdMutex<HashMap<u64, PoolSubscriber>>>,
    dispatch: JoinHandle<()>,
    _guard: Box<dyn ChannelHandle>,
}

/// Proof of one acquisition; passed back to [`ChannelPool::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTicket {
    pub subscription_id: u64,
}

/// Pool diagnostics snapshot
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Live transport channels
    pub channels: usize,
    /// Attached subscriptions across all channels
    pub subscriptions: usize,
}

/// Reference-counted pool of shared transport channels
pub struct ChannelPool {
    transport: Arc<dyn RealtimeTransport>,
    tracker: Arc<ConnectionStateTracker>,
    debouncer: Arc<UpdateDebouncer>,
    /// Held across channel acquisition: concurrent acquires for one key
    /// must never open two transport channels
    channels: Mutex<HashMap<String, SharedChannel>>,
    /// subscription id -> channel key
    subscription_index: DashMap<u64, String>,
    next_subscription_id: AtomicU64,
}

impl ChannelPool {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        tracker: Arc<ConnectionStateTracker>,
        debouncer: Arc<UpdateDebouncer>,
    ) -> Self {
        Self {
            transport,
            tracker,
            debouncer,
            channels: Mutex::new(HashMap::new()),
            subscription_index: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Attach to the channel for `channel_key`, opening it if absent
    pub async fn acquire(
        &self,
        channel_key: &str,
        filter: &ChannelFilter,
        on_update: PoolUpdateCallback,
        on_status: PoolErrorCallback,
    ) -> Result<PoolTicket, TransportError> {
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = PoolSubscriber {
            on_update,
            on_status,
        };

        let mut channels = self.channels.lock().await;

        if let Some(channel) = channels.get(channel_key) {
            let mut subscribers = channel.subscribers.lock().unwrap();
            subscribers.insert(subscription_id, subscriber);
            debug!(
                channel = %channel_key,
                subscription_id,
                ref_count = subscribers.len(),
                "Joined existing channel"
            );
        } else {
            match self.tracker.state() {
                ConnectionState::Disconnected => {
                    self.tracker.set_state(ConnectionState::Connecting)
                }
                ConnectionState::Failed => {
                    self.tracker.set_state(ConnectionState::Reconnecting)
                }
                _ => {}
            }

            let transport_channel = match self.transport.open_channel(filter).await {
                Ok(channel) => channel,
                Err(e) => {
                    self.tracker.set_state(ConnectionState::Failed);
                    warn!(channel = %channel_key, error = %e, "Failed to open channel");
                    return Err(e);
                }
            };

            let subscribers = Arc::new(StdMutex::new(HashMap::new()));
            subscribers
                .lock()
                .unwrap()
                .insert(subscription_id, subscriber);

            let dispatch = tokio::spawn(dispatch_loop(
                channel_key.to_string(),
                transport_channel.events,
                subscribers.clone(),
                self.debouncer.clone(),
                self.tracker.clone(),
            ));

            channels.insert(
                channel_key.to_string(),
                SharedChannel {
                    subscribers,
                    dispatch,
                    _guard: transport_channel.guard,
                },
            );
            info!(channel = %channel_key, subscription_id, "Opened channel");
        }

        self.subscription_index
            .insert(subscription_id, channel_key.to_string());

        Ok(PoolTicket { subscription_id })
    }

    /// Detach a subscription; tears the channel down when it was the last
    pub async fn release(&self, ticket: PoolTicket) {
        let Some((_, channel_key)) = self.subscription_index.remove(&ticket.subscription_id)
        else {
            return;
        };

        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get(&channel_key) else {
            return;
        };

        let remaining = {
            let mut subscribers = channel.subscribers.lock().unwrap();
            subscribers.remove(&ticket.subscription_id);
            subscribers.len()
        };

        if remaining == 0 {
            // Same-call teardown: no dangling channels
            let channel = channels
                .remove(&channel_key)
                .expect("channel present under pool lock");
            channel.dispatch.abort();
            info!(channel = %channel_key, "Channel torn down");

            if channels.is_empty() {
                self.tracker.set_state(ConnectionState::Disconnected);
            }
        } else {
            debug!(
                channel = %channel_key,
                subscription_id = ticket.subscription_id,
                ref_count = remaining,
                "Detached from channel"
            );
        }
    }

    /// Whether a channel is currently pooled for `channel_key`
    pub async fn contains(&self, channel_key: &str) -> bool {
        self.channels.lock().await.contains_key(channel_key)
    }

    /// Reference count of the channel for `channel_key`, if pooled
    pub async fn ref_count(&self, channel_key: &str) -> Option<usize> {
        let channels = self.channels.lock().await;
        channels
            .get(channel_key)
            .map(|c| c.subscribers.lock().unwrap().len())
    }

    /// Diagnostics snapshot
    pub async fn stats(&self) -> PoolStats {
        let channels = self.channels.lock().await;
        let subscriptions = channels
            .values()
            .map(|c| c.subscribers.lock().unwrap().len())
            .sum();

        PoolStats {
            channels: channels.len(),
            subscriptions,
        }
    }
}

/// Drains one channel's event stream and fans out to attached subscribers
///
/// Updates are gated per record id through the debouncer; one channel may
/// multiplex updates for many records. Status events pass through the
/// connection tracker, which decides whether an error is forwarded.
async fn dispatch_loop(
    channel_key: String,
    mut events: mpsc::Receiver<ChannelEvent>,
    subscribers: Arc<StdMutex<HashMap<u64, PoolSubscriber>>>,
    debouncer: Arc<UpdateDebouncer>,
    tracker: Arc<ConnectionStateTracker>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Update(record) => {
                if !debouncer.should_process(&record.id) {
                    continue;
                }

                // Snapshot outside the lock so callbacks can release
                let callbacks: Vec<PoolUpdateCallback> = {
                    let subscribers = subscribers.lock().unwrap();
                    subscribers.values().map(|s| s.on_update.clone()).collect()
                };

                for callback in callbacks {
                    callback(record.clone());
                }
            }
            ChannelEvent::Status { status, error } => {
                if let Some(error) = tracker.apply_status(&channel_key, status, error) {
                    let callbacks: Vec<PoolErrorCallback> = {
                        let subscribers = subscribers.lock().unwrap();
                        subscribers.values().map(|s| s.on_status.clone()).collect()
                    };

                    for callback in callbacks {
                        callback(error.clone());
                    }
                }
            }
        }
    }

    debug!(channel = %channel_key, "Channel event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ChannelStatus, TransportChannel};
    use crate::models::ClaimStatus;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Transport that records opens and exposes event senders per filter
    struct MockTransport {
        opened: AtomicUsize,
        senders: StdMutex<Vec<mpsc::Sender<ChannelEvent>>>,
        fail_with: StdMutex<Option<TransportError>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                opened: AtomicUsize::new(0),
                senders: StdMutex::new(Vec::new()),
                fail_with: StdMutex::new(None),
            }
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        async fn emit(&self, event: ChannelEvent) {
            let sender = self.senders.lock().unwrap()[0].clone();
            sender.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl RealtimeTransport for MockTransport {
        async fn open_channel(
            &self,
            _filter: &ChannelFilter,
        ) -> Result<TransportChannel, TransportError> {
            if let Some(error) = self.fail_with.lock().unwrap().clone() {
                return Err(error);
            }

            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            self.senders.lock().unwrap().push(tx);

            Ok(TransportChannel {
                events: rx,
                guard: Box::new(()),
            })
        }
    }

    fn test_pool(transport: Arc<MockTransport>) -> ChannelPool {
        ChannelPool::new(
            transport,
            ConnectionStateTracker::new(),
            Arc::new(UpdateDebouncer::new(Duration::from_millis(100))),
        )
    }

    fn claim_record(id: &str) -> ClaimRecord {
        ClaimRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            offer_id: "o1".to_string(),
            status: ClaimStatus::Active,
            token: "tok".to_string(),
            rejection_reason: None,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            last_synced_at: None,
        }
    }

    fn noop_callbacks() -> (PoolUpdateCallback, PoolErrorCallback) {
        (Arc::new(|_| {}), Arc::new(|_| {}))
    }

    fn filter() -> ChannelFilter {
        ChannelFilter::Claim {
            id: "c1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_channel() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let mut tickets = Vec::new();
        for _ in 0..5 {
            let (on_update, on_status) = noop_callbacks();
            tickets.push(
                pool.acquire("claim:c1", &filter(), on_update, on_status)
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(transport.opened(), 1);
        assert_eq!(pool.ref_count("claim:c1").await, Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_single_flight() {
        let transport = Arc::new(MockTransport::new());
        let pool = Arc::new(test_pool(transport.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let (on_update, on_status) = noop_callbacks();
                pool.acquire("claim:c1", &filter(), on_update, on_status)
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(transport.opened(), 1);
        assert_eq!(pool.ref_count("claim:c1").await, Some(8));
    }

    #[tokio::test]
    async fn test_release_tears_down_on_last() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let mut tickets = Vec::new();
        for _ in 0..3 {
            let (on_update, on_status) = noop_callbacks();
            tickets.push(
                pool.acquire("claim:c1", &filter(), on_update, on_status)
                    .await
                    .unwrap(),
            );
        }

        pool.release(tickets[0]).await;
        pool.release(tickets[1]).await;
        assert!(pool.contains("claim:c1").await);
        assert_eq!(pool.ref_count("claim:c1").await, Some(1));

        pool.release(tickets[2]).await;
        assert!(!pool.contains("claim:c1").await);
        assert_eq!(pool.stats().await.channels, 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let (on_update, on_status) = noop_callbacks();
        let ticket = pool
            .acquire("claim:c1", &filter(), on_update, on_status)
            .await
            .unwrap();

        pool.release(ticket).await;
        pool.release(ticket).await;
        assert!(!pool.contains("claim:c1").await);
    }

    #[tokio::test]
    async fn test_updates_fan_out_to_all_subscribers() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let counts = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        for count in &counts {
            let count = count.clone();
            let on_update: PoolUpdateCallback = Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
            pool.acquire("claim:c1", &filter(), on_update, Arc::new(|_| {}))
                .await
                .unwrap();
        }

        transport.emit(ChannelEvent::Update(claim_record("c1"))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counts[0].load(Ordering::SeqCst), 1);
        assert_eq!(counts[1].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_is_debounced_per_record() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let on_update: PoolUpdateCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pool.acquire(
            "user-claims:u1",
            &ChannelFilter::UserClaims {
                user_id: "u1".to_string(),
            },
            on_update,
            Arc::new(|_| {}),
        )
        .await
        .unwrap();

        // Burst for c1 collapses to one delivery; c2 is keyed separately
        transport.emit(ChannelEvent::Update(claim_record("c1"))).await;
        transport.emit(ChannelEvent::Update(claim_record("c1"))).await;
        transport.emit(ChannelEvent::Update(claim_record("c2"))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_error_forwarded_to_subscribers() {
        let transport = Arc::new(MockTransport::new());
        let pool = test_pool(transport.clone());

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let on_status: PoolErrorCallback = Arc::new(move |e| {
            sink.lock().unwrap().push(e);
        });
        pool.acquire("claim:c1", &filter(), Arc::new(|_| {}), on_status)
            .await
            .unwrap();

        transport
            .emit(ChannelEvent::Status {
                status: ChannelStatus::ChannelError,
                error: Some(TransportError::AuthFailed("expired".into())),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], TransportError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let transport = Arc::new(MockTransport::new());
        *transport.fail_with.lock().unwrap() =
            Some(TransportError::SubscriptionFailed("bad filter".into()));
        let pool = test_pool(transport.clone());

        let (on_update, on_status) = noop_callbacks();
        let result = pool
            .acquire("claim:c1", &filter(), on_update, on_status)
            .await;

        assert!(result.is_err());
        assert!(!pool.contains("claim:c1").await);
    }
}
