//! Change-feed multiplexer.
//!
//! Exactly one underlying source subscription exists per
//! (database, collection) key, however many views watch it. A per-key
//! pump task reads the feed and fans events out to every registered
//! handler channel; `Invalidate` (and feed closure) triggers a
//! transparent resubscribe and is never forwarded.
//!
//! Every delivered event is timestamped into a per-key sliding window
//! (~2 minutes) from which events/sec and events/min are derived. A
//! sweeper task prunes the windows and runs only while at least one
//! subscription is active.

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use streamsight_commons::CollectionKey;
use streamsight_source::{ChangeEvent, SourceAdapter};

/// Rolling window length for rate metrics.
const WINDOW_MS: i64 = 120_000;
/// Sweep cadence for pruning rate windows.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Derived event-rate counts for one multiplexed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub events_per_sec: usize,
    pub events_per_min: usize,
}

struct FeedHandler {
    id: u64,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Clone)]
struct FeedShare {
    handlers: Arc<RwLock<Vec<FeedHandler>>>,
    window: Arc<Mutex<VecDeque<i64>>>,
    cancel: CancellationToken,
}

impl FeedShare {
    fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            window: Arc::new(Mutex::new(VecDeque::new())),
            cancel: CancellationToken::new(),
        }
    }
}

/// Per-key feed state plus the sweeper flag, shared with the background
/// tasks through a weak handle so they never keep the multiplexer alive.
struct MuxInner {
    feeds: DashMap<CollectionKey, FeedShare>,
    sweeper_running: AtomicBool,
}

/// Shares one change-feed subscription per collection across handlers.
pub struct ChangeFeedMultiplexer {
    source: Arc<dyn SourceAdapter>,
    inner: Arc<MuxInner>,
    next_handler_id: AtomicU64,
}

impl ChangeFeedMultiplexer {
    pub fn new(source: Arc<dyn SourceAdapter>) -> Self {
        Self {
            source,
            inner: Arc::new(MuxInner {
                feeds: DashMap::new(),
                sweeper_running: AtomicBool::new(false),
            }),
            next_handler_id: AtomicU64::new(1),
        }
    }

    /// Add a handler for a key, lazily opening the underlying
    /// subscription on the first registrant. Returns the handler id used
    /// for unregistration.
    pub fn register(&self, key: &CollectionKey, sender: mpsc::UnboundedSender<ChangeEvent>) -> u64 {
        let id = self.next_handler_id.fetch_add(1, AtomicOrdering::Relaxed);

        // The handler is pushed while the map entry is held, so a
        // concurrent last-handler unregister cannot cancel the pump in
        // between.
        let entry = self.inner.feeds.entry(key.clone()).or_insert_with(|| {
            let share = FeedShare::new();
            let source = Arc::clone(&self.source);
            tokio::spawn(pump(source, key.clone(), share.clone()));
            debug!("opened change feed for {}", key);
            share
        });
        entry.handlers.write().push(FeedHandler { id, sender });
        drop(entry);

        self.ensure_sweeper();
        id
    }

    /// Remove a handler; the last removal for a key closes the
    /// underlying subscription and discards per-key state. Idempotent.
    pub fn unregister(&self, key: &CollectionKey, handler_id: u64) {
        if let Some(share) = self.inner.feeds.get(key) {
            share.handlers.write().retain(|h| h.id != handler_id);
        }
        self.inner.feeds.remove_if(key, |key, share| {
            let empty = share.handlers.read().is_empty();
            if empty {
                share.cancel.cancel();
                debug!("closed change feed for {}", key);
            }
            empty
        });
    }

    /// Event rates for one key, if it is currently multiplexed.
    pub fn feed_stats(&self, key: &CollectionKey) -> Option<FeedStats> {
        self.inner
            .feeds
            .get(key)
            .map(|share| window_stats(&share.window))
    }

    /// Event rates for every active key.
    pub fn all_stats(&self) -> Vec<(CollectionKey, FeedStats)> {
        self.inner
            .feeds
            .iter()
            .map(|entry| (entry.key().clone(), window_stats(&entry.window)))
            .collect()
    }

    /// Number of active underlying subscriptions.
    pub fn active_feeds(&self) -> usize {
        self.inner.feeds.len()
    }

    /// Number of handlers registered for a key.
    pub fn handler_count(&self, key: &CollectionKey) -> usize {
        self.inner
            .feeds
            .get(key)
            .map(|share| share.handlers.read().len())
            .unwrap_or(0)
    }

    /// Start the window sweeper if it is not running. The sweeper exits
    /// on its own once no subscription remains active.
    fn ensure_sweeper(&self) {
        if self.inner.sweeper_running.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { return };
                if inner.feeds.is_empty() {
                    inner.sweeper_running.store(false, AtomicOrdering::SeqCst);
                    return;
                }
                let cutoff = chrono::Utc::now().timestamp_millis() - WINDOW_MS;
                for entry in inner.feeds.iter() {
                    let mut window = entry.window.lock();
                    while window.front().is_some_and(|ts| *ts < cutoff) {
                        window.pop_front();
                    }
                }
            }
        });
    }
}

fn window_stats(window: &Mutex<VecDeque<i64>>) -> FeedStats {
    let now = chrono::Utc::now().timestamp_millis();
    let window = window.lock();
    FeedStats {
        events_per_sec: window.iter().filter(|ts| **ts >= now - 1_000).count(),
        events_per_min: window.iter().filter(|ts| **ts >= now - 60_000).count(),
    }
}

/// Per-key pump: reads the underlying feed and fans out to handlers.
///
/// Invalidation and feed closure resubscribe immediately and unboundedly,
/// matching the source behavior; bounded backoff is a noted hardening.
async fn pump(source: Arc<dyn SourceAdapter>, key: CollectionKey, share: FeedShare) {
    loop {
        let mut feed = tokio::select! {
            biased;
            _ = share.cancel.cancelled() => return,
            result = source.subscribe(key.database.as_str(), key.collection.as_str()) => {
                match result {
                    Ok(feed) => feed,
                    Err(e) => {
                        warn!("subscribe failed for {}; retrying: {}", key, e);
                        continue;
                    }
                }
            }
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = share.cancel.cancelled() => return,
                event = feed.next() => event,
            };

            match event {
                None => {
                    debug!("feed closed for {}; resubscribing", key);
                    break;
                }
                Some(ChangeEvent::Invalidate) => {
                    debug!("feed invalidated for {}; resubscribing", key);
                    break;
                }
                Some(event) => {
                    share
                        .window
                        .lock()
                        .push_back(chrono::Utc::now().timestamp_millis());
                    // Deliver to every currently registered handler,
                    // exactly once each. Senders are cloned out so the
                    // handler lock is not held across sends.
                    let senders: Vec<mpsc::UnboundedSender<ChangeEvent>> = share
                        .handlers
                        .read()
                        .iter()
                        .map(|h| h.sender.clone())
                        .collect();
                    for sender in senders {
                        let _ = sender.send(event.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::time::Instant;
    use streamsight_source::MemorySource;

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within deadline");
    }

    fn key() -> CollectionKey {
        CollectionKey::from_strings("test", "users")
    }

    #[tokio::test]
    async fn one_subscription_per_key() {
        let source = Arc::new(MemorySource::new());
        let mux = Arc::new(ChangeFeedMultiplexer::new(source.clone()));

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = mux.register(&key(), tx1);
        let _id2 = mux.register(&key(), tx2);

        assert_eq!(mux.active_feeds(), 1);
        assert_eq!(mux.handler_count(&key()), 2);
        eventually(|| source.subscriber_count("test", "users") == 1).await;

        source
            .insert_one("test", "users", doc! { "_id": 1 })
            .unwrap();
        assert!(matches!(rx1.recv().await, Some(ChangeEvent::Insert { .. })));
        assert!(matches!(rx2.recv().await, Some(ChangeEvent::Insert { .. })));

        // Removing one handler must not disturb the other.
        mux.unregister(&key(), id1);
        assert_eq!(mux.handler_count(&key()), 1);
        source
            .insert_one("test", "users", doc! { "_id": 2 })
            .unwrap();
        assert!(matches!(rx2.recv().await, Some(ChangeEvent::Insert { .. })));
    }

    #[tokio::test]
    async fn last_unregister_closes_subscription() {
        let source = Arc::new(MemorySource::new());
        let mux = Arc::new(ChangeFeedMultiplexer::new(source.clone()));

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = mux.register(&key(), tx);
        eventually(|| source.subscriber_count("test", "users") == 1).await;

        mux.unregister(&key(), id);
        assert_eq!(mux.active_feeds(), 0);
        eventually(|| source.subscriber_count("test", "users") == 0).await;
    }

    #[tokio::test]
    async fn invalidate_resubscribes_and_keeps_delivering() {
        let source = Arc::new(MemorySource::new());
        let mux = Arc::new(ChangeFeedMultiplexer::new(source.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        mux.register(&key(), tx);
        eventually(|| source.subscriber_count("test", "users") == 1).await;

        source.invalidate("test", "users");
        eventually(|| source.subscriber_count("test", "users") == 1).await;

        source
            .insert_one("test", "users", doc! { "_id": 1 })
            .unwrap();
        // Invalidate itself is never forwarded; the next event is the
        // insert.
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Insert { .. })));
    }

    #[tokio::test]
    async fn rate_window_counts_events() {
        let source = Arc::new(MemorySource::new());
        let mux = Arc::new(ChangeFeedMultiplexer::new(source.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        mux.register(&key(), tx);
        eventually(|| source.subscriber_count("test", "users") == 1).await;

        for i in 0..5 {
            source
                .insert_one("test", "users", doc! { "_id": i })
                .unwrap();
        }
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }

        let stats = mux.feed_stats(&key()).unwrap();
        assert_eq!(stats.events_per_min, 5);
        assert!(stats.events_per_sec <= stats.events_per_min);

        assert!(mux.feed_stats(&CollectionKey::from_strings("x", "y")).is_none());
    }
}
