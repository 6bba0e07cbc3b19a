//! Shared Market Cache
//!
//! The single shared mutable resource of the mirror. It stores two kinds
//! of state with two different access patterns:
//!
//! - **Per-key REST entries**: last successful fetch result per endpoint
//!   key. Last write wins, no history, no freshness signaling; the
//!   polling interval is the freshness bound. Writers on different keys
//!   never block each other (sharded map).
//! - **The frame slot**: the single most recent upstream stream message,
//!   stamped with a strictly increasing version. Relay sessions use the
//!   version to detect whether a new frame arrived since their last look,
//!   and a notify hook to wait for the next publish without spinning.
//!
//! Producers (REST poller, stream ingestor) and consumers (read facade,
//! relay sessions) share one `Arc<MarketCache>` and never communicate
//! directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

// =============================================================================
// Stored Types
// =============================================================================

/// Last successful fetch result for one REST mirror key.
///
/// Absence of an entry (never fetched, or every fetch failed) is a valid
/// state distinct from an entry with an empty body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response body, bit-for-bit as fetched.
    pub body: Arc<[u8]>,
    /// Content type the upstream served the body with.
    pub content_type: String,
    /// When the fetch succeeded.
    pub fetched_at: DateTime<Utc>,
}

/// The single most recent message from the upstream stream.
///
/// A frame is never mutated after publication, only replaced wholesale.
/// No two frames share a version.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Verbatim text of one complete upstream message.
    pub payload: Arc<str>,
    /// Monotonically increasing publish counter, starting at 1.
    pub version: u64,
    /// When the frame was published.
    pub received_at: DateTime<Utc>,
}

/// Snapshot of cache occupancy for the ops surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of REST keys with a cached entry.
    pub rest_entries: usize,
    /// Version of the current frame (0 = nothing published yet).
    pub frame_version: u64,
}

// =============================================================================
// Market Cache
// =============================================================================

/// Shared cache decoupling upstream producers from downstream readers.
///
/// # Example
///
/// ```rust
/// use binance_mirror::domain::cache::MarketCache;
///
/// let cache = MarketCache::new();
/// cache.put("usPing", b"{}".to_vec(), "application/json".to_string());
/// assert!(cache.get("usPing").is_some());
///
/// let v1 = cache.publish_frame("{\"e\":\"trade\"}");
/// assert_eq!(v1, 1);
/// ```
#[derive(Debug, Default)]
pub struct MarketCache {
    entries: DashMap<String, CacheEntry>,
    frame: parking_lot::RwLock<Option<StreamFrame>>,
    frame_version: AtomicU64,
    frame_notify: Notify,
}

impl MarketCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `key` unconditionally.
    ///
    /// Concurrent writers on different keys never block each other; for
    /// the same key the last write wins regardless of writer identity.
    pub fn put(&self, key: &str, body: Vec<u8>, content_type: String) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                body: Arc::from(body),
                content_type,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Non-blocking read of the entry for `key`.
    ///
    /// Returns `None` if no successful write has ever occurred for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Atomically store a new frame and wake all waiting sessions.
    ///
    /// The new frame's version is the previous version plus one (starting
    /// at 1). Version assignment and the store happen under the slot's
    /// exclusive guard, so `read_frame` sees either the old frame or the
    /// complete new one, never a torn state. Returns the assigned version.
    pub fn publish_frame(&self, payload: impl Into<Arc<str>>) -> u64 {
        let mut slot = self.frame.write();
        let version = slot.as_ref().map_or(0, |frame| frame.version) + 1;
        *slot = Some(StreamFrame {
            payload: payload.into(),
            version,
            received_at: Utc::now(),
        });
        self.frame_version.store(version, Ordering::Release);
        drop(slot);

        self.frame_notify.notify_waiters();
        version
    }

    /// Non-blocking read of the current frame.
    ///
    /// Returns `None` until the first frame is published.
    #[must_use]
    pub fn read_frame(&self) -> Option<StreamFrame> {
        self.frame.read().clone()
    }

    /// Cheap peek at the current frame version (0 = no frame yet).
    ///
    /// Lets a session detect a change without cloning the frame.
    #[must_use]
    pub fn frame_version(&self) -> u64 {
        self.frame_version.load(Ordering::Acquire)
    }

    /// Await-able hook that resolves when a new frame is published.
    ///
    /// A waiter must re-check [`Self::frame_version`] after waking: the
    /// notification carries no payload, and a publish that lands between
    /// the version check and the wait is only caught by bounding the wait.
    #[must_use]
    pub fn frame_changed(&self) -> Notified<'_> {
        self.frame_notify.notified()
    }

    /// Snapshot of cache occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            rest_entries: self.entries.len(),
            frame_version: self.frame_version(),
        }
    }
}

/// Shared cache reference.
pub type SharedMarketCache = Arc<MarketCache>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const JSON: &str = "application/json";

    #[test]
    fn get_absent_key_returns_none() {
        let cache = MarketCache::new();
        assert!(cache.get("usTicker").is_none());
    }

    #[test]
    fn last_put_wins() {
        let cache = MarketCache::new();
        cache.put("usTicker", b"first".to_vec(), JSON.to_string());
        cache.put("usTicker", b"second".to_vec(), JSON.to_string());
        cache.put("usTicker", b"third".to_vec(), JSON.to_string());

        let entry = cache.get("usTicker").unwrap();
        assert_eq!(&*entry.body, b"third");
    }

    #[test]
    fn empty_body_is_distinct_from_absent() {
        let cache = MarketCache::new();
        cache.put("usPing", Vec::new(), JSON.to_string());

        let entry = cache.get("usPing").unwrap();
        assert!(entry.body.is_empty());
        assert!(cache.get("usTime").is_none());
    }

    #[test]
    fn keys_are_independent() {
        let cache = MarketCache::new();
        cache.put("a", b"1".to_vec(), JSON.to_string());
        cache.put("b", b"2".to_vec(), JSON.to_string());

        assert_eq!(&*cache.get("a").unwrap().body, b"1");
        assert_eq!(&*cache.get("b").unwrap().body, b"2");
    }

    #[test]
    fn frame_absent_until_first_publish() {
        let cache = MarketCache::new();
        assert!(cache.read_frame().is_none());
        assert_eq!(cache.frame_version(), 0);
    }

    #[test]
    fn frame_versions_strictly_increase_without_gaps() {
        let cache = MarketCache::new();
        for expected in 1..=100u64 {
            let version = cache.publish_frame(format!("frame-{expected}"));
            assert_eq!(version, expected);
            assert_eq!(cache.frame_version(), expected);
        }
        let frame = cache.read_frame().unwrap();
        assert_eq!(frame.version, 100);
        assert_eq!(&*frame.payload, "frame-100");
    }

    #[test]
    fn publish_replaces_frame_wholesale() {
        let cache = MarketCache::new();
        cache.publish_frame("A");
        let first = cache.read_frame().unwrap();
        cache.publish_frame("B");
        let second = cache.read_frame().unwrap();

        // The frame handed out earlier is untouched by later publishes.
        assert_eq!(&*first.payload, "A");
        assert_eq!(first.version, 1);
        assert_eq!(&*second.payload, "B");
        assert_eq!(second.version, 2);
    }

    #[test]
    fn stats_reflect_entries_and_version() {
        let cache = MarketCache::new();
        cache.put("a", b"1".to_vec(), JSON.to_string());
        cache.put("b", b"2".to_vec(), JSON.to_string());
        cache.publish_frame("x");

        let stats = cache.stats();
        assert_eq!(stats.rest_entries, 2);
        assert_eq!(stats.frame_version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_on_distinct_keys() {
        let cache = Arc::new(MarketCache::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = format!("key-{i}");
                for n in 0..100u32 {
                    cache.put(&key, n.to_be_bytes().to_vec(), JSON.to_string());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            let entry = cache.get(&format!("key-{i}")).unwrap();
            assert_eq!(&*entry.body, 99u32.to_be_bytes().as_slice());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_never_repeat_a_version() {
        let cache = Arc::new(MarketCache::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                (0..250).map(|_| cache.publish_frame("x")).collect::<Vec<_>>()
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.extend(handle.await.unwrap());
        }
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), 1000);
        assert_eq!(cache.frame_version(), 1000);
    }

    #[tokio::test]
    async fn publish_wakes_a_waiting_observer() {
        let cache = Arc::new(MarketCache::new());

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let changed = cache.frame_changed();
                changed.await;
                cache.frame_version()
            })
        };

        // Let the waiter register before publishing.
        tokio::task::yield_now().await;
        cache.publish_frame("wake");

        let observed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed, 1);
    }
}
