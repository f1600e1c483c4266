//! Bounded-staleness cache over the secondary backend's full listing.
//!
//! One snapshot, replaced wholesale. The snapshot lock is held across the
//! refresh call, so concurrent callers hitting an expired snapshot queue
//! behind a single upstream listing instead of each issuing their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::api::{SecondaryApi, SecondaryServer};
use crate::error::ApiError;

struct Snapshot {
    by_id: HashMap<i64, SecondaryServer>,
    list: Vec<SecondaryServer>,
    refreshed_at: Instant,
    /// Invalidation epoch this snapshot was fetched under.
    epoch: u64,
}

/// TTL-bounded read-through cache for the secondary server listing.
pub struct SecondaryCache {
    api: Arc<dyn SecondaryApi>,
    ttl: Duration,
    /// Bumped by [`SecondaryCache::invalidate`]; a snapshot from an older
    /// epoch is refreshed on the next access regardless of age.
    epoch: AtomicU64,
    snapshot: Mutex<Option<Snapshot>>,
}

impl SecondaryCache {
    pub fn new(api: Arc<dyn SecondaryApi>, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            epoch: AtomicU64::new(0),
            snapshot: Mutex::new(None),
        }
    }

    /// Look up one server by id in the freshest snapshot. `Ok(None)` means
    /// the id is absent from the most recent successful listing.
    pub async fn get(&self, id: i64) -> Result<Option<SecondaryServer>, ApiError> {
        let mut slot = self.snapshot.lock().await;
        self.refresh_if_due(&mut slot).await?;
        Ok(slot.as_ref().and_then(|s| s.by_id.get(&id).cloned()))
    }

    /// The freshest full listing, in upstream order.
    pub async fn list(&self) -> Result<Vec<SecondaryServer>, ApiError> {
        let mut slot = self.snapshot.lock().await;
        self.refresh_if_due(&mut slot).await?;
        Ok(slot.as_ref().map(|s| s.list.clone()).unwrap_or_default())
    }

    /// Drop the snapshot's validity without blocking. The next access
    /// refreshes before serving anything, so entries fetched under stale
    /// credentials are never reused.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    async fn refresh_if_due(&self, slot: &mut Option<Snapshot>) -> Result<(), ApiError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let due = match slot.as_ref() {
            None => true,
            Some(snapshot) => snapshot.epoch != epoch || snapshot.refreshed_at.elapsed() >= self.ttl,
        };
        if !due {
            return Ok(());
        }

        // A failed listing leaves the previous snapshot in place; the error
        // goes to the caller that triggered the refresh and the next access
        // retries.
        let list = self.api.list_servers().await?;
        let by_id = list.iter().map(|s| (s.id, s.clone())).collect();
        *slot = Some(Snapshot {
            by_id,
            list,
            refreshed_at: Instant::now(),
            epoch,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    fn server(id: i64, name: &str) -> SecondaryServer {
        SecondaryServer {
            id,
            name: name.to_string(),
            ipv4: "123.123.123.12".to_string(),
            ipv6_network: "2a01:f48:111:4221::".to_string(),
            product: "AX41".to_string(),
            dc: "FSN1-DC14".to_string(),
        }
    }

    #[derive(Default)]
    struct FakeSecondary {
        calls: AtomicUsize,
        servers: SyncMutex<Vec<SecondaryServer>>,
        fail: SyncMutex<bool>,
    }

    impl FakeSecondary {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SecondaryApi for FakeSecondary {
        async fn list_servers(&self) -> Result<Vec<SecondaryServer>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock() {
                return Err(ApiError::transport("secondary/list-servers", "down"));
            }
            Ok(self.servers.lock().clone())
        }
    }

    #[tokio::test]
    async fn test_second_access_within_ttl_is_served_from_cache() {
        let api = Arc::new(FakeSecondary::default());
        api.servers.lock().push(server(321, "bm-server1"));
        let cache = SecondaryCache::new(api.clone(), Duration::from_secs(300));

        assert_eq!(cache.get(321).await.unwrap().unwrap().name, "bm-server1");
        assert_eq!(api.calls(), 1);

        assert!(cache.get(321).await.unwrap().is_some());
        assert_eq!(cache.list().await.unwrap().len(), 1);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_snapshot_triggers_exactly_one_refresh() {
        let api = Arc::new(FakeSecondary::default());
        api.servers.lock().push(server(321, "bm-server1"));
        let cache = SecondaryCache::new(api.clone(), Duration::from_millis(20));

        cache.list().await.unwrap();
        assert_eq!(api.calls(), 1);

        std::thread::sleep(Duration::from_millis(30));
        cache.list().await.unwrap();
        cache.get(321).await.unwrap();
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_absent_id_is_not_found_after_replacement() {
        let api = Arc::new(FakeSecondary::default());
        api.servers.lock().push(server(321, "bm-server1"));
        let cache = SecondaryCache::new(api.clone(), Duration::from_secs(300));

        assert!(cache.get(321).await.unwrap().is_some());

        // The server disappears upstream; after invalidation the fresh
        // listing no longer contains it.
        api.servers.lock().clear();
        cache.invalidate();
        assert!(cache.get(321).await.unwrap().is_none());
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot_and_reports_error() {
        let api = Arc::new(FakeSecondary::default());
        api.servers.lock().push(server(321, "bm-server1"));
        let cache = SecondaryCache::new(api.clone(), Duration::from_secs(300));

        cache.list().await.unwrap();

        *api.fail.lock() = true;
        cache.invalidate();
        assert!(cache.get(321).await.is_err());

        // Recovery: the next access retries the refresh.
        *api.fail.lock() = false;
        assert!(cache.get(321).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh_before_next_answer() {
        let api = Arc::new(FakeSecondary::default());
        let cache = SecondaryCache::new(api.clone(), Duration::from_secs(300));

        cache.list().await.unwrap();
        assert_eq!(api.calls(), 1);

        cache.invalidate();
        cache.list().await.unwrap();
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let api = Arc::new(FakeSecondary::default());
        api.servers.lock().push(server(321, "bm-server1"));
        let cache = Arc::new(SecondaryCache::new(api.clone(), Duration::from_secs(300)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(321).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }
        assert_eq!(api.calls(), 1);
    }
}
