//! Per-group metadata cache with a fixed TTL.

use crate::socket::WhatsAppSocket;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct GroupMeta {
    pub name: String,
    pub fetched_at: Instant,
}

pub struct GroupMetaCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, GroupMeta>>,
}

impl GroupMetaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return cached metadata if fresh; otherwise query the socket. On
    /// success, cache the result. On failure, degrade to the group id as
    /// the display name without caching, so the next call retries.
    pub async fn get_group_meta(&self, group_id: &str, socket: &dyn WhatsAppSocket) -> GroupMeta {
        if let Some(cached) = self.fresh_entry(group_id) {
            return cached;
        }

        match socket.group_metadata(group_id).await {
            Ok(metadata) => {
                let entry = GroupMeta {
                    name: metadata.subject,
                    fetched_at: Instant::now(),
                };
                self.entries
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(group_id.to_string(), entry.clone());
                entry
            }
            Err(_) => GroupMeta {
                name: group_id.to_string(),
                fetched_at: Instant::now(),
            },
        }
    }

    fn fresh_entry(&self, group_id: &str) -> Option<GroupMeta> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = guard.get(group_id)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{GroupMetadata, OutboundMedia, PresenceType, Result, SelfId, SocketError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSocket {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WhatsAppSocket for FakeSocket {
        async fn send_message(&self, _to: &str, _text: &str) -> Result<String> {
            Ok("id".to_string())
        }
        async fn send_media(&self, _to: &str, _media: &OutboundMedia) -> Result<String> {
            Ok("id".to_string())
        }
        async fn send_presence_update(&self, _presence: PresenceType, _to: &str) -> Result<()> {
            Ok(())
        }
        async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SocketError::ConnectionFailed("down".to_string()))
            } else {
                Ok(GroupMetadata {
                    subject: format!("name-for-{}", group_id),
                })
            }
        }
        fn me(&self) -> SelfId {
            SelfId { id: "bot".to_string(), alt: None }
        }
    }

    #[tokio::test]
    async fn test_caches_hit_within_ttl() {
        let cache = GroupMetaCache::new(Duration::from_secs(300));
        let socket = FakeSocket { calls: AtomicUsize::new(0), fail: false };

        let first = cache.get_group_meta("g1", &socket).await;
        let second = cache.get_group_meta("g1", &socket).await;

        assert_eq!(first.name, "name-for-g1");
        assert_eq!(second.name, "name-for-g1");
        assert_eq!(socket.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_group_id_without_caching() {
        let cache = GroupMetaCache::new(Duration::from_secs(300));
        let socket = FakeSocket { calls: AtomicUsize::new(0), fail: true };

        let first = cache.get_group_meta("g2", &socket).await;
        assert_eq!(first.name, "g2");

        let second = cache.get_group_meta("g2", &socket).await;
        assert_eq!(second.name, "g2");
        assert_eq!(socket.calls.load(Ordering::SeqCst), 2, "failure must not be cached");
    }

    #[tokio::test]
    async fn test_stale_entry_refetches() {
        let cache = GroupMetaCache::new(Duration::from_millis(10));
        let socket = FakeSocket { calls: AtomicUsize::new(0), fail: false };

        cache.get_group_meta("g3", &socket).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.get_group_meta("g3", &socket).await;

        assert_eq!(socket.calls.load(Ordering::SeqCst), 2);
    }
}
