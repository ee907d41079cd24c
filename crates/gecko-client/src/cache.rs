//! Request-coalescing TTL cache.
//!
//! At most one loader runs per key at a time. The first caller to miss
//! becomes the leader and runs the loader; everyone else who misses while
//! the leader is busy waits for it and then reads whatever it stored.

use analysis_core::AnalysisError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

pub struct CoalescingCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    in_flight: DashMap<String, watch::Receiver<bool>>,
}

enum Role {
    Leader(watch::Sender<bool>),
    Follower(watch::Receiver<bool>),
}

/// Removes the in-flight ticket and wakes followers however the leader exits,
/// including when its future is dropped mid-fetch.
struct LeaderGuard<'a, V> {
    cache: &'a CoalescingCache<V>,
    key: &'a str,
    done: watch::Sender<bool>,
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        self.cache.in_flight.remove(self.key);
        self.done.send_replace(true);
    }
}

impl<V> Default for CoalescingCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CoalescingCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl<V: Clone> CoalescingCache<V> {
    /// Live value for `key`, evicting it if it has expired.
    pub fn get_fresh(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    pub fn insert(&self, key: &str, value: V, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Return the cached value for `key` or load it, sharing one load across
    /// concurrent callers.
    ///
    /// A follower released by a failed leader gets [`AnalysisError::LostRace`];
    /// retrying is the caller's business.
    pub async fn fetch<F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<V, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AnalysisError>>,
    {
        if let Some(value) = self.get_fresh(key) {
            return Ok(value);
        }

        let role = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(ticket) => Role::Follower(ticket.get().clone()),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Follower(mut done) => {
                // Err means the sender is gone, which only happens after release.
                let _ = done.wait_for(|finished| *finished).await;
                self.get_fresh(key)
                    .ok_or_else(|| AnalysisError::LostRace(key.to_string()))
            }
            Role::Leader(done) => {
                let _guard = LeaderGuard {
                    cache: self,
                    key,
                    done,
                };

                // A previous leader may have stored a value between our miss and our ticket.
                if let Some(value) = self.get_fresh(key) {
                    return Ok(value);
                }

                let value = loader().await?;
                self.insert(key, value.clone(), ttl);
                Ok(value)
            }
        }
    }
}
