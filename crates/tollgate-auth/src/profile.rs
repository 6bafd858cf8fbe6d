//! Read-through profile cache

use crate::{
    keys,
    principal::Role,
    traits::ProfileLookup,
    utils::mask_identifier,
    AuthError, AuthResult,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate_store::SessionStore;
use tracing::debug;

/// Hook notified on every cache lookup
pub trait CacheObserver: Send + Sync {
    fn on_hit(&self, role: Role, principal_id: &str);
    fn on_miss(&self, role: Role, principal_id: &str);
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Profile projections cached per role and principal
pub struct ProfileCache {
    store: SessionStore,
    lookup: Arc<dyn ProfileLookup>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ProfileCache {
    pub fn new(store: SessionStore, lookup: Arc<dyn ProfileLookup>, ttl: Duration) -> Self {
        Self {
            store,
            lookup,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a profile, loading and caching it on a miss.
    ///
    /// A store outage reads as a miss and a failed write-back is ignored.
    pub async fn get(&self, role: Role, principal_id: &str) -> AuthResult<serde_json::Value> {
        let key = keys::profile(role, principal_id);

        let cached = self
            .store
            .with_fallback("profile.read", None, self.store.get_json::<serde_json::Value>(&key))
            .await;
        if let Some(profile) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            if let Some(observer) = &self.observer {
                observer.on_hit(role, principal_id);
            }
            return Ok(profile);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(observer) = &self.observer {
            observer.on_miss(role, principal_id);
        }
        debug!(principal = %mask_identifier(principal_id), %role, "profile cache miss");

        let profile = self
            .lookup
            .load_profile(role, principal_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.store
            .with_fallback("profile.write", (), self.store.set_json(&key, &profile, Some(self.ttl)))
            .await;

        Ok(profile)
    }

    /// Drop a cached profile; returns whether an entry was removed
    pub async fn invalidate(&self, role: Role, principal_id: &str) -> bool {
        let key = keys::profile(role, principal_id);
        self.store
            .with_fallback("profile.invalidate", false, self.store.delete(&key))
            .await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
