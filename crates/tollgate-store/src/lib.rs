//! # tollgate-store
//!
//! Ephemeral session store adapter for tollgate.
//!
//! ## Features
//!
//! - **Pluggable backends**: in-memory and Redis
//! - **Atomic batches**: multi-key command groups executed as one unit
//! - **TTL support**: every write may carry an expiry, driven by an injectable clock
//! - **Fail-soft access**: `with_fallback` turns backend outages into degraded answers
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate_store::{Batch, MemoryBackend, SessionStore};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = SessionStore::new(MemoryBackend::default());
//!
//! store.set("greeting", "hello", Some(Duration::from_secs(60))).await.unwrap();
//! assert_eq!(store.get("greeting").await.unwrap(), Some("hello".to_string()));
//!
//! let replies = store
//!     .exec(Batch::new().delete("greeting").exists("greeting"))
//!     .await
//!     .unwrap();
//! assert_eq!(replies[0].as_int().unwrap(), 1);
//!
//! // A failed lookup degrades to the fallback instead of propagating
//! let hits = store.with_fallback("count", 0, async { store.increment("hits").await }).await;
//! assert_eq!(hits, 1);
//! # });
//! ```

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod backends;
pub mod clock;
pub mod command;
pub mod config;

pub use backends::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Batch, StoreCommand, StoreReply};
pub use config::*;

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Store configuration error: {0}")]
    Configuration(String),

    #[error("Timeout error")]
    Timeout,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Backend contract every ephemeral store implementation fulfils
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Execute a single command
    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply>;

    /// Execute a batch atomically: either every command applies with no
    /// interleaving from other clients, or the batch fails as a whole.
    async fn execute_batch(&self, batch: Batch) -> StoreResult<Vec<StoreReply>>;

    /// Backend name for logs
    fn backend_name(&self) -> &str;
}

#[async_trait]
impl<B: SessionBackend + ?Sized> SessionBackend for Arc<B> {
    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply> {
        (**self).execute(command).await
    }

    async fn execute_batch(&self, batch: Batch) -> StoreResult<Vec<StoreReply>> {
        (**self).execute_batch(batch).await
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}

/// High-level store interface shared by every session component
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    fallbacks: Arc<AtomicU64>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.backend.backend_name())
            .field("fallbacks", &self.fallback_count())
            .finish()
    }
}

impl SessionStore {
    /// Create a store over the given backend
    pub fn new<B: SessionBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Create a store over a shared backend
    pub fn from_arc(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            fallbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.backend
            .execute(StoreCommand::Get(key.to_string()))
            .await?
            .into_text()
    }

    /// Get a JSON-encoded value
    pub async fn get_json<T>(&self, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.backend
            .execute(StoreCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            })
            .await?;
        Ok(())
    }

    /// Store a JSON-encoded value
    pub async fn set_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> StoreResult<()>
    where
        T: Serialize,
    {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.backend
            .execute(StoreCommand::Delete(key.to_string()))
            .await?
            .is_truthy()
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.backend
            .execute(StoreCommand::Exists(key.to_string()))
            .await?
            .is_truthy()
    }

    pub async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.backend
            .execute(StoreCommand::Increment(key.to_string()))
            .await?
            .as_int()
    }

    /// Remaining time to live, `None` when the key is missing or never expires
    pub async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let seconds = self
            .backend
            .execute(StoreCommand::Ttl(key.to_string()))
            .await?
            .as_int()?;
        Ok(ttl_from_seconds(seconds))
    }

    pub async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.backend
            .execute(StoreCommand::SetAdd {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?
            .is_truthy()
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.backend
            .execute(StoreCommand::SetRemove {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?
            .is_truthy()
    }

    pub async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.backend
            .execute(StoreCommand::SetMembers(key.to_string()))
            .await?
            .into_members()
    }

    /// Execute a batch atomically, returning one reply per command
    pub async fn exec(&self, batch: Batch) -> StoreResult<Vec<StoreReply>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let expected = batch.len();
        let replies = self.backend.execute_batch(batch).await?;
        if replies.len() != expected {
            return Err(StoreError::UnexpectedReply(format!(
                "batch of {} commands produced {} replies",
                expected,
                replies.len()
            )));
        }
        Ok(replies)
    }

    /// Run a store operation, degrading to `fallback` when the backend fails.
    ///
    /// The error is logged and counted but never propagated.
    pub async fn with_fallback<T, Fut>(&self, operation: &str, fallback: T, future: Fut) -> T
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        match future.await {
            Ok(value) => value,
            Err(err) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    operation,
                    backend = self.backend.backend_name(),
                    error = %err,
                    "session store unavailable, using fallback"
                );
                fallback
            }
        }
    }

    /// Number of operations answered by a fallback since creation
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

/// Convert a Redis-style TTL reply into a duration
pub fn ttl_from_seconds(seconds: i64) -> Option<Duration> {
    if seconds < 0 {
        None
    } else {
        Some(Duration::from_secs(seconds as u64))
    }
}
