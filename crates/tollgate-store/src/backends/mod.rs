//! Store backend implementations

pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::*;

#[cfg(feature = "redis-backend")]
pub use self::redis::*;

use crate::{BackendKind, Clock, SessionStore, StoreConfig, StoreError, StoreResult};
use std::sync::Arc;

/// Build a store for the configured backend
pub async fn connect(config: &StoreConfig, clock: Arc<dyn Clock>) -> StoreResult<SessionStore> {
    config.validate()?;
    match config.backend {
        BackendKind::Memory => Ok(SessionStore::new(MemoryBackend::with_clock(clock))),
        #[cfg(feature = "redis-backend")]
        BackendKind::Redis => Ok(SessionStore::new(RedisBackend::new(config.clone()).await?)),
        #[cfg(not(feature = "redis-backend"))]
        BackendKind::Redis => Err(StoreError::Configuration(
            "redis backend requested but the 'redis-backend' feature is disabled".to_string(),
        )),
    }
}
