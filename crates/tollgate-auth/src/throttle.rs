//! Failed-login throttling per login name and role

use crate::{
    config::{FailMode, ThrottleConfig},
    keys,
    principal::Role,
    utils::mask_identifier,
};
use std::time::Duration;
use tollgate_store::{ttl_from_seconds, Batch, SessionStore, StoreError};
use tracing::{debug, warn};

/// Outcome of the pre-validation throttle gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleStatus {
    /// Sign-in may proceed; `remaining` attempts are left in the window
    Allowed { remaining: u32 },
    /// Too many failures; retry once the window expires
    Locked { retry_after: Duration },
}

impl ThrottleStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, ThrottleStatus::Locked { .. })
    }
}

/// Counter state as read from the store
enum Counter {
    Known { failures: u32, ttl: Option<Duration> },
    Unknown,
}

/// Login attempt counter backed by the session store
#[derive(Debug, Clone)]
pub struct LoginThrottle {
    store: SessionStore,
    config: ThrottleConfig,
    fail_mode: FailMode,
}

impl LoginThrottle {
    pub fn new(store: SessionStore, config: ThrottleConfig, fail_mode: FailMode) -> Self {
        Self {
            store,
            config,
            fail_mode,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Read the counter without counting an attempt
    pub async fn check(&self, login_name: &str, role: Role) -> ThrottleStatus {
        let key = keys::login_attempts(role, login_name);
        let counter = self
            .store
            .with_fallback("throttle.check", Counter::Unknown, async {
                let batch = Batch::new().get(key.as_str()).ttl(key.as_str());
                let replies = self.store.exec(batch).await?;
                let mut replies = replies.into_iter();
                let count = match replies.next() {
                    Some(reply) => reply.into_text()?,
                    None => None,
                };
                let ttl = match replies.next() {
                    Some(reply) => ttl_from_seconds(reply.as_int()?),
                    None => None,
                };
                Ok::<_, StoreError>(Counter::Known {
                    failures: count.and_then(|c| c.parse().ok()).unwrap_or(0),
                    ttl,
                })
            })
            .await;

        match counter {
            Counter::Known { failures, ttl } if failures >= self.config.max_attempts => {
                debug!(login = %mask_identifier(login_name), %role, failures, "login locked");
                ThrottleStatus::Locked {
                    retry_after: ttl.unwrap_or_else(|| self.config.window()),
                }
            }
            Counter::Known { failures, .. } => ThrottleStatus::Allowed {
                remaining: self.config.max_attempts - failures,
            },
            Counter::Unknown => self.unavailable(),
        }
    }

    /// Count a sign-in attempt and decide whether it may reach the validator.
    ///
    /// The attempt is counted before validation in one batch, so concurrent
    /// attempts each see a distinct count and no more than `max_attempts`
    /// are admitted per window. A successful sign-in clears the counter. The
    /// window starts at the first attempt and is not extended by later ones.
    pub async fn reserve(&self, login_name: &str, role: Role) -> ThrottleStatus {
        let key = keys::login_attempts(role, login_name);
        let batch = Batch::new()
            .set_if_absent(key.as_str(), "0", Some(self.config.window()))
            .increment(key.as_str())
            .ttl(key.as_str());

        let counter = self
            .store
            .with_fallback("throttle.reserve", Counter::Unknown, async {
                let replies = self.store.exec(batch).await?;
                let count = match replies.get(1) {
                    Some(reply) => reply.as_int()?,
                    None => 0,
                };
                let ttl = match replies.get(2) {
                    Some(reply) => ttl_from_seconds(reply.as_int()?),
                    None => None,
                };
                Ok::<_, StoreError>(Counter::Known {
                    failures: u32::try_from(count.max(0)).unwrap_or(u32::MAX),
                    ttl,
                })
            })
            .await;

        match counter {
            Counter::Known { failures, ttl } if failures > self.config.max_attempts => {
                debug!(login = %mask_identifier(login_name), %role, failures, "login locked");
                ThrottleStatus::Locked {
                    retry_after: ttl.unwrap_or_else(|| self.config.window()),
                }
            }
            Counter::Known { failures, .. } => {
                if failures == self.config.max_attempts {
                    let login = mask_identifier(login_name);
                    warn!(%login, %role, failures, "last login attempt in window");
                }
                ThrottleStatus::Allowed {
                    remaining: self.config.max_attempts - failures,
                }
            }
            Counter::Unknown => self.unavailable(),
        }
    }

    fn unavailable(&self) -> ThrottleStatus {
        match self.fail_mode {
            FailMode::Open => ThrottleStatus::Allowed {
                remaining: self.config.max_attempts,
            },
            FailMode::Closed => ThrottleStatus::Locked {
                retry_after: self.config.window(),
            },
        }
    }

    /// Commands clearing the counter, to be executed with the successful
    /// sign-in's token persistence batch
    pub fn clear_batch(&self, login_name: &str, role: Role) -> Batch {
        Batch::new().delete(keys::login_attempts(role, login_name))
    }
}

/// Retry-after rounded up to whole minutes, never below one
pub fn retry_after_minutes(retry_after: Duration) -> u64 {
    ((retry_after.as_secs() + 59) / 60).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tollgate_store::{Clock, ManualClock, MemoryBackend};

    fn throttle(
        max_attempts: u32,
        fail_mode: FailMode,
    ) -> (LoginThrottle, Arc<MemoryBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(MemoryBackend::with_clock(clock.clone() as Arc<dyn Clock>));
        let store = SessionStore::from_arc(backend.clone());
        let config = ThrottleConfig {
            max_attempts,
            window_seconds: 600,
        };
        (LoginThrottle::new(store, config, fail_mode), backend, clock)
    }

    #[tokio::test]
    async fn test_locks_after_max_attempts() {
        let (throttle, _, _) = throttle(3, FailMode::Open);
        let op = Role::Operator;

        assert_eq!(throttle.check("opuser", op).await, ThrottleStatus::Allowed { remaining: 3 });
        assert_eq!(throttle.reserve("opuser", op).await, ThrottleStatus::Allowed { remaining: 2 });
        assert_eq!(throttle.reserve("opuser", op).await, ThrottleStatus::Allowed { remaining: 1 });
        assert_eq!(throttle.check("opuser", op).await, ThrottleStatus::Allowed { remaining: 1 });
        assert_eq!(throttle.reserve("opuser", op).await, ThrottleStatus::Allowed { remaining: 0 });

        match throttle.reserve("opuser", op).await {
            ThrottleStatus::Locked { retry_after } => {
                assert!(retry_after <= Duration::from_secs(600));
                assert_eq!(retry_after_minutes(retry_after), 10);
            }
            other => panic!("expected lockout, got {:?}", other),
        }
        assert!(throttle.check("opuser", op).await.is_locked());

        // Counters are per role
        assert!(!throttle.check("opuser", Role::Admin).await.is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_admit_at_most_max() {
        let (throttle, _, _) = throttle(3, FailMode::Open);

        let attempts = (0..40).map(|_| {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.reserve("opuser", Role::Operator).await })
        });
        let statuses = futures::future::join_all(attempts).await;

        let admitted = statuses
            .into_iter()
            .map(|status| status.unwrap())
            .filter(|status| !status.is_locked())
            .count();
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn test_window_is_fixed_at_first_attempt() {
        let (throttle, _, clock) = throttle(2, FailMode::Open);

        throttle.reserve("dir", Role::Director).await;
        clock.advance(Duration::from_secs(400));
        throttle.reserve("dir", Role::Director).await;
        assert!(throttle.check("dir", Role::Director).await.is_locked());

        // Window expires 600s after the first attempt, not the second
        clock.advance(Duration::from_secs(200));
        assert_eq!(
            throttle.check("dir", Role::Director).await,
            ThrottleStatus::Allowed { remaining: 2 }
        );
    }

    #[tokio::test]
    async fn test_clear_batch_resets_counter() {
        let (throttle, backend, _) = throttle(5, FailMode::Open);
        let store = SessionStore::from_arc(backend);

        throttle.reserve("Master1", Role::Master).await;
        throttle.reserve("master1", Role::Master).await;
        assert_eq!(
            throttle.check("MASTER1", Role::Master).await,
            ThrottleStatus::Allowed { remaining: 3 }
        );

        store.exec(throttle.clear_batch("master1", Role::Master)).await.unwrap();
        assert_eq!(
            throttle.check("master1", Role::Master).await,
            ThrottleStatus::Allowed { remaining: 5 }
        );
    }

    #[tokio::test]
    async fn test_outage_fails_open_by_default() {
        let (throttle, backend, _) = throttle(1, FailMode::Open);
        throttle.reserve("opuser", Role::Operator).await;
        assert!(throttle.check("opuser", Role::Operator).await.is_locked());

        backend.simulate_outage(true);
        let allowed = ThrottleStatus::Allowed { remaining: 1 };
        assert_eq!(throttle.check("opuser", Role::Operator).await, allowed);
        assert_eq!(throttle.reserve("opuser", Role::Operator).await, allowed);
    }

    #[tokio::test]
    async fn test_outage_fails_closed_when_configured() {
        let (throttle, backend, _) = throttle(10, FailMode::Closed);
        backend.simulate_outage(true);

        assert!(throttle.check("opuser", Role::Operator).await.is_locked());
        assert!(throttle.reserve("opuser", Role::Operator).await.is_locked());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_minutes(Duration::from_secs(0)), 1);
        assert_eq!(retry_after_minutes(Duration::from_secs(61)), 2);
        assert_eq!(retry_after_minutes(Duration::from_secs(600)), 10);
    }
}
