//! Refresh token lifecycle: issuance, rotation, revocation and reuse detection
//!
//! A refresh token is live while its record exists in the session store.
//! Redemption deletes the record inside an atomic batch; the delete count
//! decides the single winner when the same token is redeemed concurrently.
//! Every token leaving the live state leaves a tombstone behind for the
//! reuse tracking window, so a replayed token can be told apart from an
//! unknown one.

use crate::{
    config::{AuthConfig, FailMode},
    keys,
    principal::{Principal, Role},
    providers::jwt::{JwtProvider, MintedPair, TokenClaims, TokenKind, TokenPair},
    utils::{mask_identifier, CryptoUtils},
    AuthError, AuthResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tollgate_store::{Batch, Clock, SessionStore, StoreError, StoreReply, StoreResult};
use tracing::{debug, error, info, warn};

/// Live refresh token as persisted in the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub principal_id: String,
    pub role: Role,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Why a refresh token left the live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Rotated,
    Logout,
    ForceLogout,
    ReuseTeardown,
}

/// Marker kept for a revoked refresh token during the tracking window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub principal_id: String,
    pub role: Role,
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
}

/// Result of a successful redemption
#[derive(Debug, Clone)]
pub struct Redeemed {
    pub principal: Principal,
    pub tokens: TokenPair,
}

/// What the atomic consume step observed
enum Consumption {
    /// This call deleted the live record
    Won,
    /// No live record, but a tombstone: the token was already rotated or revoked
    Replayed,
    /// Neither record nor tombstone
    Unknown,
    /// Store unreachable
    Unavailable,
}

/// Force-logout flag as read from the store
enum FlagState {
    Absent,
    SetAt(i64),
    Unavailable,
}

/// Issues, rotates and revokes token pairs
#[derive(Debug, Clone)]
pub struct TokenLifecycle {
    store: SessionStore,
    jwt: Arc<JwtProvider>,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
    tracking_window: Duration,
    force_logout_ttl: Duration,
    rotation_threshold: Duration,
    fail_mode: FailMode,
}

impl TokenLifecycle {
    pub fn new(
        store: SessionStore,
        jwt: Arc<JwtProvider>,
        clock: Arc<dyn Clock>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            jwt,
            clock,
            refresh_ttl: config.jwt.refresh_ttl(),
            tracking_window: config.reuse_tracking_window(),
            force_logout_ttl: config.force_logout_ttl(),
            rotation_threshold: config.rotation_threshold(),
            fail_mode: config.session.fail_mode,
        }
    }

    pub fn jwt(&self) -> &JwtProvider {
        &self.jwt
    }

    /// Mint and persist a fresh pair
    pub async fn issue(&self, principal: &Principal) -> AuthResult<TokenPair> {
        self.issue_with(principal, Batch::new()).await
    }

    /// Mint a fresh pair and persist it together with `extra` in one atomic batch.
    ///
    /// Nothing is returned unless persistence succeeded, so a caller never
    /// holds a refresh token the store does not know about.
    pub async fn issue_with(&self, principal: &Principal, extra: Batch) -> AuthResult<TokenPair> {
        let minted = self.jwt.mint_pair(principal)?;
        let prune = self.prune_batch(&principal.id, principal.role).await;
        let batch = self.persist_batch(&minted)?.extend(prune).extend(extra);

        self.store.exec(batch).await.map_err(|e| {
            error!(
                principal = %mask_identifier(&principal.id),
                role = %principal.role,
                error = %e,
                "failed to persist refresh token"
            );
            AuthError::from(e)
        })?;

        debug!(
            principal = %mask_identifier(&principal.id),
            role = %principal.role,
            jti = %minted.refresh.jti,
            "issued token pair"
        );
        Ok(minted.pair)
    }

    fn persist_batch(&self, minted: &MintedPair) -> AuthResult<Batch> {
        let refresh = &minted.refresh;
        let digest = CryptoUtils::token_digest(&minted.pair.refresh_token);
        let record = RefreshTokenRecord {
            principal_id: refresh.sub.clone(),
            role: refresh.role,
            jti: refresh.jti.clone(),
            issued_at: refresh.issued_at(),
            expires_at: refresh.expires_at(),
        };
        let set_key = keys::refresh_set(refresh.role, &refresh.sub);

        Ok(Batch::new()
            .set(
                keys::refresh_record(refresh.role, &refresh.sub, &digest),
                to_json(&record)?,
                Some(self.refresh_ttl),
            )
            .set_add(set_key.as_str(), digest)
            .expire(set_key, self.refresh_ttl))
    }

    /// Split a principal's tracked digests into those with a live record and
    /// those whose record has expired
    async fn partition_digests(
        &self,
        principal_id: &str,
        role: Role,
    ) -> StoreResult<(Vec<String>, Vec<String>)> {
        let members = self.store.set_members(&keys::refresh_set(role, principal_id)).await?;
        let lookups = members.iter().fold(Batch::new(), |batch, digest| {
            batch.exists(keys::refresh_record(role, principal_id, digest))
        });
        let replies = self.store.exec(lookups).await?;

        let mut live = Vec::new();
        let mut expired = Vec::new();
        for (digest, reply) in members.into_iter().zip(replies.iter()) {
            if reply.is_truthy()? {
                live.push(digest);
            } else {
                expired.push(digest);
            }
        }
        Ok((live, expired))
    }

    /// Commands dropping set members whose record has expired. Best effort.
    async fn prune_batch(&self, principal_id: &str, role: Role) -> Batch {
        let expired = self
            .store
            .with_fallback("tokens.prune", Vec::new(), async {
                let (_, expired) = self.partition_digests(principal_id, role).await?;
                Ok::<_, StoreError>(expired)
            })
            .await;

        let set_key = keys::refresh_set(role, principal_id);
        expired
            .into_iter()
            .fold(Batch::new(), |batch, digest| batch.set_remove(set_key.as_str(), digest))
    }

    fn tombstone_json(
        &self,
        principal_id: &str,
        role: Role,
        reason: RevocationReason,
    ) -> AuthResult<String> {
        to_json(&Tombstone {
            principal_id: principal_id.to_string(),
            role,
            reason,
            revoked_at: self.clock.now(),
        })
    }

    /// Redeem a refresh token for a new pair, rotating it out.
    ///
    /// Errors: `InvalidToken` for anything unknown, expired or malformed;
    /// `SecurityViolation` when an already rotated token is replayed, after
    /// revoking every session of the principal.
    pub async fn redeem(&self, refresh_token: &str) -> AuthResult<Redeemed> {
        let claims = self.jwt.verify(refresh_token, TokenKind::Refresh)?;
        let (principal_id, role) = (claims.sub.as_str(), claims.role);
        let digest = CryptoUtils::token_digest(refresh_token);

        let consume = Batch::new()
            .delete(keys::refresh_record(role, principal_id, &digest))
            .set_remove(keys::refresh_set(role, principal_id), digest.as_str())
            .exists(keys::tombstone(role, principal_id, &digest));

        let consumption = self
            .store
            .with_fallback("tokens.redeem", Consumption::Unavailable, async {
                let replies = self.store.exec(consume).await?;
                let deleted = reply_flag(replies.first())?;
                let tombstoned = reply_flag(replies.last())?;
                Ok::<_, StoreError>(match (deleted, tombstoned) {
                    (true, _) => Consumption::Won,
                    (false, true) => Consumption::Replayed,
                    (false, false) => Consumption::Unknown,
                })
            })
            .await;

        match consumption {
            Consumption::Won => {}
            Consumption::Unknown => {
                let principal = mask_identifier(principal_id);
                debug!(%principal, %role, "refresh token is not live");
                return Err(AuthError::InvalidToken);
            }
            Consumption::Unavailable => return Err(AuthError::InvalidToken),
            Consumption::Replayed => {
                warn!(
                    principal = %mask_identifier(principal_id),
                    %role,
                    jti = %claims.jti,
                    "refresh token reuse detected, revoking all sessions"
                );
                self.teardown(principal_id, role).await;
                return Err(AuthError::SecurityViolation);
            }
        }

        let principal = claims.principal();
        let minted = self.jwt.mint_pair(&principal)?;
        let batch = Batch::new()
            .set(
                keys::tombstone(role, principal_id, &digest),
                self.tombstone_json(principal_id, role, RevocationReason::Rotated)?,
                Some(self.tracking_window),
            )
            .extend(self.persist_batch(&minted)?);

        if let Err(e) = self.store.exec(batch).await {
            error!(
                principal = %mask_identifier(principal_id),
                %role,
                error = %e,
                "failed to persist rotated token"
            );
            return Err(AuthError::InvalidToken);
        }

        debug!(
            principal = %mask_identifier(principal_id),
            %role,
            old = %claims.jti,
            new = %minted.refresh.jti,
            "rotated refresh token"
        );
        Ok(Redeemed {
            principal,
            tokens: minted.pair,
        })
    }

    /// Revoke every live refresh token of a principal
    pub async fn revoke_all(
        &self,
        principal_id: &str,
        role: Role,
        reason: RevocationReason,
    ) -> AuthResult<usize> {
        let (members, _) = self.partition_digests(principal_id, role).await?;
        let batch = self.revocation_batch(principal_id, role, &members, reason)?;
        self.store.exec(batch).await?;

        info!(
            principal = %mask_identifier(principal_id),
            %role,
            ?reason,
            revoked = members.len(),
            "revoked refresh tokens"
        );
        Ok(members.len())
    }

    /// Revoke every refresh token and invalidate outstanding access tokens
    pub async fn force_logout(
        &self,
        principal_id: &str,
        role: Role,
        reason: RevocationReason,
    ) -> AuthResult<usize> {
        let (members, _) = self.partition_digests(principal_id, role).await?;
        let batch = self
            .revocation_batch(principal_id, role, &members, reason)?
            .set(
                keys::force_logout(role, principal_id),
                self.clock.now().timestamp().to_string(),
                Some(self.force_logout_ttl),
            );
        self.store.exec(batch).await?;

        info!(
            principal = %mask_identifier(principal_id),
            %role,
            ?reason,
            revoked = members.len(),
            "forced logout"
        );
        Ok(members.len())
    }

    async fn teardown(&self, principal_id: &str, role: Role) {
        let reason = RevocationReason::ReuseTeardown;
        if let Err(e) = self.force_logout(principal_id, role, reason).await {
            let principal = mask_identifier(principal_id);
            error!(%principal, %role, error = %e, "reuse teardown failed");
        }
    }

    fn revocation_batch(
        &self,
        principal_id: &str,
        role: Role,
        digests: &[String],
        reason: RevocationReason,
    ) -> AuthResult<Batch> {
        let tombstone = self.tombstone_json(principal_id, role, reason)?;
        let batch = digests.iter().fold(Batch::new(), |batch, digest| {
            batch
                .delete(keys::refresh_record(role, principal_id, digest))
                .set(
                    keys::tombstone(role, principal_id, digest),
                    tombstone.as_str(),
                    Some(self.tracking_window),
                )
        });
        Ok(batch.delete(keys::refresh_set(role, principal_id)))
    }

    /// Whether an access token was issued at or before an active force-logout
    pub async fn is_force_logged_out(&self, claims: &TokenClaims) -> bool {
        let key = keys::force_logout(claims.role, &claims.sub);
        let flag = self
            .store
            .with_fallback("tokens.force_logout_check", FlagState::Unavailable, async {
                let flag = self.store.get(&key).await?;
                // An unreadable flag revokes everything
                Ok::<_, StoreError>(match flag {
                    Some(raw) => FlagState::SetAt(raw.trim().parse().unwrap_or(i64::MAX)),
                    None => FlagState::Absent,
                })
            })
            .await;

        match flag {
            FlagState::Absent => false,
            FlagState::SetAt(enforced_at) => claims.iat <= enforced_at,
            FlagState::Unavailable => self.fail_mode == FailMode::Closed,
        }
    }

    /// Whether an access token is close enough to expiry to rotate proactively
    pub fn needs_rotation(&self, claims: &TokenClaims) -> bool {
        claims.remaining_at(self.clock.now()) < self.rotation_threshold
    }

    /// Number of live refresh tokens a principal holds
    pub async fn live_token_count(&self, principal_id: &str, role: Role) -> AuthResult<usize> {
        let (live, _) = self.partition_digests(principal_id, role).await?;
        Ok(live.len())
    }
}

fn reply_flag(reply: Option<&StoreReply>) -> Result<bool, StoreError> {
    match reply {
        Some(reply) => reply.is_truthy(),
        None => Err(StoreError::UnexpectedReply("missing batch reply".to_string())),
    }
}

fn to_json<T: Serialize>(value: &T) -> AuthResult<String> {
    serde_json::to_string(value).map_err(|e| AuthError::store_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tollgate_store::{ManualClock, MemoryBackend};

    struct Fixture {
        tokens: TokenLifecycle,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
        let store = SessionStore::from_arc(backend.clone());
        let config = AuthConfig::development();
        let jwt = Arc::new(JwtProvider::new(config.jwt.clone(), clock.clone()).unwrap());
        Fixture {
            tokens: TokenLifecycle::new(store, jwt, clock.clone(), &config),
            backend,
            clock,
        }
    }

    fn admin() -> Principal {
        Principal::new("1", "root", Role::Admin, "Root")
    }

    #[tokio::test]
    async fn test_issue_tracks_multiple_live_tokens() {
        let f = fixture();
        f.tokens.issue(&admin()).await.unwrap();
        f.tokens.issue(&admin()).await.unwrap();

        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 2);
        assert_eq!(f.tokens.live_token_count("1", Role::Master).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_tokens_leave_the_set_on_next_issue() {
        let f = fixture();
        let store = SessionStore::from_arc(f.backend.clone());
        let set_key = keys::refresh_set(Role::Admin, "1");

        f.tokens.issue(&admin()).await.unwrap();
        f.tokens.issue(&admin()).await.unwrap();
        assert_eq!(store.set_members(&set_key).await.unwrap().len(), 2);

        // Records expire a week after issue; a fresh sign-in an hour before that
        // keeps the set alive while the older records run out
        f.clock.advance(Duration::from_secs(7 * 24 * 3600 - 3600));
        f.tokens.issue(&admin()).await.unwrap();
        f.clock.advance(Duration::from_secs(3600));
        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 1);
        assert_eq!(store.set_members(&set_key).await.unwrap().len(), 3);

        f.tokens.issue(&admin()).await.unwrap();
        assert_eq!(store.set_members(&set_key).await.unwrap().len(), 2);
        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_redeem_rotates_exactly_once() {
        let f = fixture();
        let pair = f.tokens.issue(&admin()).await.unwrap();

        let redeemed = f.tokens.redeem(&pair.refresh_token).await.unwrap();
        assert_eq!(redeemed.principal, admin());
        assert_ne!(redeemed.tokens.refresh_token, pair.refresh_token);
        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 1);

        let replay = f.tokens.redeem(&pair.refresh_token).await;
        assert_eq!(replay.unwrap_err(), AuthError::SecurityViolation);

        // Teardown revoked the rotated-in token as well
        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 0);
        assert_eq!(
            f.tokens.redeem(&redeemed.tokens.refresh_token).await.unwrap_err(),
            AuthError::SecurityViolation
        );

        let access = f
            .tokens
            .jwt()
            .verify(&redeemed.tokens.access_token, TokenKind::Access)
            .unwrap();
        assert!(f.tokens.is_force_logged_out(&access).await);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens_are_invalid() {
        let f = fixture();
        assert_eq!(f.tokens.redeem("garbage").await.unwrap_err(), AuthError::InvalidToken);

        // Correctly signed but never persisted
        let (token, _) = f.tokens.jwt().mint(&admin(), TokenKind::Refresh).unwrap();
        assert_eq!(f.tokens.redeem(&token).await.unwrap_err(), AuthError::InvalidToken);

        // Access tokens cannot be redeemed
        let pair = f.tokens.issue(&admin()).await.unwrap();
        assert_eq!(f.tokens.redeem(&pair.access_token).await.unwrap_err(), AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn test_replay_after_tracking_window_is_plain_invalid() {
        let f = fixture();
        let pair = f.tokens.issue(&admin()).await.unwrap();
        f.tokens.redeem(&pair.refresh_token).await.unwrap();

        f.clock.advance(Duration::from_secs(3601));
        assert_eq!(
            f.tokens.redeem(&pair.refresh_token).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_concurrent_redeem_has_single_winner() {
        let f = fixture();
        let pair = f.tokens.issue(&admin()).await.unwrap();

        let results = join_all((0..8).map(|_| {
            let tokens = f.tokens.clone();
            let refresh = pair.refresh_token.clone();
            tokio::spawn(async move { tokens.redeem(&refresh).await })
        }))
        .await;

        let outcomes: Vec<AuthResult<Redeemed>> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            AuthError::InvalidToken | AuthError::SecurityViolation
        )));
    }

    #[tokio::test]
    async fn test_revoke_all_leaves_tombstones() {
        let f = fixture();
        let first = f.tokens.issue(&admin()).await.unwrap();
        f.tokens.issue(&admin()).await.unwrap();

        let revoked = f.tokens.revoke_all("1", Role::Admin, RevocationReason::Logout).await;
        assert_eq!(revoked.unwrap(), 2);
        assert_eq!(f.tokens.live_token_count("1", Role::Admin).await.unwrap(), 0);

        // A revoked token presented again counts as reuse
        assert_eq!(
            f.tokens.redeem(&first.refresh_token).await.unwrap_err(),
            AuthError::SecurityViolation
        );
    }

    #[tokio::test]
    async fn test_force_logout_only_hits_earlier_tokens() {
        let f = fixture();
        let before = f.tokens.jwt().mint(&admin(), TokenKind::Access).unwrap().1;
        assert!(!f.tokens.is_force_logged_out(&before).await);

        f.tokens.force_logout("1", Role::Admin, RevocationReason::ForceLogout).await.unwrap();
        assert!(f.tokens.is_force_logged_out(&before).await);

        f.clock.advance(Duration::from_secs(1));
        let after = f.tokens.jwt().mint(&admin(), TokenKind::Access).unwrap().1;
        assert!(!f.tokens.is_force_logged_out(&after).await);

        // Other roles with the same ID are unaffected
        let operator = Principal::new("1", "op", Role::Operator, "Op");
        let other = f.tokens.jwt().mint(&operator, TokenKind::Access).unwrap().1;
        assert!(!f.tokens.is_force_logged_out(&other).await);
    }

    #[tokio::test]
    async fn test_store_outage_behaviour() {
        let f = fixture();
        let pair = f.tokens.issue(&admin()).await.unwrap();
        f.tokens.force_logout("1", Role::Admin, RevocationReason::ForceLogout).await.unwrap();
        let claims = f.tokens.jwt().verify(&pair.access_token, TokenKind::Access).unwrap();

        f.backend.simulate_outage(true);
        // Force-logout check fails open, redemption fails closed
        assert!(!f.tokens.is_force_logged_out(&claims).await);
        assert_eq!(
            f.tokens.redeem(&pair.refresh_token).await.unwrap_err(),
            AuthError::InvalidToken
        );
        assert!(matches!(
            f.tokens.issue(&admin()).await.unwrap_err(),
            AuthError::SessionStore { .. }
        ));
    }

    #[tokio::test]
    async fn test_needs_rotation_near_expiry() {
        let f = fixture();
        let (_, claims) = f.tokens.jwt().mint(&admin(), TokenKind::Access).unwrap();
        assert!(!f.tokens.needs_rotation(&claims));

        f.clock.advance(Duration::from_secs(11 * 60));
        assert!(f.tokens.needs_rotation(&claims));
    }
}
