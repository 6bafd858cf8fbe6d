//! Session lifecycle orchestration
//!
//! [`SessionService`] composes the throttle, credential validator, token
//! lifecycle and profile cache into the public operations. Public operations
//! only ever fail with caller-visible [`AuthError`] variants; store outages
//! are absorbed according to the configured fail mode.

use crate::{
    audit::{AuditEvent, AuditEventType, RequestContext, TracingAuditSink},
    config::AuthConfig,
    credentials::{CredentialSources, CredentialValidator, DummyHash},
    principal::{Principal, Role},
    profile::{CacheObserver, ProfileCache},
    providers::jwt::{JwtProvider, TokenClaims, TokenKind, TokenPair},
    throttle::{retry_after_minutes, LoginThrottle, ThrottleStatus},
    tokens::{RevocationReason, TokenLifecycle},
    traits::{AuditSink, CredentialSource, PasswordHasher, ProfileLookup},
    utils::{mask_identifier, PasswordHasherFactory},
    AuthError, AuthResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_store::{Clock, MemoryBackend, SessionStore, SystemClock};
use tracing::{debug, error, info, instrument, warn};

/// Successful sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub principal: Principal,
    pub tokens: TokenPair,
}

/// Multi-role authentication and session lifecycle service
pub struct SessionService {
    config: Arc<AuthConfig>,
    clock: Arc<dyn Clock>,
    validator: CredentialValidator,
    throttle: LoginThrottle,
    tokens: TokenLifecycle,
    profiles: ProfileCache,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("validator", &self.validator)
            .field("throttle", &self.throttle)
            .field("tokens", &self.tokens)
            .field("profiles", &self.profiles)
            .finish()
    }
}

impl SessionService {
    pub fn builder(config: AuthConfig) -> SessionServiceBuilder {
        SessionServiceBuilder::new(config)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    /// Sign in with a login name, password and claimed role
    #[instrument(skip_all, fields(login = %mask_identifier(login_name), %role))]
    pub async fn login(
        &self,
        login_name: &str,
        password: &str,
        role: Role,
        context: &RequestContext,
    ) -> AuthResult<LoginResponse> {
        // The attempt is counted here and cleared only by a successful sign-in
        let remaining = match self.throttle.reserve(login_name, role).await {
            ThrottleStatus::Allowed { remaining } => remaining,
            ThrottleStatus::Locked { retry_after } => {
                let minutes = retry_after_minutes(retry_after);
                self.record(
                    self.event(AuditEventType::LoginLocked, false, context)
                        .with_role(role)
                        .with_metadata("login", mask_identifier(login_name))
                        .with_metadata("retry_after_minutes", minutes),
                )
                .await;
                return Err(AuthError::AccountLocked {
                    retry_after_minutes: minutes,
                });
            }
        };

        let principal = match self.validator.validate(login_name, password, role).await {
            Ok(principal) => principal,
            Err(_) => {
                self.record(
                    self.event(AuditEventType::LoginFailure, false, context)
                        .with_role(role)
                        .with_metadata("login", mask_identifier(login_name))
                        .with_metadata("remaining_attempts", remaining),
                )
                .await;
                return Err(AuthError::InvalidCredentials {
                    remaining_attempts: remaining,
                });
            }
        };

        // Token persistence and the counter reset commit together
        let tokens = match self
            .tokens
            .issue_with(&principal, self.throttle.clear_batch(login_name, role))
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "sign-in rejected, session could not be persisted");
                self.record(
                    self.event(AuditEventType::LoginFailure, false, context)
                        .with_principal(principal.id.as_str(), role)
                        .with_metadata("reason", "session_unavailable"),
                )
                .await;
                return Err(AuthError::InvalidCredentials {
                    remaining_attempts: remaining,
                });
            }
        };

        info!(principal = %mask_identifier(&principal.id), "signed in");
        self.record(
            self.event(AuditEventType::LoginSuccess, true, context)
                .with_principal(principal.id.as_str(), role),
        )
        .await;

        Ok(LoginResponse { principal, tokens })
    }

    /// Exchange a refresh token for a new pair
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        context: &RequestContext,
    ) -> AuthResult<TokenPair> {
        match self.tokens.redeem(refresh_token).await {
            Ok(redeemed) => {
                self.record(
                    self.event(AuditEventType::TokenRefreshed, true, context)
                        .with_principal(redeemed.principal.id.as_str(), redeemed.principal.role),
                )
                .await;
                Ok(redeemed.tokens)
            }
            Err(AuthError::SecurityViolation) => {
                let mut event = self.event(AuditEventType::TokenReuseDetected, false, context);
                if let Ok(claims) = self.tokens.jwt().verify(refresh_token, TokenKind::Refresh) {
                    event = event.with_principal(claims.sub, claims.role);
                }
                self.record(event).await;
                Err(AuthError::SecurityViolation)
            }
            Err(e) => {
                debug!(error = %e, "refresh rejected");
                self.record(self.event(AuditEventType::TokenRefreshFailed, false, context)).await;
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Revoke every refresh token of the principal
    #[instrument(
        skip_all,
        fields(principal = %mask_identifier(&principal.id), role = %principal.role)
    )]
    pub async fn logout(&self, principal: &Principal, context: &RequestContext) -> AuthResult<()> {
        match self
            .tokens
            .revoke_all(&principal.id, principal.role, RevocationReason::Logout)
            .await
        {
            Ok(revoked) => {
                self.record(
                    self.event(AuditEventType::Logout, true, context)
                        .with_principal(principal.id.as_str(), principal.role)
                        .with_metadata("revoked", revoked),
                )
                .await;
            }
            Err(e) => {
                // Tokens left behind still expire on their own
                warn!(error = %e, "logout could not revoke refresh tokens");
                self.record(
                    self.event(AuditEventType::Logout, false, context)
                        .with_principal(principal.id.as_str(), principal.role),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Verify an access token, including the force-logout check
    pub async fn validate(&self, access_token: &str) -> AuthResult<TokenClaims> {
        let claims = self
            .tokens
            .jwt()
            .verify(access_token, TokenKind::Access)
            .map_err(|_| AuthError::Unauthorized)?;

        if self.tokens.is_force_logged_out(&claims).await {
            debug!(
                principal = %mask_identifier(&claims.sub),
                role = %claims.role,
                "access token revoked by force logout"
            );
            return Err(AuthError::Unauthorized);
        }

        Ok(claims)
    }

    /// Role-specific profile of an authenticated principal
    pub async fn get_profile(&self, principal: &Principal) -> AuthResult<serde_json::Value> {
        self.profiles.get(principal.role, &principal.id).await
    }

    /// Immediately end every session of another principal
    #[instrument(
        skip_all,
        fields(
            caller = %mask_identifier(&caller.id),
            target = %mask_identifier(target_id),
            %target_role
        )
    )]
    pub async fn force_logout(
        &self,
        caller: &Principal,
        target_id: &str,
        target_role: Role,
        context: &RequestContext,
    ) -> AuthResult<()> {
        if !self.config.force_logout_roles.contains(&caller.role) {
            warn!(caller_role = %caller.role, "force logout denied");
            self.record(
                self.event(AuditEventType::ForceLogoutDenied, false, context)
                    .with_principal(caller.id.as_str(), caller.role)
                    .with_metadata("target_id", target_id)
                    .with_metadata("target_role", target_role.as_str()),
            )
            .await;
            return Err(AuthError::Forbidden);
        }

        let revoked = self
            .tokens
            .force_logout(target_id, target_role, RevocationReason::ForceLogout)
            .await
            .map_err(|e| {
                error!(error = %e, "force logout could not be recorded");
                e
            })?;
        self.profiles.invalidate(target_role, target_id).await;

        self.record(
            self.event(AuditEventType::ForceLogout, true, context)
                .with_principal(caller.id.as_str(), caller.role)
                .with_metadata("target_id", target_id)
                .with_metadata("target_role", target_role.as_str())
                .with_metadata("revoked", revoked),
        )
        .await;
        Ok(())
    }

    /// Rotate the pair when the access token is about to expire.
    ///
    /// Returns `None` while the access token has enough lifetime left.
    pub async fn rotate_if_expiring(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
        context: &RequestContext,
    ) -> AuthResult<Option<TokenPair>> {
        if !self.tokens.needs_rotation(claims) {
            return Ok(None);
        }
        let refresh_claims = self
            .tokens
            .jwt()
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidToken)?;
        if refresh_claims.sub != claims.sub || refresh_claims.role != claims.role {
            return Err(AuthError::InvalidToken);
        }
        debug!(
            principal = %mask_identifier(&claims.sub),
            role = %claims.role,
            "rotating expiring access token"
        );
        self.refresh(refresh_token, context).await.map(Some)
    }

    fn event(
        &self,
        event_type: AuditEventType,
        success: bool,
        context: &RequestContext,
    ) -> AuditEvent {
        AuditEvent::new(event_type, success, context, self.clock.now())
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(&event).await {
            warn!(event = %event.event_type, error = %e, "audit sink failed");
        }
    }
}

/// Builder for [`SessionService`]
pub struct SessionServiceBuilder {
    config: AuthConfig,
    store: Option<SessionStore>,
    clock: Option<Arc<dyn Clock>>,
    sources: CredentialSources,
    profile_lookup: Option<Arc<dyn ProfileLookup>>,
    hasher: Option<Arc<dyn PasswordHasher>>,
    dummy_hash: Option<DummyHash>,
    audit: Option<Arc<dyn AuditSink>>,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl SessionServiceBuilder {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            sources: CredentialSources::new(),
            profile_lookup: None,
            hasher: None,
            dummy_hash: None,
            audit: None,
            observer: None,
        }
    }

    /// Session store; defaults to a process-local memory store
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn credential_source<S: CredentialSource + 'static>(mut self, source: S) -> Self {
        self.sources = self.sources.register(source);
        self
    }

    pub fn credential_sources(mut self, sources: CredentialSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn profile_lookup(mut self, lookup: Arc<dyn ProfileLookup>) -> Self {
        self.profile_lookup = Some(lookup);
        self
    }

    /// Password hasher; defaults to the configured algorithm
    pub fn hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Precomputed dummy hash; generated with the hasher when absent
    pub fn dummy_hash(mut self, dummy_hash: DummyHash) -> Self {
        self.dummy_hash = Some(dummy_hash);
        self
    }

    /// Audit sink; defaults to [`TracingAuditSink`]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn cache_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> AuthResult<SessionService> {
        self.config.validate()?;

        let profile_lookup = self
            .profile_lookup
            .ok_or_else(|| AuthError::config_error("A profile lookup is required"))?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = match self.store {
            Some(store) => store,
            None => {
                warn!("no session store configured, using process-local memory store");
                SessionStore::new(MemoryBackend::with_clock(clock.clone()))
            }
        };
        let hasher = match self.hasher {
            Some(hasher) => hasher,
            None => PasswordHasherFactory::from_config(&self.config.password)?,
        };
        let dummy_hash = match self.dummy_hash {
            Some(dummy_hash) => dummy_hash,
            None => DummyHash::generate(hasher.as_ref())?,
        };

        let config = Arc::new(self.config);
        let jwt = Arc::new(JwtProvider::new(config.jwt.clone(), clock.clone())?);
        let mut profiles = ProfileCache::new(store.clone(), profile_lookup, config.profile_ttl());
        if let Some(observer) = self.observer {
            profiles = profiles.with_observer(observer);
        }

        info!(
            backend = store.backend_name(),
            roles = ?self.sources.roles(),
            hasher = hasher.hasher_name(),
            fail_mode = ?config.session.fail_mode,
            "session service ready"
        );

        Ok(SessionService {
            validator: CredentialValidator::new(self.sources, hasher, dummy_hash),
            throttle: LoginThrottle::new(
                store.clone(),
                config.throttle.clone(),
                config.session.fail_mode,
            ),
            tokens: TokenLifecycle::new(store, jwt, clock.clone(), &config),
            profiles,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            clock,
            config,
        })
    }
}
