//! JWT access and refresh token codec
//!
//! Signature and claim-shape checks are delegated to `jsonwebtoken`; expiry is
//! checked against the injected [`Clock`] so TTL behaviour stays testable.

use crate::{
    config::JwtConfig,
    principal::{Principal, Role, RoleAttributes},
    AuthError, AuthResult,
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tollgate_store::Clock;
use tracing::debug;
use uuid::Uuid;

/// Which half of a token pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both access and refresh tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Principal ID
    pub sub: String,
    pub role: Role,
    pub login_name: String,
    pub display_name: String,
    #[serde(default)]
    pub attrs: RoleAttributes,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
    pub typ: TokenKind,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl TokenClaims {
    /// Rebuild the principal the token was issued to
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.sub.clone(),
            login_name: self.login_name.clone(),
            role: self.role,
            display_name: self.display_name.clone(),
            attributes: self.attrs.clone(),
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    /// Lifetime left at `now`, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        std::time::Duration::from_secs((self.exp - now.timestamp()).max(0) as u64)
    }
}

/// Access and refresh token pair handed to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: u64,
}

/// A freshly minted pair together with its decoded claims
#[derive(Debug, Clone)]
pub struct MintedPair {
    pub pair: TokenPair,
    pub access: TokenClaims,
    pub refresh: TokenClaims,
}

/// JWT provider signing and verifying both token kinds
pub struct JwtProvider {
    config: JwtConfig,
    algorithm: Algorithm,
    access_keys: (EncodingKey, DecodingKey),
    refresh_keys: (EncodingKey, DecodingKey),
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for JwtProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtProvider")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.config.issuer)
            .field("separate_refresh_secret", &self.config.refresh_secret.is_some())
            .finish()
    }
}

impl JwtProvider {
    /// Create a new JWT provider
    pub fn new(config: JwtConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            AuthError::config_error(format!("Unsupported JWT algorithm: {}", config.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::config_error("Only HMAC JWT algorithms are supported"));
        }
        if config.secret.is_empty() {
            return Err(AuthError::config_error("JWT secret is not set"));
        }

        let access_secret = config.secret.as_bytes();
        let refresh_secret = config
            .refresh_secret
            .as_deref()
            .map(str::as_bytes)
            .unwrap_or(access_secret);

        Ok(Self {
            algorithm,
            access_keys: (
                EncodingKey::from_secret(access_secret),
                DecodingKey::from_secret(access_secret),
            ),
            refresh_keys: (
                EncodingKey::from_secret(refresh_secret),
                DecodingKey::from_secret(refresh_secret),
            ),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    fn keys(&self, kind: TokenKind) -> &(EncodingKey, DecodingKey) {
        match kind {
            TokenKind::Access => &self.access_keys,
            TokenKind::Refresh => &self.refresh_keys,
        }
    }

    fn ttl_seconds(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.config.access_token_expiry,
            TokenKind::Refresh => self.config.refresh_token_expiry,
        }
    }

    /// Sign a single token for the principal
    pub fn mint(
        &self,
        principal: &Principal,
        kind: TokenKind,
    ) -> AuthResult<(String, TokenClaims)> {
        let now = self.clock.now().timestamp();
        let claims = TokenClaims {
            sub: principal.id.clone(),
            role: principal.role,
            login_name: principal.login_name.clone(),
            display_name: principal.display_name.clone(),
            attrs: principal.attributes.clone(),
            iat: now,
            exp: now + self.ttl_seconds(kind) as i64,
            jti: Uuid::new_v4().to_string(),
            typ: kind,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.keys(kind).0).map_err(|e| {
            AuthError::crypto_error(format!("Failed to sign {:?} token: {}", kind, e))
        })?;
        Ok((token, claims))
    }

    /// Sign an access and a refresh token for the principal
    pub fn mint_pair(&self, principal: &Principal) -> AuthResult<MintedPair> {
        let (access_token, access) = self.mint(principal, TokenKind::Access)?;
        let (refresh_token, refresh) = self.mint(principal, TokenKind::Refresh)?;

        Ok(MintedPair {
            pair: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.config.access_token_expiry,
                refresh_expires_in: self.config.refresh_token_expiry,
            },
            access,
            refresh,
        })
    }

    /// Verify signature, issuer, audience, kind and expiry.
    ///
    /// Every failure collapses into [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str, kind: TokenKind) -> AuthResult<TokenClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<TokenClaims>(token, &self.keys(kind).1, &validation)
            .map_err(|e| {
                debug!("{:?} token rejected: {}", kind, e);
                AuthError::InvalidToken
            })?
            .claims;

        if claims.typ != kind {
            debug!("expected {:?} token, got {:?}", kind, claims.typ);
            return Err(AuthError::InvalidToken);
        }

        if claims.is_expired_at(self.clock.now()) {
            debug!("{:?} token {} expired", kind, claims.jti);
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate_store::ManualClock;

    fn provider(clock: Arc<ManualClock>) -> JwtProvider {
        let config = JwtConfig {
            secret: "test-access-secret-that-is-long-enough".to_string(),
            refresh_secret: Some("test-refresh-secret-that-is-long-enough".to_string()),
            ..JwtConfig::default()
        };
        JwtProvider::new(config, clock).unwrap()
    }

    fn principal() -> Principal {
        Principal::new("7", "dir.one", Role::Director, "Director One")
            .with_attribute("branch_id", 3)
    }

    #[test]
    fn test_mint_and_verify_pair() {
        let clock = Arc::new(ManualClock::starting_now());
        let jwt = provider(clock.clone());

        let minted = jwt.mint_pair(&principal()).unwrap();
        assert_eq!(minted.pair.token_type, "Bearer");
        assert_eq!(minted.pair.expires_in, 15 * 60);
        assert_ne!(minted.access.jti, minted.refresh.jti);

        let access = jwt.verify(&minted.pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.principal(), principal());
        assert_eq!(access.typ, TokenKind::Access);
        assert_eq!(access.exp - access.iat, 15 * 60);

        let refresh = jwt.verify(&minted.pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.attrs["branch_id"], serde_json::json!(3));
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let clock = Arc::new(ManualClock::starting_now());
        let jwt = provider(clock);

        let minted = jwt.mint_pair(&principal()).unwrap();
        assert_eq!(
            jwt.verify(&minted.pair.access_token, TokenKind::Refresh),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            jwt.verify(&minted.pair.refresh_token, TokenKind::Access),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_expiry_follows_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let jwt = provider(clock.clone());

        let (token, claims) = jwt.mint(&principal(), TokenKind::Access).unwrap();
        clock.advance(Duration::from_secs(14 * 60));
        assert!(jwt.verify(&token, TokenKind::Access).is_ok());
        assert_eq!(claims.remaining_at(clock.now()).as_secs(), 60);

        clock.advance(Duration::from_secs(60));
        assert_eq!(jwt.verify(&token, TokenKind::Access), Err(AuthError::InvalidToken));
        assert_eq!(claims.remaining_at(clock.now()).as_secs(), 0);
    }

    #[test]
    fn test_tampered_and_foreign_tokens_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let jwt = provider(clock.clone());
        let (token, _) = jwt.mint(&principal(), TokenKind::Access).unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(jwt.verify(&tampered, TokenKind::Access), Err(AuthError::InvalidToken));
        assert_eq!(jwt.verify("not.a.jwt", TokenKind::Access), Err(AuthError::InvalidToken));

        let other = JwtProvider::new(
            JwtConfig {
                secret: "a-completely-different-secret-value-here".to_string(),
                ..JwtConfig::default()
            },
            clock,
        )
        .unwrap();
        assert_eq!(other.verify(&token, TokenKind::Access), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_audience_enforced_when_configured() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_now());
        let with_audience = JwtProvider::new(
            JwtConfig {
                secret: "shared-secret-for-both-audience-providers".to_string(),
                audience: Some("backoffice".to_string()),
                ..JwtConfig::default()
            },
            clock.clone(),
        )
        .unwrap();
        let (token, claims) = with_audience.mint(&principal(), TokenKind::Access).unwrap();
        assert_eq!(claims.aud.as_deref(), Some("backoffice"));
        assert!(with_audience.verify(&token, TokenKind::Access).is_ok());

        let other_audience = JwtProvider::new(
            JwtConfig {
                secret: "shared-secret-for-both-audience-providers".to_string(),
                audience: Some("storefront".to_string()),
                ..JwtConfig::default()
            },
            clock,
        )
        .unwrap();
        assert_eq!(other_audience.verify(&token, TokenKind::Access), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_rejects_missing_secret() {
        let result = JwtProvider::new(JwtConfig::default(), Arc::new(ManualClock::starting_now()));
        assert!(matches!(result, Err(AuthError::ConfigurationError { .. })));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let config = JwtConfig {
            algorithm: "RS256".to_string(),
            ..JwtConfig::default()
        };
        assert!(JwtProvider::new(config, Arc::new(ManualClock::starting_now())).is_err());
    }
}
