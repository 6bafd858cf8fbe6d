//! Authentication configuration types and utilities

use crate::{principal::Role, utils::CryptoUtils, AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Login throttling
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Refresh rotation, reuse tracking and force logout
    #[serde(default)]
    pub session: SessionConfig,

    /// Password hashing
    #[serde(default)]
    pub password: PasswordConfig,

    /// Profile read-through cache
    #[serde(default)]
    pub profile_cache: ProfileCacheConfig,

    /// Roles allowed to force-logout other principals
    #[serde(default = "default_force_logout_roles")]
    pub force_logout_roles: Vec<Role>,
}

/// JWT token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for access token signing; there is no usable default
    #[serde(default)]
    pub secret: String,

    /// Separate secret for refresh tokens; falls back to `secret`
    pub refresh_secret: Option<String>,

    /// JWT signing algorithm (HS256, HS384, HS512)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Access token expiration time in seconds
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: u64,

    /// Refresh token expiration time in seconds
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: u64,

    /// JWT issuer
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,

    /// JWT audience
    pub audience: Option<String>,
}

/// Failed-login throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Failed attempts allowed per login name and role before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Counting window in seconds, started by the first failure
    #[serde(default = "default_throttle_window")]
    pub window_seconds: u64,
}

/// What a store-dependent security check answers while the store is down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Allow: no lockout, no force-logout enforcement, no reuse detection
    Open,
    /// Deny: treat the principal as locked or revoked
    Closed,
}

impl FromStr for FailMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(AuthError::config_error(format!(
                "invalid fail mode '{}', expected open or closed",
                other
            ))),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a rotated refresh token is remembered for reuse detection (seconds)
    #[serde(default = "default_reuse_tracking_window")]
    pub reuse_tracking_window: u64,

    /// Force-logout flag lifetime in seconds; `None` uses the access token expiry
    pub force_logout_ttl: Option<u64>,

    /// Remaining access-token lifetime below which requests rotate proactively (seconds)
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: u64,

    /// Behaviour of lockout, force-logout and reuse checks during store outages
    #[serde(default = "default_fail_mode")]
    pub fail_mode: FailMode,
}

/// Password hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// Password hashing algorithm (bcrypt, argon2)
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Bcrypt cost factor (if using bcrypt)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Argon2 memory cost in KB (if using argon2)
    #[serde(default = "default_argon2_memory")]
    pub argon2_memory: u32,

    /// Argon2 time cost (iterations)
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism factor
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

/// Profile cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCacheConfig {
    /// Cached profile lifetime in seconds
    #[serde(default = "default_profile_ttl")]
    pub ttl_seconds: u64,
}

// Default value functions
fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
fn default_access_token_expiry() -> u64 {
    15 * 60
} // 15 minutes
fn default_refresh_token_expiry() -> u64 {
    7 * 24 * 60 * 60
} // 7 days
fn default_jwt_issuer() -> String {
    "tollgate".to_string()
}
fn default_max_attempts() -> u32 {
    10
}
fn default_throttle_window() -> u64 {
    10 * 60
} // 10 minutes
fn default_reuse_tracking_window() -> u64 {
    60 * 60
} // 1 hour
fn default_rotation_threshold() -> u64 {
    5 * 60
}
fn default_fail_mode() -> FailMode {
    FailMode::Open
}
fn default_hash_algorithm() -> String {
    "bcrypt".to_string()
}
fn default_bcrypt_cost() -> u32 {
    10
}
fn default_argon2_memory() -> u32 {
    19456
} // 19 MB
fn default_argon2_iterations() -> u32 {
    2
}
fn default_argon2_parallelism() -> u32 {
    1
}
fn default_profile_ttl() -> u64 {
    15 * 60
}
fn default_force_logout_roles() -> Vec<Role> {
    vec![Role::Admin]
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            refresh_secret: None,
            algorithm: default_jwt_algorithm(),
            access_token_expiry: default_access_token_expiry(),
            refresh_token_expiry: default_refresh_token_expiry(),
            issuer: default_jwt_issuer(),
            audience: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt: JwtConfig::default(),
            throttle: ThrottleConfig::default(),
            session: SessionConfig::default(),
            password: PasswordConfig::default(),
            profile_cache: ProfileCacheConfig::default(),
            force_logout_roles: default_force_logout_roles(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_throttle_window(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reuse_tracking_window: default_reuse_tracking_window(),
            force_logout_ttl: None,
            rotation_threshold: default_rotation_threshold(),
            fail_mode: default_fail_mode(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: default_hash_algorithm(),
            bcrypt_cost: default_bcrypt_cost(),
            argon2_memory: default_argon2_memory(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_profile_ttl(),
        }
    }
}

impl JwtConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_expiry)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expiry)
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl AuthConfig {
    /// Create a development configuration.
    ///
    /// Signs with a random per-process secret, so tokens do not survive a restart.
    pub fn development() -> Self {
        let mut config = Self::default();
        config.jwt.secret = CryptoUtils::generate_jwt_secret(None);
        config.password.bcrypt_cost = 4; // Fast hashing for local runs
        config
    }

    /// Create a production configuration with strict defaults.
    ///
    /// The JWT secret is left empty and must be supplied before `validate` passes.
    pub fn production() -> Self {
        let mut config = Self::default();
        config.password.bcrypt_cost = 12;
        config
    }

    /// Reuse tracking window as a duration
    pub fn reuse_tracking_window(&self) -> Duration {
        Duration::from_secs(self.session.reuse_tracking_window)
    }

    /// Force-logout flag lifetime, never shorter than an access token
    pub fn force_logout_ttl(&self) -> Duration {
        let ttl = self
            .session
            .force_logout_ttl
            .unwrap_or(self.jwt.access_token_expiry)
            .max(self.jwt.access_token_expiry);
        Duration::from_secs(ttl)
    }

    pub fn rotation_threshold(&self) -> Duration {
        Duration::from_secs(self.session.rotation_threshold)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_cache.ttl_seconds)
    }

    /// Load configuration from `TOLLGATE_*` environment variables over the defaults.
    ///
    /// `TOLLGATE_JWT_SECRET` is required.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> AuthResult<Self> {
        let mut config = Self::default();

        config.jwt.secret = var("TOLLGATE_JWT_SECRET")
            .ok_or_else(|| AuthError::config_error("TOLLGATE_JWT_SECRET is not set"))?;
        config.jwt.refresh_secret = var("TOLLGATE_JWT_REFRESH_SECRET");
        if let Some(algorithm) = var("TOLLGATE_JWT_ALGORITHM") {
            config.jwt.algorithm = algorithm;
        }
        if let Some(issuer) = var("TOLLGATE_JWT_ISSUER") {
            config.jwt.issuer = issuer;
        }
        config.jwt.audience = var("TOLLGATE_JWT_AUDIENCE");
        config.jwt.access_token_expiry =
            env_number(&var, "TOLLGATE_ACCESS_TOKEN_TTL", config.jwt.access_token_expiry)?;
        config.jwt.refresh_token_expiry =
            env_number(&var, "TOLLGATE_REFRESH_TOKEN_TTL", config.jwt.refresh_token_expiry)?;

        config.throttle.max_attempts =
            env_number(&var, "TOLLGATE_MAX_LOGIN_ATTEMPTS", config.throttle.max_attempts)?;
        config.throttle.window_seconds =
            env_number(&var, "TOLLGATE_LOGIN_WINDOW", config.throttle.window_seconds)?;

        config.session.reuse_tracking_window = env_number(
            &var,
            "TOLLGATE_REUSE_TRACKING_WINDOW",
            config.session.reuse_tracking_window,
        )?;
        if let Some(ttl) = var("TOLLGATE_FORCE_LOGOUT_TTL") {
            config.session.force_logout_ttl =
                Some(parse_number("TOLLGATE_FORCE_LOGOUT_TTL", &ttl)?);
        }
        config.session.rotation_threshold =
            env_number(&var, "TOLLGATE_ROTATION_THRESHOLD", config.session.rotation_threshold)?;
        if let Some(mode) = var("TOLLGATE_FAIL_MODE") {
            config.session.fail_mode = mode.parse()?;
        }

        if let Some(algorithm) = var("TOLLGATE_PASSWORD_ALGORITHM") {
            config.password.hash_algorithm = algorithm;
        }
        config.password.bcrypt_cost =
            env_number(&var, "TOLLGATE_BCRYPT_COST", config.password.bcrypt_cost)?;

        config.profile_cache.ttl_seconds =
            env_number(&var, "TOLLGATE_PROFILE_TTL", config.profile_cache.ttl_seconds)?;

        if let Some(roles) = var("TOLLGATE_FORCE_LOGOUT_ROLES") {
            config.force_logout_roles = roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(Role::from_str)
                .collect::<AuthResult<Vec<_>>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AuthResult<()> {
        if self.jwt.secret.is_empty() {
            return Err(AuthError::config_error("JWT secret is not set"));
        }
        if self.jwt.secret.len() < 32 {
            return Err(AuthError::config_error("JWT secret must be at least 32 characters"));
        }

        if let Some(refresh_secret) = &self.jwt.refresh_secret {
            if refresh_secret.len() < 32 {
                return Err(AuthError::config_error(
                    "JWT refresh secret must be at least 32 characters",
                ));
            }
        }

        if !["HS256", "HS384", "HS512"].contains(&self.jwt.algorithm.as_str()) {
            return Err(AuthError::config_error("Invalid JWT algorithm"));
        }

        let access = self.jwt.access_token_expiry;
        if access == 0 || self.jwt.refresh_token_expiry <= access {
            return Err(AuthError::config_error(
                "Refresh token expiry must be longer than a non-zero access token expiry",
            ));
        }

        if let Some(ttl) = self.session.force_logout_ttl {
            if ttl < self.jwt.access_token_expiry {
                return Err(AuthError::config_error(
                    "Force-logout flag TTL must be at least the access token expiry",
                ));
            }
        }

        if self.session.rotation_threshold >= self.jwt.access_token_expiry {
            return Err(AuthError::config_error(
                "Rotation threshold must be shorter than the access token expiry",
            ));
        }

        if self.throttle.max_attempts == 0 || self.throttle.window_seconds == 0 {
            return Err(AuthError::config_error(
                "Throttle max_attempts and window must be positive",
            ));
        }

        if !["bcrypt", "argon2"].contains(&self.password.hash_algorithm.as_str()) {
            return Err(AuthError::config_error("Invalid password hashing algorithm"));
        }

        if self.force_logout_roles.is_empty() {
            return Err(AuthError::config_error(
                "At least one role must be allowed to force logout",
            ));
        }

        Ok(())
    }
}

fn env_number<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    current: T,
) -> AuthResult<T> {
    match var(name) {
        Some(raw) => parse_number(name, &raw),
        None => Ok(current),
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> AuthResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AuthError::config_error(format!("{} must be a number, got '{}'", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "a-very-long-secret-value-for-the-tests";

    fn with_secret() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.jwt.secret = SECRET.to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = with_secret();
        assert_eq!(config.jwt.algorithm, "HS256");
        assert_eq!(config.throttle.max_attempts, 10);
        assert_eq!(config.throttle.window_seconds, 600);
        assert_eq!(config.session.fail_mode, FailMode::Open);
        assert_eq!(config.password.hash_algorithm, "bcrypt");
        assert_eq!(config.force_logout_roles, vec![Role::Admin]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let config = with_secret();
        assert_eq!(config.jwt.access_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(config.jwt.refresh_ttl(), Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.reuse_tracking_window(), Duration::from_secs(3600));
        assert_eq!(config.profile_ttl(), Duration::from_secs(900));
        assert_eq!(config.rotation_threshold(), Duration::from_secs(300));
    }

    #[test]
    fn test_force_logout_ttl_never_below_access_ttl() {
        let mut config = with_secret();
        assert_eq!(config.force_logout_ttl(), config.jwt.access_ttl());

        config.session.force_logout_ttl = Some(60);
        assert_eq!(config.force_logout_ttl(), config.jwt.access_ttl());
        assert!(config.validate().is_err());

        config.session.force_logout_ttl = Some(3600);
        assert_eq!(config.force_logout_ttl(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = with_secret();

        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        config.jwt.secret = "long-enough-secret-key-for-validation".to_string();
        config.jwt.algorithm = "RS256".to_string();
        assert!(config.validate().is_err());

        config.jwt.algorithm = "HS512".to_string();
        config.throttle.max_attempts = 0;
        assert!(config.validate().is_err());

        config.throttle.max_attempts = 3;
        config.session.rotation_threshold = config.jwt.access_token_expiry;
        assert!(config.validate().is_err());

        config.session.rotation_threshold = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_keeps_force_logout_roles() {
        let config = AuthConfig::default();
        assert_eq!(config.force_logout_roles, vec![Role::Admin]);

        let config = AuthConfig {
            jwt: JwtConfig {
                secret: SECRET.to_string(),
                ..JwtConfig::default()
            },
            ..AuthConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let development = AuthConfig::development();
        assert!(development.validate().is_ok());
        assert_eq!(development.password.bcrypt_cost, 4);
        assert_ne!(development.jwt.secret, AuthConfig::development().jwt.secret);

        let mut production = AuthConfig::production();
        assert_eq!(production.password.bcrypt_cost, 12);
        assert!(production.validate().is_err());
        production.jwt.secret = SECRET.to_string();
        assert!(production.validate().is_ok());
    }

    #[test]
    fn test_no_secret_is_rejected() {
        let err = AuthConfig::default().validate().unwrap_err();
        assert_eq!(err, AuthError::config_error("JWT secret is not set"));
    }

    #[test]
    fn test_env_requires_secret() {
        let vars: HashMap<&str, &str> =
            [("TOLLGATE_MAX_LOGIN_ATTEMPTS", "5")].into_iter().collect();
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());
        assert!(AuthConfig::from_vars(lookup).is_err());

        let vars: HashMap<&str, &str> = [
            ("TOLLGATE_JWT_SECRET", SECRET),
            ("TOLLGATE_MAX_LOGIN_ATTEMPTS", "5"),
            ("TOLLGATE_FORCE_LOGOUT_ROLES", "admin, master"),
        ]
        .into_iter()
        .collect();
        let config = AuthConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.jwt.secret, SECRET);
        assert_eq!(config.throttle.max_attempts, 5);
        assert_eq!(config.force_logout_roles, vec![Role::Admin, Role::Master]);
    }

    #[test]
    fn test_fail_mode_parsing() {
        assert_eq!("OPEN".parse::<FailMode>().unwrap(), FailMode::Open);
        assert_eq!("closed".parse::<FailMode>().unwrap(), FailMode::Closed);
        assert!("maybe".parse::<FailMode>().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let raw = r#"{
            "jwt": {
                "secret": "a-very-long-secret-value-for-the-tests",
                "access_token_expiry": 600
            },
            "session": { "fail_mode": "closed" },
            "force_logout_roles": ["admin", "master"]
        }"#;
        let config: AuthConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.jwt.access_token_expiry, 600);
        assert_eq!(config.jwt.refresh_token_expiry, 7 * 24 * 60 * 60);
        assert_eq!(config.session.fail_mode, FailMode::Closed);
        assert_eq!(config.throttle.max_attempts, 10);
        assert_eq!(config.force_logout_roles, vec![Role::Admin, Role::Master]);
        assert!(config.validate().is_ok());
    }
}
