//! Access pipeline for authenticated requests
//!
//! The pipeline is framework-agnostic: callers hand in a [`TokenSource`]
//! describing the request and get back the authenticated principal, plus a
//! rotated token pair when the access token was close to expiry.

pub mod guards;

use crate::{
    audit::RequestContext,
    principal::{Principal, Role},
    providers::jwt::{TokenClaims, TokenPair},
    session::SessionService,
    AuthError, AuthResult,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub use guards::{ExtractToken, ProactiveRotation, RequireRole, SkipPaths, VerifyAccess};

// Default values for token extraction
const DEFAULT_HEADER_NAME: &str = "authorization";
const DEFAULT_TOKEN_PREFIX: &str = "Bearer ";
const DEFAULT_ACCESS_COOKIE: &str = "access_token";
const DEFAULT_REFRESH_COOKIE: &str = "refresh_token";
const DEFAULT_REFRESH_HEADER: &str = "x-refresh-token";
const DEFAULT_SKIP_PATHS: &[&str] = &["/health", "/metrics"];

/// Read-only view of the request parts tokens can come from
pub trait TokenSource: Send + Sync {
    fn path(&self) -> &str;

    /// Header value, looked up case-insensitively
    fn header(&self, name: &str) -> Option<&str>;

    fn cookie(&self, name: &str) -> Option<&str>;
}

/// Token source over plain header and cookie maps
#[derive(Debug, Clone, Default)]
pub struct HeaderTokenSource {
    path: String,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl HeaderTokenSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a header; a `Cookie` header is also split into cookies
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        if name == "cookie" {
            for pair in value.split(';') {
                if let Some((k, v)) = pair.split_once('=') {
                    self.cookies.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Shorthand for an `Authorization: Bearer <token>` header
    pub fn with_bearer(self, token: impl AsRef<str>) -> Self {
        self.with_header(DEFAULT_HEADER_NAME, format!("{}{}", DEFAULT_TOKEN_PREFIX, token.as_ref()))
    }
}

impl TokenSource for HeaderTokenSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Access pipeline configuration
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Path prefixes served without authentication
    pub skip_paths: HashSet<String>,

    /// Header carrying the access token
    pub header_name: String,

    /// Token prefix (e.g., "Bearer ")
    pub token_prefix: String,

    /// Cookie carrying the access token when the header is absent
    pub access_cookie: Option<String>,

    /// Cookie and header carrying the refresh token for proactive rotation
    pub refresh_cookie: Option<String>,
    pub refresh_header: Option<String>,

    /// Whether a request without any token may continue anonymously
    pub optional: bool,

    /// Roles allowed through (any of); empty allows every role
    pub required_roles: Vec<Role>,

    /// Rotate tokens close to expiry on the response path
    pub proactive_rotation: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            skip_paths: DEFAULT_SKIP_PATHS.iter().map(|s| s.to_string()).collect(),
            header_name: DEFAULT_HEADER_NAME.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            access_cookie: Some(DEFAULT_ACCESS_COOKIE.to_string()),
            refresh_cookie: Some(DEFAULT_REFRESH_COOKIE.to_string()),
            refresh_header: Some(DEFAULT_REFRESH_HEADER.to_string()),
            optional: false,
            required_roles: Vec::new(),
            proactive_rotation: true,
        }
    }
}

impl AccessConfig {
    pub fn skip_path<S: Into<String>>(mut self, path: S) -> Self {
        self.skip_paths.insert(path.into());
        self
    }

    pub fn require_role(mut self, role: Role) -> Self {
        self.required_roles.push(role);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn without_rotation(mut self) -> Self {
        self.proactive_rotation = false;
        self
    }
}

/// State threaded through the stages of one request
#[derive(Debug, Default)]
pub struct AccessState {
    pub access_token: Option<String>,
    pub claims: Option<TokenClaims>,
    pub rotated: Option<TokenPair>,
}

/// Whether the pipeline continues after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop without authenticating (public path or anonymous request)
    Stop,
}

/// One step of the access pipeline
#[async_trait]
pub trait AccessStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        service: &SessionService,
        source: &dyn TokenSource,
        context: &RequestContext,
        state: &mut AccessState,
    ) -> AuthResult<Flow>;
}

/// Authenticated request
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub principal: Principal,
    pub claims: TokenClaims,
    /// New pair to hand back to the client when rotation happened
    pub rotated: Option<TokenPair>,
}

/// Pipeline verdict for a request
#[derive(Debug, Clone)]
pub enum AccessOutcome {
    /// Skipped path or optional request without credentials
    Anonymous,
    Authenticated(AccessContext),
}

impl AccessOutcome {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AccessOutcome::Anonymous => None,
            AccessOutcome::Authenticated(access) => Some(&access.principal),
        }
    }
}

/// Ordered access stages
#[derive(Default)]
pub struct AccessPipeline {
    stages: Vec<Box<dyn AccessStage>>,
}

impl std::fmt::Debug for AccessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("AccessPipeline").field("stages", &names).finish()
    }
}

impl AccessPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual chain: skip paths, extract, verify, role check, rotation
    pub fn standard(config: AccessConfig) -> Self {
        let mut pipeline = Self::new()
            .stage(SkipPaths::new(config.skip_paths.clone()))
            .stage(ExtractToken::new(&config))
            .stage(VerifyAccess);
        if !config.required_roles.is_empty() {
            pipeline = pipeline.stage(RequireRole::new(config.required_roles.clone()));
        }
        if config.proactive_rotation {
            pipeline = pipeline.stage(ProactiveRotation::new(&config));
        }
        pipeline
    }

    pub fn stage<S: AccessStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Run every stage in order for one request
    pub async fn authorize(
        &self,
        service: &SessionService,
        source: &dyn TokenSource,
        context: &RequestContext,
    ) -> AuthResult<AccessOutcome> {
        let mut state = AccessState::default();

        for stage in &self.stages {
            match stage.run(service, source, context, &mut state).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    debug!(stage = stage.name(), path = source.path(), "access pipeline stopped");
                    return Ok(AccessOutcome::Anonymous);
                }
                Err(e) => {
                    debug!(stage = stage.name(), path = source.path(), error = %e, "access denied");
                    return Err(e);
                }
            }
        }

        let claims = state.claims.ok_or(AuthError::Unauthorized)?;
        Ok(AccessOutcome::Authenticated(AccessContext {
            principal: claims.principal(),
            claims,
            rotated: state.rotated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_source_lookup() {
        let source = HeaderTokenSource::new("/api/me")
            .with_header("Authorization", "Bearer abc")
            .with_header("Cookie", "refresh_token=r1; theme=dark");

        assert_eq!(source.path(), "/api/me");
        assert_eq!(source.header("authorization"), Some("Bearer abc"));
        assert_eq!(source.header("AUTHORIZATION"), Some("Bearer abc"));
        assert_eq!(source.cookie("refresh_token"), Some("r1"));
        assert_eq!(source.cookie("theme"), Some("dark"));
        assert_eq!(source.cookie("missing"), None);
    }

    #[test]
    fn test_bearer_shorthand() {
        let source = HeaderTokenSource::new("/").with_bearer("tok");
        assert_eq!(source.header("Authorization"), Some("Bearer tok"));
    }

    #[test]
    fn test_access_config_defaults() {
        let config = AccessConfig::default().skip_path("/login").require_role(Role::Admin);
        assert!(config.skip_paths.contains("/health"));
        assert!(config.skip_paths.contains("/login"));
        assert_eq!(config.required_roles, vec![Role::Admin]);
        assert!(config.proactive_rotation);
        assert!(!config.without_rotation().proactive_rotation);
    }
}
