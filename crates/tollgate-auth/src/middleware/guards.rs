//! Access pipeline stages

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::warn;

use super::{AccessConfig, AccessStage, AccessState, Flow, TokenSource};
use crate::{audit::RequestContext, principal::Role, session::SessionService, AuthError, AuthResult};

/// Stops the pipeline for public paths and everything beneath them
#[derive(Debug, Clone)]
pub struct SkipPaths {
    prefixes: HashSet<String>,
}

impl SkipPaths {
    pub fn new(prefixes: HashSet<String>) -> Self {
        Self { prefixes }
    }

    /// Matches whole path segments, so `/health` covers `/health/live`
    /// but not `/healthcare`
    pub fn should_skip_path(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
                None => false,
            }
        })
    }
}

#[async_trait]
impl AccessStage for SkipPaths {
    fn name(&self) -> &'static str {
        "skip_paths"
    }

    async fn run(
        &self,
        _service: &SessionService,
        source: &dyn TokenSource,
        _context: &RequestContext,
        _state: &mut AccessState,
    ) -> AuthResult<Flow> {
        if self.should_skip_path(source.path()) {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

/// Pulls the access token from the header, falling back to a cookie
#[derive(Debug, Clone)]
pub struct ExtractToken {
    header_name: String,
    token_prefix: String,
    cookie: Option<String>,
    optional: bool,
}

impl ExtractToken {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            header_name: config.header_name.clone(),
            token_prefix: config.token_prefix.clone(),
            cookie: config.access_cookie.clone(),
            optional: config.optional,
        }
    }

    /// Extract the token from the source.
    ///
    /// A header with the wrong scheme is an error rather than a missing token.
    pub fn extract(&self, source: &dyn TokenSource) -> AuthResult<Option<String>> {
        if let Some(header_value) = source.header(&self.header_name) {
            let token = header_value
                .strip_prefix(self.token_prefix.as_str())
                .ok_or(AuthError::Unauthorized)?
                .trim();
            if !token.is_empty() {
                return Ok(Some(token.to_string()));
            }
        }

        Ok(self
            .cookie
            .as_deref()
            .and_then(|name| source.cookie(name))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl AccessStage for ExtractToken {
    fn name(&self) -> &'static str {
        "extract_token"
    }

    async fn run(
        &self,
        _service: &SessionService,
        source: &dyn TokenSource,
        _context: &RequestContext,
        state: &mut AccessState,
    ) -> AuthResult<Flow> {
        match self.extract(source)? {
            Some(token) => {
                state.access_token = Some(token);
                Ok(Flow::Continue)
            }
            None if self.optional => Ok(Flow::Stop),
            None => Err(AuthError::Unauthorized),
        }
    }
}

/// Verifies the access token and the force-logout flag
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyAccess;

#[async_trait]
impl AccessStage for VerifyAccess {
    fn name(&self) -> &'static str {
        "verify_access"
    }

    async fn run(
        &self,
        service: &SessionService,
        _source: &dyn TokenSource,
        _context: &RequestContext,
        state: &mut AccessState,
    ) -> AuthResult<Flow> {
        let token = state.access_token.as_deref().ok_or(AuthError::Unauthorized)?;
        state.claims = Some(service.validate(token).await?);
        Ok(Flow::Continue)
    }
}

/// Admits only the listed roles
#[derive(Debug, Clone)]
pub struct RequireRole {
    roles: Vec<Role>,
}

impl RequireRole {
    pub fn new(roles: Vec<Role>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl AccessStage for RequireRole {
    fn name(&self) -> &'static str {
        "require_role"
    }

    async fn run(
        &self,
        _service: &SessionService,
        _source: &dyn TokenSource,
        _context: &RequestContext,
        state: &mut AccessState,
    ) -> AuthResult<Flow> {
        let claims = state.claims.as_ref().ok_or(AuthError::Unauthorized)?;
        if self.roles.contains(&claims.role) {
            Ok(Flow::Continue)
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Redeems the refresh token when the access token is about to expire
#[derive(Debug, Clone)]
pub struct ProactiveRotation {
    cookie: Option<String>,
    header: Option<String>,
}

impl ProactiveRotation {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            cookie: config.refresh_cookie.clone(),
            header: config.refresh_header.clone(),
        }
    }

    fn refresh_token<'a>(&self, source: &'a dyn TokenSource) -> Option<&'a str> {
        let from_header = self.header.as_deref().and_then(|name| source.header(name));
        let from_cookie = || self.cookie.as_deref().and_then(|name| source.cookie(name));
        from_header.or_else(from_cookie).filter(|token| !token.trim().is_empty())
    }
}

#[async_trait]
impl AccessStage for ProactiveRotation {
    fn name(&self) -> &'static str {
        "proactive_rotation"
    }

    async fn run(
        &self,
        service: &SessionService,
        source: &dyn TokenSource,
        context: &RequestContext,
        state: &mut AccessState,
    ) -> AuthResult<Flow> {
        let (claims, refresh_token) = match (state.claims.as_ref(), self.refresh_token(source)) {
            (Some(claims), Some(refresh_token)) => (claims, refresh_token),
            _ => return Ok(Flow::Continue),
        };

        match service.rotate_if_expiring(claims, refresh_token, context).await {
            Ok(rotated) => state.rotated = rotated,
            // Replay tore every session down, including this one
            Err(AuthError::SecurityViolation) => return Err(AuthError::Unauthorized),
            // The access token is still valid; the client refreshes later
            Err(e) => warn!(error = %e, "proactive rotation skipped"),
        }

        Ok(Flow::Continue)
    }
}
