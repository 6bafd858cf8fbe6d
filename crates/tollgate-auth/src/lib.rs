//! # tollgate-auth: multi-role authentication and session lifecycle
//!
//! Sign-in for several independent principal populations (admin, director,
//! master, operator) with per-role credential sources, a login throttle,
//! single-use refresh tokens with reuse detection, administrative force
//! logout and a read-through profile cache.
//!
//! All ephemeral state lives in a [`tollgate_store::SessionStore`], so several
//! service instances can share one backend.

pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod logging;
pub mod middleware;
pub mod principal;
pub mod profile;
pub mod providers;
pub mod session;
pub mod throttle;
pub mod tokens;
pub mod traits;
pub mod utils;

// Error handling
pub use error::AuthError;

// Seams implemented by the embedding application
pub use traits::{AuditSink, CredentialSource, PasswordHasher, ProfileLookup};

// Configuration
pub use config::{
    AuthConfig, FailMode, JwtConfig, PasswordConfig, ProfileCacheConfig, SessionConfig,
    ThrottleConfig,
};

// Principals
pub use principal::{CredentialRecord, EligibilityFlags, Principal, Role};

// Components
pub use audit::{AuditEvent, AuditEventType, RequestContext};
pub use credentials::{CredentialSources, CredentialValidator, DummyHash};
pub use profile::{CacheObserver, CacheStats, ProfileCache};
pub use providers::jwt::{JwtProvider, TokenClaims, TokenKind, TokenPair};
pub use throttle::{LoginThrottle, ThrottleStatus};
pub use tokens::{RevocationReason, TokenLifecycle};

// Orchestration
pub use middleware::{AccessConfig, AccessOutcome, AccessPipeline, HeaderTokenSource, TokenSource};
pub use session::{LoginResponse, SessionService, SessionServiceBuilder};

pub use logging::{init_logging, LoggingConfig};

/// Authentication result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication system version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
