//! Ports the session engine consumes

use async_trait::async_trait;
use crate::{
    audit::AuditEvent,
    principal::{CredentialRecord, Role},
    AuthResult,
};

/// Durable credential lookup for a single role
///
/// Each role keeps its accounts in its own storage; one implementation per
/// role is registered in a [`CredentialSources`](crate::credentials::CredentialSources) map.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The role this source answers for
    fn role(&self) -> Role;

    /// Find the credential for a login name, `None` when no account matches
    async fn find_by_login(&self, login_name: &str) -> AuthResult<Option<CredentialRecord>>;
}

/// Role-specific profile projection loader
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn load_profile(
        &self,
        role: Role,
        principal_id: &str,
    ) -> AuthResult<Option<serde_json::Value>>;
}

/// Destination for security audit events
///
/// Calls are awaited by the orchestrator but a failing sink never aborts the
/// operation that produced the event.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> AuthResult<()>;
}

/// Password hasher trait for different hashing algorithms
///
/// Implementations are CPU-bound and are driven from a blocking worker.
pub trait PasswordHasher: Send + Sync {
    /// Hash a password
    fn hash_password(&self, password: &str) -> AuthResult<String>;

    /// Verify a password against its hash
    fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool>;

    /// Get the hasher name
    fn hasher_name(&self) -> &str;
}
