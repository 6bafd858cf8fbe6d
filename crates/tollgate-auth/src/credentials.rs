//! Timing-invariant credential validation
//!
//! Every attempt performs exactly one password hash comparison, whether or not
//! the account exists, so response time does not reveal account existence.

use crate::{
    principal::{CredentialRecord, Principal, Role},
    traits::{CredentialSource, PasswordHasher},
    utils::{mask_identifier, CryptoUtils},
    AuthError, AuthResult,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hash compared against when no real credential hash is available
///
/// Generated once with the configured hasher so its cost matches real hashes.
#[derive(Clone)]
pub struct DummyHash(Arc<str>);

impl DummyHash {
    /// Hash a random throwaway password
    pub fn generate(hasher: &dyn PasswordHasher) -> AuthResult<Self> {
        let throwaway = CryptoUtils::generate_random_string(32);
        Ok(Self(hasher.hash_password(&throwaway)?.into()))
    }

    /// Wrap a precomputed hash
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DummyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DummyHash(..)")
    }
}

/// Role to credential source map
#[derive(Clone, Default)]
pub struct CredentialSources {
    sources: HashMap<Role, Arc<dyn CredentialSource>>,
}

impl CredentialSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under the role it reports, replacing any previous one
    pub fn register<S: CredentialSource + 'static>(self, source: S) -> Self {
        self.register_arc(Arc::new(source))
    }

    pub fn register_arc(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.insert(source.role(), source);
        self
    }

    pub fn get(&self, role: Role) -> Option<&Arc<dyn CredentialSource>> {
        self.sources.get(&role)
    }

    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.sources.keys().copied().collect();
        roles.sort();
        roles
    }
}

impl fmt::Debug for CredentialSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSources").field("roles", &self.roles()).finish()
    }
}

/// Verifies a login name and password for a claimed role
pub struct CredentialValidator {
    sources: CredentialSources,
    hasher: Arc<dyn PasswordHasher>,
    dummy_hash: DummyHash,
}

impl fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialValidator")
            .field("sources", &self.sources)
            .field("hasher", &self.hasher.hasher_name())
            .finish()
    }
}

impl CredentialValidator {
    pub fn new(
        sources: CredentialSources,
        hasher: Arc<dyn PasswordHasher>,
        dummy_hash: DummyHash,
    ) -> Self {
        Self {
            sources,
            hasher,
            dummy_hash,
        }
    }

    /// Validate credentials.
    ///
    /// Every failure, whatever its cause, is `InvalidCredentials` with zero
    /// remaining attempts; the caller fills in the real count.
    pub async fn validate(
        &self,
        login_name: &str,
        password: &str,
        role: Role,
    ) -> AuthResult<Principal> {
        let record = self.lookup(login_name, role).await;

        let hash = match record.as_ref().and_then(|r| r.password_hash.as_deref()) {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ => self.dummy_hash.as_str().to_string(),
        };
        let matched = self.compare(password, hash).await;

        match record {
            Some(record) if matched && record.is_eligible() => Ok(record.to_principal()),
            Some(_) if matched => {
                let login = mask_identifier(login_name);
                debug!(%login, %role, "account not eligible to sign in");
                Err(rejected())
            }
            _ => Err(rejected()),
        }
    }

    async fn lookup(&self, login_name: &str, role: Role) -> Option<CredentialRecord> {
        let source = match self.sources.get(role) {
            Some(source) => source,
            None => {
                debug!(%role, "no credential source registered for role");
                return None;
            }
        };

        match source.find_by_login(login_name).await {
            Ok(Some(record)) if record.role == role => Some(record),
            Ok(Some(record)) => {
                warn!(
                    %role,
                    found = %record.role,
                    "credential source returned a record for another role"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                let login = mask_identifier(login_name);
                warn!(%login, %role, error = %e, "credential lookup failed");
                None
            }
        }
    }

    /// Run one hash comparison on the blocking pool
    async fn compare(&self, password: &str, hash: String) -> bool {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();

        match tokio::task::spawn_blocking(move || hasher.verify_password(&password, &hash)).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                warn!(error = %e, "password hash comparison failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "password hashing task did not complete");
                false
            }
        }
    }
}

fn rejected() -> AuthError {
    AuthError::InvalidCredentials { remaining_attempts: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::EligibilityFlags;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hasher storing passwords as `plain:<pw>` and counting comparisons
    #[derive(Default)]
    struct CountingHasher {
        compares: AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash_password(&self, password: &str) -> AuthResult<String> {
            Ok(format!("plain:{}", password))
        }

        fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
            self.compares.fetch_add(1, Ordering::SeqCst);
            Ok(hash == format!("plain:{}", password))
        }

        fn hasher_name(&self) -> &str {
            "counting"
        }
    }

    struct Accounts {
        role: Role,
        records: Vec<CredentialRecord>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialSource for Accounts {
        fn role(&self) -> Role {
            self.role
        }

        async fn find_by_login(&self, login_name: &str) -> AuthResult<Option<CredentialRecord>> {
            if self.fail {
                return Err(AuthError::lookup_error("database offline"));
            }
            Ok(self.records.iter().find(|r| r.login_name == login_name).cloned())
        }
    }

    fn operator(status: &str) -> CredentialRecord {
        CredentialRecord {
            principal_id: "op-1".to_string(),
            login_name: "opuser".to_string(),
            role: Role::Operator,
            display_name: "Op User".to_string(),
            password_hash: Some("plain:correctpw".to_string()),
            flags: EligibilityFlags {
                status: Some(status.to_string()),
                working: None,
            },
            attributes: Default::default(),
        }
    }

    fn validator(
        records: Vec<CredentialRecord>,
        fail: bool,
    ) -> (CredentialValidator, Arc<CountingHasher>) {
        let hasher = Arc::new(CountingHasher::default());
        let dummy = DummyHash::generate(hasher.as_ref()).unwrap();
        let sources = CredentialSources::new().register(Accounts {
            role: Role::Operator,
            records,
            fail,
        });
        (CredentialValidator::new(sources, hasher.clone(), dummy), hasher)
    }

    #[tokio::test]
    async fn test_valid_operator_signs_in() {
        let (validator, hasher) = validator(vec![operator("active")], false);

        let principal = validator.validate("opuser", "correctpw", Role::Operator).await.unwrap();
        assert_eq!(principal.id, "op-1");
        assert_eq!(principal.role, Role::Operator);
        assert_eq!(hasher.compares.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_failure_is_uniform_and_costs_one_compare() {
        let (validator, hasher) = validator(vec![operator("inactive")], false);

        let cases = [
            ("opuser", "correctpw", Role::Operator), // ineligible
            ("opuser", "wrong", Role::Operator),     // bad password
            ("ghost", "correctpw", Role::Operator),  // unknown login
            ("opuser", "correctpw", Role::Master),   // no source for role
        ];

        for (i, (login, password, role)) in cases.iter().enumerate() {
            let err = validator.validate(login, password, *role).await.unwrap_err();
            assert_eq!(err, AuthError::InvalidCredentials { remaining_attempts: 0 });
            assert_eq!(hasher.compares.load(Ordering::SeqCst), i + 1);
        }
    }

    #[tokio::test]
    async fn test_missing_password_hash_uses_dummy() {
        let mut record = operator("active");
        record.password_hash = None;
        let (validator, hasher) = validator(vec![record], false);

        // The dummy hash never matches a guessable password
        assert!(validator.validate("opuser", "", Role::Operator).await.is_err());
        assert_eq!(hasher.compares.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_still_compares_once() {
        let (validator, hasher) = validator(vec![operator("active")], true);

        let err = validator.validate("opuser", "correctpw", Role::Operator).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials { remaining_attempts: 0 });
        assert_eq!(hasher.compares.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sources_keyed_by_role() {
        let sources = CredentialSources::new()
            .register(Accounts {
                role: Role::Master,
                records: vec![],
                fail: false,
            })
            .register(Accounts {
                role: Role::Admin,
                records: vec![],
                fail: false,
            });
        assert_eq!(sources.roles(), vec![Role::Admin, Role::Master]);
        assert!(sources.get(Role::Operator).is_none());
    }
}
