//! Password hashing and cryptographic utilities

use crate::{config::PasswordConfig, AuthError, AuthResult, PasswordHasher};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::sync::Arc;

#[cfg(feature = "argon2")]
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};

#[cfg(feature = "bcrypt")]
use bcrypt::{hash, verify, DEFAULT_COST};

/// Argon2id password hasher
#[cfg(feature = "argon2")]
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
}

#[cfg(feature = "argon2")]
impl Argon2Hasher {
    /// Create a new Argon2 hasher with custom parameters
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Create an Argon2 hasher optimized for development (faster)
    pub fn development() -> Self {
        Self::new(4096, 2, 1)
    }

    fn argon2(&self) -> AuthResult<Argon2<'static>> {
        let params = argon2::Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| AuthError::crypto_error(e.to_string()))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
    }
}

#[cfg(feature = "argon2")]
impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new(19456, 2, 1)
    }
}

#[cfg(feature = "argon2")]
impl PasswordHasher for Argon2Hasher {
    fn hash_password(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut thread_rng());
        let password_hash = self.argon2()?.hash_password(password.as_bytes(), &salt)?;
        Ok(password_hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let parsed_hash = PasswordHash::new(hash)?;

        // Parameters embedded in the hash win over ours
        match self.argon2()?.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn hasher_name(&self) -> &str {
        "argon2"
    }
}

/// bcrypt password hasher
#[cfg(feature = "bcrypt")]
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

#[cfg(feature = "bcrypt")]
impl BcryptHasher {
    /// Create a new bcrypt hasher with custom cost
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Create a bcrypt hasher optimized for development (faster)
    pub fn development() -> Self {
        Self { cost: 4 }
    }
}

#[cfg(feature = "bcrypt")]
impl Default for BcryptHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

#[cfg(feature = "bcrypt")]
impl PasswordHasher for BcryptHasher {
    fn hash_password(&self, password: &str) -> AuthResult<String> {
        hash(password, self.cost).map_err(AuthError::from)
    }

    fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
        verify(password, hash).map_err(AuthError::from)
    }

    fn hasher_name(&self) -> &str {
        "bcrypt"
    }
}

/// Builds the configured password hasher
pub struct PasswordHasherFactory;

impl PasswordHasherFactory {
    /// Create a password hasher from configuration
    pub fn from_config(config: &PasswordConfig) -> AuthResult<Arc<dyn PasswordHasher>> {
        Self::create_hasher(&config.hash_algorithm, config)
    }

    /// Create a password hasher by name
    pub fn create_hasher(
        algorithm: &str,
        config: &PasswordConfig,
    ) -> AuthResult<Arc<dyn PasswordHasher>> {
        match algorithm {
            #[cfg(feature = "argon2")]
            "argon2" => Ok(Arc::new(Argon2Hasher::new(
                config.argon2_memory,
                config.argon2_iterations,
                config.argon2_parallelism,
            ))),
            #[cfg(feature = "bcrypt")]
            "bcrypt" => Ok(Arc::new(BcryptHasher::new(config.bcrypt_cost))),
            _ => Err(AuthError::config_error(format!(
                "Unknown password hashing algorithm: {} (or feature not enabled)",
                algorithm
            ))),
        }
    }
}

/// Token and identifier helpers
pub struct CryptoUtils;

impl CryptoUtils {
    /// Generate a random string of specified length using alphanumeric characters
    pub fn generate_random_string(length: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    /// Generate a JWT secret key
    pub fn generate_jwt_secret(length: Option<usize>) -> String {
        Self::generate_random_string(length.unwrap_or(64))
    }

    /// Hex blake3 digest of a token, used as its store key component
    pub fn token_digest(token: &str) -> String {
        blake3::hash(token.as_bytes()).to_hex().to_string()
    }
}

/// Mask an identifier for logs, keeping only its first and last characters
pub fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=2 => "*".repeat(chars.len()),
        n => {
            let mut masked = String::with_capacity(n);
            masked.push(chars[0]);
            masked.push_str(&"*".repeat(n - 2));
            masked.push(chars[n - 1]);
            masked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "argon2")]
    #[test]
    fn test_argon2_hasher() {
        let hasher = Argon2Hasher::development();
        let password = "test_password_123";

        let hash = hasher.hash_password(password).unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(hasher.verify_password(password, &hash).unwrap());
        assert!(!hasher.verify_password("wrong_password", &hash).unwrap());
        assert!(hasher.verify_password(password, "not-a-hash").is_err());
    }

    #[cfg(feature = "bcrypt")]
    #[test]
    fn test_bcrypt_hasher() {
        let hasher = BcryptHasher::development(); // Use low cost for tests
        let password = "test_password_123";

        let hash = hasher.hash_password(password).unwrap();
        assert_ne!(hash, password);

        assert!(hasher.verify_password(password, &hash).unwrap());
        assert!(!hasher.verify_password("wrong_password", &hash).unwrap());
    }

    #[cfg(all(feature = "argon2", feature = "bcrypt"))]
    #[test]
    fn test_password_hasher_factory() {
        let mut config = PasswordConfig::default();
        config.bcrypt_cost = 4;

        let hasher = PasswordHasherFactory::from_config(&config).unwrap();
        assert_eq!(hasher.hasher_name(), "bcrypt");

        let hasher = PasswordHasherFactory::create_hasher("argon2", &config).unwrap();
        assert_eq!(hasher.hasher_name(), "argon2");

        assert!(PasswordHasherFactory::create_hasher("md5", &config).is_err());
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let a = CryptoUtils::token_digest("token-a");
        assert_eq!(a, CryptoUtils::token_digest("token-a"));
        assert_ne!(a, CryptoUtils::token_digest("token-b"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_strings() {
        let secret = CryptoUtils::generate_jwt_secret(None);
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, CryptoUtils::generate_jwt_secret(None));
        assert_eq!(CryptoUtils::generate_random_string(12).len(), 12);
    }

    #[test]
    fn test_mask_identifier() {
        assert_eq!(mask_identifier(""), "");
        assert_eq!(mask_identifier("ab"), "**");
        assert_eq!(mask_identifier("opuser"), "o****r");
        assert_eq!(mask_identifier("ünïcode"), "ü*****e");
    }
}
