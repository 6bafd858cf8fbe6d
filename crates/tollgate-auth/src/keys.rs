//! Session store key layout
//!
//! Every key is scoped by role so principals with the same ID in different
//! role tables never collide.

use crate::principal::Role;

/// Live refresh token record, keyed by the token digest
pub fn refresh_record(role: Role, principal_id: &str, digest: &str) -> String {
    format!("refresh:{}:{}:{}", role, principal_id, digest)
}

/// Set of live refresh token digests for a principal
pub fn refresh_set(role: Role, principal_id: &str) -> String {
    format!("refresh_set:{}:{}", role, principal_id)
}

/// Tombstone left behind by a rotated or revoked refresh token
pub fn tombstone(role: Role, principal_id: &str, digest: &str) -> String {
    format!("revoked:{}:{}:{}", role, principal_id, digest)
}

pub fn force_logout(role: Role, principal_id: &str) -> String {
    format!("force_logout:{}:{}", role, principal_id)
}

/// Failed login counter; login names are compared case-insensitively
pub fn login_attempts(role: Role, login_name: &str) -> String {
    format!("login_attempts:{}:{}", role, login_name.trim().to_lowercase())
}

pub fn profile(role: Role, principal_id: &str) -> String {
    format!("profile:{}:{}", role, principal_id)
}
