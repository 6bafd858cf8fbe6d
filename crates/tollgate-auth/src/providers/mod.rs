//! Token providers
//!
//! JWT is the only token format; access and refresh tokens may be signed
//! with separate keys.

pub mod jwt;

pub use jwt::*;
