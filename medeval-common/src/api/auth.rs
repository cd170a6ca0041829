//! Admin credential check
//!
//! A single shared admin password gates the administrative routes
//! (progress dashboard, reconciliation, reset). The password is compared
//! through SHA-256 digests so the comparison length never depends on the
//! provided input.
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies here - the Axum middleware lives in the
//! service crate.

use sha2::{Digest, Sha256};
use std::fmt;

/// Request header carrying the admin password
pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// Admin authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAuthError {
    /// No admin password configured - admin routes refuse every request
    NotConfigured,

    /// Request did not carry a credential
    MissingCredential,

    /// Credential does not match the configured password
    InvalidCredential,
}

impl fmt::Display for AdminAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminAuthError::NotConfigured => write!(f, "Admin access is not configured"),
            AdminAuthError::MissingCredential => write!(f, "Missing admin password"),
            AdminAuthError::InvalidCredential => write!(f, "Invalid admin password"),
        }
    }
}

impl std::error::Error for AdminAuthError {}

/// SHA-256 of the password as 64 lowercase hex characters
///
/// # Examples
///
/// ```
/// use medeval_common::api::auth::password_digest;
///
/// let digest = password_digest("secret");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, password_digest("secret"));
/// ```
pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a provided admin password against the configured one
///
/// An empty configured password counts as not configured.
pub fn verify_admin_password(
    configured: Option<&str>,
    provided: Option<&str>,
) -> Result<(), AdminAuthError> {
    let configured = match configured {
        Some(p) if !p.is_empty() => p,
        _ => return Err(AdminAuthError::NotConfigured),
    };

    let provided = provided.ok_or(AdminAuthError::MissingCredential)?;

    let expected = password_digest(configured);
    let actual = password_digest(provided);

    // Fold over every byte so the comparison does not short-circuit
    let diff = expected
        .bytes()
        .zip(actual.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    if diff == 0 {
        Ok(())
    } else {
        Err(AdminAuthError::InvalidCredential)
    }
}
