//! API module for shared HTTP API functionality
//!
//! This module contains ONLY pure functions and shared types. Each service
//! wraps these with framework-specific middleware (Axum, etc.).

pub mod auth;

pub use auth::{password_digest, verify_admin_password, AdminAuthError, ADMIN_PASSWORD_HEADER};
