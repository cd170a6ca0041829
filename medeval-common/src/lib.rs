//! # Medical Evaluation Common Library
//!
//! Shared code for the medeval services:
//! - Common error type
//! - Layered configuration loading (CLI, environment, TOML, compiled defaults)
//! - Admin credential checks used by the HTTP layer

pub mod api;
pub mod config;
pub mod error;

pub use error::{Error, Result};
