//! HTTP API handlers for medeval-ev

pub mod admin;
pub mod auth;
pub mod evaluation;

pub use admin::{get_progress, post_reconcile, post_recover, post_reset};
pub use auth::admin_auth_middleware;
pub use evaluation::{get_case, get_next, get_queue, list_evaluators, submit_evaluation};
