//! Admin authentication middleware
//!
//! Admin routes carry the shared admin password in the `x-admin-password`
//! header. With no password configured every admin request is refused.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use medeval_common::api::{verify_admin_password, AdminAuthError, ADMIN_PASSWORD_HEADER};
use serde_json::json;
use tracing::warn;

use crate::AppState;

/// Admin authentication middleware
///
/// Returns 401 for a missing or wrong password, 403 when admin access is
/// not configured.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let provided = request
        .headers()
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = verify_admin_password(state.admin_password.as_deref(), provided) {
        warn!(path = %request.uri().path(), "Admin request refused: {}", e);
        return Err(AuthError(e));
    }

    Ok(next.run(request).await)
}

/// Authentication failure as an HTTP response
#[derive(Debug)]
pub struct AuthError(pub AdminAuthError);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0 {
            AdminAuthError::NotConfigured => (StatusCode::FORBIDDEN, "ADMIN_DISABLED"),
            AdminAuthError::MissingCredential | AdminAuthError::InvalidCredential => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
