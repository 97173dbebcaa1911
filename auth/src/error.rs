use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sso_core::services::oauth::OAuthError;
use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;
use crate::services::dpop::DpopError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error("invalid DPoP proof: {0}")]
    Dpop(#[from] DpopError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal server error")]
    Internal,
}

/// OAuth2 error body (RFC 6749 section 5.2).
#[derive(Serialize)]
struct ErrorResponseBody {
    error: &'static str,
    error_description: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::OAuth(e) => {
                let status = match e {
                    OAuthError::InvalidClient => StatusCode::UNAUTHORIZED,
                    OAuthError::AccessDenied(_) => StatusCode::FORBIDDEN,
                    e if e.is_server_error() => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.error_code())
            }
            AppError::Dpop(_) => (StatusCode::BAD_REQUEST, "invalid_dpop_proof"),
            AppError::Config(_) | AppError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, "token endpoint failure");
        }

        // Do not leak storage or signing details to clients.
        let error_description = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponseBody {
            error: code,
            error_description,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sso_core::repos::RegistryError;

    #[test]
    fn statuses_follow_error_codes() {
        let cases = [
            (AppError::from(OAuthError::InvalidClient), StatusCode::UNAUTHORIZED, "invalid_client"),
            (
                AppError::from(OAuthError::InvalidGrant("gone".to_string())),
                StatusCode::BAD_REQUEST,
                "invalid_grant",
            ),
            (
                AppError::from(OAuthError::UnapprovedDeviceUserCode("D".to_string())),
                StatusCode::BAD_REQUEST,
                "authorization_pending",
            ),
            (
                AppError::from(OAuthError::Registry(RegistryError::NotFound("x".to_string()))),
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
            ),
            (AppError::Dpop(DpopError::InvalidTyp), StatusCode::BAD_REQUEST, "invalid_dpop_proof"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }
}
