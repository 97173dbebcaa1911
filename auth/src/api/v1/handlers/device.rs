use axum::extract::{Form, State};
use axum::http::StatusCode;
use sso_core::Authentication;
use sso_core::services::oauth::OAuthError;
use tracing::info;

use crate::api::v1::dto::device_approval::DeviceApprovalRequest;
use crate::error::AppError;
use crate::state::AppState;

/// Verification endpoint for the device flow (RFC 8628 section 3.3): the
/// user signs in and confirms the code shown on their device.
pub async fn approve_device(
    State(state): State<AppState>,
    Form(req): Form<DeviceApprovalRequest>,
) -> Result<StatusCode, AppError> {
    let principal = state
        .users
        .authenticate(&req.username, &req.password)
        .await?
        .ok_or_else(|| OAuthError::InvalidGrant("user credentials were rejected".to_string()))?;

    let authentication = Authentication::new(principal, state.clock.now());
    state
        .tokens
        .approve_device_user_code(&req.user_code, authentication)
        .await?;
    info!(username = %req.username, "device code approved");

    Ok(StatusCode::NO_CONTENT)
}
