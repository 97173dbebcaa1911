use axum::Json;
use axum::extract::{Form, OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::IntoResponse;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sso_core::services::oauth::{TokenRequest, TokenResponse};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::services::dpop::verify_proof;
use crate::state::AppState;

/// `client_id:client_secret` from an `Authorization: Basic` header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// OAuth2 token endpoint (RFC 6749 section 3.2), including the device
/// authorization and token exchange grants.
pub async fn issue_token(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let mut request = TokenRequest::from_params(params);
    if let Some((id, secret)) = basic_credentials(&headers) {
        request = request.with_basic_credentials(id, secret);
    }

    let now = state.clock.now().timestamp();
    let proof = verify_proof(
        state.dpop,
        &headers,
        &method,
        &uri,
        state.public_base_url.as_deref(),
        now,
    )
    .inspect_err(|e| warn!(error = %e, "rejecting DPoP proof"))?;
    if let Some(proof) = proof {
        debug!(jti = %proof.jti, "token request carries a DPoP proof");
        request = request.with_dpop_confirmation(proof.jkt);
    }

    let response: TokenResponse = state.tokens.handle(&request).await?;
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
        Json(response),
    ))
}
