use axum::{Router, routing::post};

use crate::api::v1::handlers::{device::approve_device, token::issue_token};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/token", post(issue_token))
        .route("/device/approve", post(approve_device))
        .with_state(state)
}
