use std::sync::Arc;

use sso_core::SharedClock;
use sso_core::services::oauth::TokenService;
use sso_core::services::oauth::context::CredentialAuthenticator;

use crate::services::dpop::DpopPolicy;

#[derive(Clone, Debug)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    // Verifies users approving device codes
    pub users: Arc<dyn CredentialAuthenticator>,
    pub clock: SharedClock,
    pub dpop: DpopPolicy,
    pub public_base_url: Option<String>,
}

impl AppState {
    pub fn new(
        tokens: Arc<TokenService>,
        users: Arc<dyn CredentialAuthenticator>,
        clock: SharedClock,
        dpop: DpopPolicy,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            tokens,
            users,
            clock,
            dpop,
            public_base_url,
        }
    }
}
