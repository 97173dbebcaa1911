use async_trait::async_trait;
use tracing::warn;

use super::{
    TokenRequestValidator, ValidatedTokenRequest, ValidatorContext, ensure_grant_type,
    resolve_service,
};
use crate::services::oauth::{GrantType, OAuthError, TokenRequest};

#[derive(Clone, Debug)]
pub struct ClientCredentialsValidator {
    ctx: ValidatorContext,
}

impl ClientCredentialsValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TokenRequestValidator for ClientCredentialsValidator {
    fn name(&self) -> &'static str {
        "client_credentials"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.grant_type() == Some(GrantType::ClientCredentials)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let registered = self.ctx.authenticate_client(request)?;
        // A public client has nothing to prove its identity with.
        if !registered.is_confidential() {
            warn!(client_id = %registered.client_id, "client_credentials requested by a public client");
            return Err(OAuthError::InvalidClient);
        }
        let service = resolve_service(request, &registered)?;
        self.ctx.ensure_access(&registered, None)?;
        ensure_grant_type(&registered, GrantType::ClientCredentials)?;

        Ok(ValidatedTokenRequest::new(
            Some(GrantType::ClientCredentials),
            registered,
            service,
        ))
    }
}
