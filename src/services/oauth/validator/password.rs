use async_trait::async_trait;

use super::{
    TokenRequestValidator, ValidatedTokenRequest, ValidatorContext, ensure_grant_type,
    resolve_service,
};
use crate::services::oauth::{GrantType, OAuthError, TokenRequest, params};

/// Resource owner password grant. The credentials themselves are checked
/// when the request context is built.
#[derive(Clone, Debug)]
pub struct PasswordValidator {
    ctx: ValidatorContext,
}

impl PasswordValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TokenRequestValidator for PasswordValidator {
    fn name(&self) -> &'static str {
        "password"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.grant_type() == Some(GrantType::Password)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        request.require(params::USERNAME)?;
        request.require(params::PASSWORD)?;

        let registered = self.ctx.authenticate_client(request)?;
        let service = resolve_service(request, &registered)?;
        self.ctx.ensure_access(&registered, None)?;
        ensure_grant_type(&registered, GrantType::Password)?;

        Ok(ValidatedTokenRequest::new(Some(GrantType::Password), registered, service))
    }
}
