use async_trait::async_trait;

use super::{
    TokenRequestValidator, ValidatedTokenRequest, ValidatorContext, ensure_grant_type,
    resolve_service,
};
use crate::services::oauth::{GrantType, OAuthError, ResponseType, TokenRequest, params};

/// Covers both the device authorization request (`response_type=device_code`)
/// and polling (`grant_type=device_code`).
#[derive(Clone, Debug)]
pub struct DeviceCodeValidator {
    ctx: ValidatorContext,
}

impl DeviceCodeValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TokenRequestValidator for DeviceCodeValidator {
    fn name(&self) -> &'static str {
        "device_code"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.response_type() == Some(ResponseType::DeviceCode)
            || request.grant_type() == Some(GrantType::DeviceCode)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let registered = self.ctx.authenticate_client(request)?;
        let response_type = request.response_type();
        let grant_type = request.grant_type();

        if response_type == Some(ResponseType::DeviceCode)
            && !registered.supports_response_type(ResponseType::DeviceCode)
        {
            return Err(OAuthError::UnauthorizedClient(
                ResponseType::DeviceCode.to_string(),
            ));
        }
        if grant_type == Some(GrantType::DeviceCode) {
            ensure_grant_type(&registered, GrantType::DeviceCode)?;
            request.require(params::DEVICE_CODE)?;
        }
        self.ctx.ensure_access(&registered, None)?;

        let service = resolve_service(request, &registered)?;
        let mut validated = ValidatedTokenRequest::new(grant_type, registered, service);
        validated.response_type = response_type;
        Ok(validated)
    }
}
