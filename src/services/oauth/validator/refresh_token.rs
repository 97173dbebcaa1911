use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    SupportingTicket, TokenRequestValidator, ValidatedTokenRequest, ValidatorContext,
    ensure_grant_type,
};
use crate::services::oauth::{GrantType, OAuthError, TokenRequest, params};
use crate::tickets::{RefreshToken, TicketKind};

#[derive(Clone, Debug)]
pub struct RefreshTokenValidator {
    ctx: ValidatorContext,
}

impl RefreshTokenValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TokenRequestValidator for RefreshTokenValidator {
    fn name(&self) -> &'static str {
        "refresh_token"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.grant_type() == Some(GrantType::RefreshToken)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let token_id = request.require(params::REFRESH_TOKEN)?;
        let registered = self.ctx.authenticate_client(request)?;

        let invalid = || OAuthError::InvalidGrant("refresh token is unknown or expired".to_string());
        let ticket = self.ctx.registry.get_ticket(token_id).await?.ok_or_else(invalid)?;
        if ticket.kind() != TicketKind::RefreshToken {
            debug!(kind = %ticket.kind(), "presented ticket is not a refresh token");
            return Err(invalid());
        }
        let token: RefreshToken = ticket.into_typed().ok_or_else(invalid)?;

        if token.token.client_id != registered.client_id {
            warn!(client_id = %registered.client_id, "refresh token belongs to another client");
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }

        let principal = token.state.authentication.as_ref().map(|a| &a.principal);
        self.ctx.ensure_access(&registered, principal)?;
        ensure_grant_type(&registered, GrantType::RefreshToken)?;

        let service = token.token.service.clone();
        let mut validated =
            ValidatedTokenRequest::new(Some(GrantType::RefreshToken), registered, service);
        validated.supporting = Some(SupportingTicket::RefreshToken(token));
        Ok(validated)
    }
}
