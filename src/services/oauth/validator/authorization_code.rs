use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{
    SupportingTicket, TokenRequestValidator, ValidatedTokenRequest, ValidatorContext,
    ensure_grant_type,
};
use crate::service::Service;
use crate::services::oauth::{GrantType, OAuthError, TokenRequest, params};
use crate::tickets::OAuthCode;

#[derive(Clone, Debug)]
pub struct AuthorizationCodeValidator {
    ctx: ValidatorContext,
}

impl AuthorizationCodeValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }
}

/// RFC 7636 check of `code_verifier` against the stored challenge.
pub(crate) fn verify_pkce(code: &OAuthCode, verifier: Option<&str>) -> Result<(), OAuthError> {
    let Some(challenge) = code.code_challenge.as_deref() else {
        return Ok(());
    };
    let verifier =
        verifier.ok_or_else(|| OAuthError::InvalidGrant("missing code_verifier".to_string()))?;
    let method = code.code_challenge_method.as_deref().unwrap_or("plain");
    let computed = if method.eq_ignore_ascii_case("plain") {
        verifier.to_string()
    } else if method.eq_ignore_ascii_case("S256") {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    } else {
        return Err(OAuthError::InvalidGrant(format!(
            "unsupported code_challenge_method {method}"
        )));
    };
    if computed != challenge {
        return Err(OAuthError::InvalidGrant("code_verifier mismatch".to_string()));
    }
    Ok(())
}

#[async_trait]
impl TokenRequestValidator for AuthorizationCodeValidator {
    fn name(&self) -> &'static str {
        "authorization_code"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.grant_type() == Some(GrantType::AuthorizationCode)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let redirect_uri = request.require(params::REDIRECT_URI)?;
        let code_id = request.require(params::CODE)?;

        let registered = self.ctx.authenticate_client(request)?;
        let redirect = Service::new(redirect_uri);
        if !registered.matches(&redirect) {
            return Err(OAuthError::InvalidGrant(format!(
                "redirect_uri {redirect_uri} is not registered"
            )));
        }

        let code = self
            .ctx
            .registry
            .get_typed::<OAuthCode>(code_id)
            .await?
            .ok_or_else(|| {
                warn!("authorization code is unknown or expired");
                OAuthError::InvalidGrant("authorization code is unknown or expired".to_string())
            })?;

        if code.token.client_id != registered.client_id {
            warn!(client_id = %registered.client_id, "authorization code belongs to another client");
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }
        if code.redirect_uri.as_deref().is_some_and(|r| r != redirect_uri) {
            return Err(OAuthError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        verify_pkce(&code, request.param(params::CODE_VERIFIER))?;

        let principal = code.state.authentication.as_ref().map(|a| &a.principal);
        self.ctx.ensure_access(&registered, principal)?;
        ensure_grant_type(&registered, GrantType::AuthorizationCode)?;

        let service = code.token.service.clone();
        let mut validated =
            ValidatedTokenRequest::new(Some(GrantType::AuthorizationCode), registered, service);
        validated.response_type = code.token.response_type;
        validated.supporting = Some(SupportingTicket::Code(code));
        Ok(validated)
    }
}
