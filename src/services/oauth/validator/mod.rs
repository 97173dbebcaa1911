//! One validator per grant type. Every validator fails closed: a missing
//! parameter, ticket or permission is a rejection.
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authentication::Authentication;
use crate::principal::Principal;
use crate::repos::TicketRegistry;
use crate::service::Service;
use crate::services::access::AccessStrategyEnforcer;
use crate::services::oauth::jwt::JwtCodec;
use crate::services::oauth::{
    GrantType, OAuthError, ResponseType, TokenExchangeType, TokenRequest, params,
};
use crate::services::registered::{OAuthRegisteredService, ServicesManager};
use crate::tickets::{OAuthCode, RefreshToken};

mod authorization_code;
mod client_credentials;
mod device_code;
mod password;
mod refresh_token;
mod token_exchange;

pub use authorization_code::AuthorizationCodeValidator;
pub use client_credentials::ClientCredentialsValidator;
pub use device_code::DeviceCodeValidator;
pub use password::PasswordValidator;
pub use refresh_token::RefreshTokenValidator;
pub use token_exchange::TokenExchangeValidator;

/// The ticket a grant consumes.
#[derive(Clone, Debug, PartialEq)]
pub enum SupportingTicket {
    Code(OAuthCode),
    RefreshToken(RefreshToken),
}

/// Identity carried by a token exchange subject token.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectToken {
    pub authentication: Authentication,
    pub client_id: String,
    pub scopes: BTreeSet<String>,
    pub actor: Option<Principal>,
    pub requested_token_type: TokenExchangeType,
    pub audiences: Vec<String>,
    pub resources: Vec<String>,
}

/// What a validator established about a request.
#[derive(Clone, Debug)]
pub struct ValidatedTokenRequest {
    pub grant_type: Option<GrantType>,
    pub response_type: Option<ResponseType>,
    pub registered_service: Arc<OAuthRegisteredService>,
    pub service: Service,
    pub supporting: Option<SupportingTicket>,
    pub subject: Option<SubjectToken>,
}

impl ValidatedTokenRequest {
    fn new(
        grant_type: Option<GrantType>,
        registered_service: Arc<OAuthRegisteredService>,
        service: Service,
    ) -> Self {
        Self {
            grant_type,
            response_type: None,
            registered_service,
            service,
            supporting: None,
            subject: None,
        }
    }
}

#[async_trait]
pub trait TokenRequestValidator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn supports(&self, request: &TokenRequest) -> bool;

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError>;
}

/// Collaborators shared by all validators.
#[derive(Clone, Debug)]
pub struct ValidatorContext {
    pub services: Arc<dyn ServicesManager>,
    pub access: Arc<dyn AccessStrategyEnforcer>,
    pub registry: Arc<dyn TicketRegistry>,
    pub jwt: Option<Arc<JwtCodec>>,
}

impl ValidatorContext {
    /// Resolve the client and check its secret.
    pub fn authenticate_client(
        &self,
        request: &TokenRequest,
    ) -> Result<Arc<OAuthRegisteredService>, OAuthError> {
        let client_id = request.client_id().ok_or(OAuthError::InvalidClient)?;
        let service = self.services.find_by_client_id(client_id).ok_or_else(|| {
            warn!(client_id = %client_id, "unknown client");
            OAuthError::InvalidClient
        })?;
        if !service.check_client_secret(request.client_secret()) {
            warn!(client_id = %client_id, "client secret mismatch");
            return Err(OAuthError::InvalidClient);
        }
        Ok(service)
    }

    pub fn ensure_access(
        &self,
        service: &OAuthRegisteredService,
        principal: Option<&Principal>,
    ) -> Result<(), OAuthError> {
        Ok(self.access.ensure_service_access_is_allowed(service, principal)?)
    }
}

pub(crate) fn ensure_grant_type(
    service: &OAuthRegisteredService,
    grant_type: GrantType,
) -> Result<(), OAuthError> {
    if service.supports_grant_type(grant_type) {
        return Ok(());
    }
    debug!(client_id = %service.client_id, grant_type = %grant_type, "grant type not allowed");
    Err(OAuthError::UnauthorizedClient(grant_type.to_string()))
}

/// Service URL named by the request, or the registered service id.
pub(crate) fn resolve_service(
    request: &TokenRequest,
    registered: &OAuthRegisteredService,
) -> Result<Service, OAuthError> {
    let named = request
        .param(params::SERVICE)
        .or_else(|| request.param(params::REDIRECT_URI));
    match named {
        Some(url) => {
            let service = Service::new(url);
            if !registered.matches(&service) {
                return Err(OAuthError::UnauthorizedClient(format!(
                    "service {service} for client {}",
                    registered.client_id
                )));
            }
            Ok(service)
        }
        None => Ok(Service::new(registered.service_id.clone())),
    }
}

/// Picks the validator for a request.
#[derive(Clone, Debug)]
pub struct TokenRequestValidators {
    validators: Vec<Arc<dyn TokenRequestValidator>>,
}

impl TokenRequestValidators {
    pub fn new(validators: Vec<Arc<dyn TokenRequestValidator>>) -> Self {
        Self { validators }
    }

    /// Every grant this crate implements.
    pub fn standard(ctx: ValidatorContext) -> Self {
        Self::new(vec![
            Arc::new(DeviceCodeValidator::new(ctx.clone())),
            Arc::new(AuthorizationCodeValidator::new(ctx.clone())),
            Arc::new(RefreshTokenValidator::new(ctx.clone())),
            Arc::new(PasswordValidator::new(ctx.clone())),
            Arc::new(ClientCredentialsValidator::new(ctx.clone())),
            Arc::new(TokenExchangeValidator::new(ctx)),
        ])
    }

    pub fn select(&self, request: &TokenRequest) -> Option<&dyn TokenRequestValidator> {
        self.validators
            .iter()
            .find(|v| v.supports(request))
            .map(|v| v.as_ref())
    }

    pub async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let Some(validator) = self.select(request) else {
            return Err(match request.param(params::GRANT_TYPE) {
                Some(raw) => OAuthError::UnsupportedGrantType(raw.to_string()),
                None => OAuthError::InvalidRequest("missing grant_type".to_string()),
            });
        };
        debug!(validator = validator.name(), "validating token request");
        validator.validate(request).await
    }
}
