//! Turns a validated request into everything the generator needs.
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authentication::{Authentication, AuthenticationBuilder};
use crate::error::TicketError;
use crate::principal::{AttributeMap, Principal};
use crate::repos::TicketRegistry;
use crate::service::Service;
use crate::services::oauth::validator::{SubjectToken, SupportingTicket, ValidatedTokenRequest};
use crate::services::oauth::{GrantType, OAuthError, ResponseType, TokenExchangeType, TokenRequest, params};
use crate::services::registered::OAuthRegisteredService;
use crate::services::access::AccessStrategyEnforcer;

/// Verifies resource owner credentials for the password grant.
#[async_trait]
pub trait CredentialAuthenticator: Send + Sync + fmt::Debug {
    /// `Ok(None)` means the credentials were wrong.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>, OAuthError>;
}

/// Rejects every credential. For deployments without the password grant.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingAuthenticator;

#[async_trait]
impl CredentialAuthenticator for RejectingAuthenticator {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<Option<Principal>, OAuthError> {
        Ok(None)
    }
}

/// Inputs to token generation for one request.
#[derive(Clone, Debug)]
pub struct TokenRequestContext {
    pub service: Service,
    pub registered_service: Arc<OAuthRegisteredService>,
    pub authentication: Authentication,
    /// Session the tokens hang off, if any.
    pub ticket_granting_ticket: Option<String>,
    pub grant_type: Option<GrantType>,
    pub response_type: Option<ResponseType>,
    /// Scopes of the access token.
    pub scopes: BTreeSet<String>,
    /// Scopes of a refresh token minted alongside.
    pub refresh_scopes: BTreeSet<String>,
    pub claims: Map<String, Value>,
    pub token: Option<SupportingTicket>,
    pub device_code: Option<String>,
    pub generate_refresh_token: bool,
    pub expire_old_refresh_token: bool,
    pub exchange: Option<SubjectToken>,
    pub dpop_confirmation: Option<String>,
    pub x509_certificate_digest: Option<String>,
}

impl TokenRequestContext {
    pub fn client_id(&self) -> &str {
        &self.registered_service.client_id
    }

    pub fn requested_token_type(&self) -> Option<TokenExchangeType> {
        self.exchange.as_ref().map(|s| s.requested_token_type)
    }
}

/// Builds [`TokenRequestContext`] values, authenticating password-grant users.
#[derive(Clone, Debug)]
pub struct ContextExtractor {
    registry: Arc<dyn TicketRegistry>,
    access: Arc<dyn AccessStrategyEnforcer>,
    authenticator: Arc<dyn CredentialAuthenticator>,
    authentication: AuthenticationBuilder,
}

impl ContextExtractor {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        access: Arc<dyn AccessStrategyEnforcer>,
        authenticator: Arc<dyn CredentialAuthenticator>,
        authentication: AuthenticationBuilder,
    ) -> Self {
        Self {
            registry,
            access,
            authenticator,
            authentication,
        }
    }

    pub async fn extract(
        &self,
        request: &TokenRequest,
        validated: ValidatedTokenRequest,
    ) -> Result<TokenRequestContext, OAuthError> {
        let now = self.registry.now();
        let registered = validated.registered_service;
        let requested_scopes = request.scopes();

        let mut ctx = TokenRequestContext {
            service: validated.service,
            authentication: client_authentication(&registered, now)?,
            ticket_granting_ticket: None,
            grant_type: validated.grant_type,
            response_type: validated.response_type,
            scopes: registered.allowed_scopes(&requested_scopes),
            refresh_scopes: BTreeSet::new(),
            claims: request.claims()?,
            token: None,
            device_code: request.param(params::DEVICE_CODE).map(str::to_string),
            generate_refresh_token: registered.generate_refresh_token,
            expire_old_refresh_token: false,
            exchange: None,
            dpop_confirmation: request.dpop_confirmation().map(str::to_string),
            x509_certificate_digest: request.x509_certificate_digest().map(str::to_string),
            registered_service: registered,
        };

        match validated.supporting {
            Some(SupportingTicket::Code(code)) => {
                ctx.authentication = code
                    .state
                    .authentication
                    .clone()
                    .ok_or(OAuthError::Internal)?;
                ctx.ticket_granting_ticket = code.state.parent_id.clone();
                ctx.scopes = code.token.scopes.clone();
                ctx.claims = code.token.claims.clone();
                ctx.token = Some(SupportingTicket::Code(code));
            }
            Some(SupportingTicket::RefreshToken(token)) => {
                let original = token.token.scopes.clone();
                if !requested_scopes.is_subset(&original) {
                    return Err(OAuthError::InvalidScope(
                        "requested scope exceeds the refresh token's scope".to_string(),
                    ));
                }
                ctx.scopes = if requested_scopes.is_empty() {
                    original.clone()
                } else {
                    requested_scopes.clone()
                };
                ctx.refresh_scopes = original;
                ctx.authentication = token
                    .state
                    .authentication
                    .clone()
                    .ok_or(OAuthError::Internal)?;
                ctx.ticket_granting_ticket = token.state.parent_id.clone();
                ctx.claims = token.token.claims.clone();
                let renew = ctx.registered_service.renew_refresh_token;
                ctx.generate_refresh_token = ctx.registered_service.generate_refresh_token && renew;
                ctx.expire_old_refresh_token = renew;
                ctx.token = Some(SupportingTicket::RefreshToken(token));
            }
            None => {}
        }

        if ctx.grant_type == Some(GrantType::Password) {
            let username = request.require(params::USERNAME)?;
            let password = request.require(params::PASSWORD)?;
            let principal = self
                .authenticator
                .authenticate(username, password)
                .await?
                .ok_or_else(|| {
                    warn!(client_id = %ctx.client_id(), "resource owner credentials rejected");
                    OAuthError::InvalidGrant("invalid resource owner credentials".to_string())
                })?;
            let authentication = self
                .authentication
                .build(&[Authentication::new(principal, now)])
                .map_err(TicketError::from)?;
            self.access.ensure_service_access_is_allowed(
                &ctx.registered_service,
                Some(&authentication.principal),
            )?;
            ctx.authentication = authentication;
        }

        if let Some(subject) = validated.subject {
            let wanted = if requested_scopes.is_empty() {
                subject.scopes.clone()
            } else {
                requested_scopes
            };
            ctx.scopes = ctx.registered_service.allowed_scopes(&wanted);
            ctx.authentication = subject.authentication.clone();
            ctx.generate_refresh_token = false;
            ctx.exchange = Some(subject);
        }

        if ctx.refresh_scopes.is_empty() {
            ctx.refresh_scopes = ctx.scopes.clone();
        }
        debug!(
            client_id = %ctx.client_id(),
            grant_type = ?ctx.grant_type,
            scopes = ?ctx.scopes,
            "built token request context"
        );
        Ok(ctx)
    }
}

/// Authentication standing for the client itself (client credentials, device
/// authorization before approval).
fn client_authentication(
    service: &OAuthRegisteredService,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Authentication, OAuthError> {
    let principal = Principal::new(service.client_id.clone(), AttributeMap::new())
        .map_err(|_| OAuthError::InvalidClient)?;
    Ok(Authentication::new(principal, now))
}
