//! The token endpoint pipeline: validate, extract, generate, render.
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authentication::{Authentication, AuthenticationBuilder};
use crate::config::OAuthProperties;
use crate::repos::TicketRegistry;
use crate::services::access::AccessStrategyEnforcer;
use crate::services::oauth::context::{ContextExtractor, CredentialAuthenticator};
use crate::services::oauth::encoder::AccessTokenEncoder;
use crate::services::oauth::generator::{GeneratedTokens, TokenGenerator};
use crate::services::oauth::validator::{TokenRequestValidators, ValidatorContext};
use crate::services::oauth::{
    AccessTokenResponse, DeviceAuthorizationResponse, OAuthError, TokenRequest, TokenResponse,
};
use crate::services::registered::ServicesManager;
use crate::services::scopes::ScopeToAttributesFilter;
use crate::tickets::{DeviceUserCode, TicketFactory};

/// Collaborators for [`TokenService::new`].
#[derive(Clone, Debug)]
pub struct TokenServiceParts {
    pub registry: Arc<dyn TicketRegistry>,
    pub factory: Arc<TicketFactory>,
    pub services: Arc<dyn ServicesManager>,
    pub access: Arc<dyn AccessStrategyEnforcer>,
    pub scope_filter: Arc<dyn ScopeToAttributesFilter>,
    pub authenticator: Arc<dyn CredentialAuthenticator>,
    pub authentication: AuthenticationBuilder,
    pub encoder: AccessTokenEncoder,
}

#[derive(Clone, Debug)]
pub struct TokenService {
    validators: TokenRequestValidators,
    extractor: ContextExtractor,
    generator: TokenGenerator,
    encoder: AccessTokenEncoder,
    verification_uri: String,
}

impl TokenService {
    pub fn new(parts: TokenServiceParts, oauth: &OAuthProperties) -> Self {
        let validators = TokenRequestValidators::standard(ValidatorContext {
            services: parts.services,
            access: Arc::clone(&parts.access),
            registry: Arc::clone(&parts.registry),
            jwt: parts.encoder.codec().cloned(),
        });
        let extractor = ContextExtractor::new(
            Arc::clone(&parts.registry),
            parts.access,
            parts.authenticator,
            parts.authentication,
        );
        let encoder = parts.encoder.with_scope_filter(Arc::clone(&parts.scope_filter));
        let generator = TokenGenerator::new(parts.registry, parts.factory, parts.scope_filter, oauth);
        Self {
            validators,
            extractor,
            generator,
            encoder,
            verification_uri: oauth.verification_uri.clone(),
        }
    }

    /// Handle one token endpoint request end to end.
    pub async fn handle(&self, request: &TokenRequest) -> Result<TokenResponse, OAuthError> {
        let validated = self.validators.validate(request).await.inspect_err(|e| {
            if e.is_server_error() {
                warn!(error = %e, "token request validation failed");
            } else {
                debug!(error = %e, "token request rejected");
            }
        })?;
        let ctx = self.extractor.extract(request, validated).await?;
        let generated = self.generator.generate(ctx).await?;
        self.render(generated)
    }

    fn render(&self, generated: GeneratedTokens) -> Result<TokenResponse, OAuthError> {
        match generated {
            GeneratedTokens::Tokens {
                registered_service,
                access_token,
                refresh_token,
                issued_token_type,
            } => {
                let encoded = self
                    .encoder
                    .encode(&access_token, Some(registered_service.as_ref()))?;
                Ok(TokenResponse::AccessToken(AccessTokenResponse {
                    access_token: encoded,
                    token_type: "bearer".to_string(),
                    expires_in: access_token.state.time_to_live(),
                    scope: access_token.token.scope_string(),
                    refresh_token: refresh_token.map(|t| t.state.id),
                    issued_token_type: issued_token_type.map(|t| t.as_str().to_string()),
                }))
            }
            GeneratedTokens::DeviceAuthorization {
                device_code,
                user_code,
                expires_in,
                interval,
            } => Ok(TokenResponse::DeviceAuthorization(DeviceAuthorizationResponse {
                device_code,
                user_code,
                verification_uri: self.verification_uri.clone(),
                expires_in,
                interval,
            })),
        }
    }

    /// See [`TokenGenerator::approve_device_user_code`].
    pub async fn approve_device_user_code(
        &self,
        user_code: &str,
        authentication: Authentication,
    ) -> Result<DeviceUserCode, OAuthError> {
        self.generator.approve_device_user_code(user_code, authentication).await
    }
}
