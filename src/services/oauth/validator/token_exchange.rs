use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::{
    SubjectToken, TokenRequestValidator, ValidatedTokenRequest, ValidatorContext,
    ensure_grant_type,
};
use crate::authentication::Authentication;
use crate::principal::{AttributeMap, Principal};
use crate::service::Service;
use crate::services::oauth::jwt::JwtClaims;
use crate::services::oauth::{
    GrantType, OAuthError, TokenExchangeType, TokenRequest, params, parse_scopes,
};
use crate::tickets::AccessToken;

/// JWT claims that describe the token rather than the subject.
const TOKEN_CLAIMS: [&str; 13] = [
    "iss", "aud", "sub", "exp", "iat", "nbf", "jti", "cnf", "scope", "client_id", "grant_type",
    "act", "azp",
];

/// Authentication, client id and scopes behind a presented token.
type Resolved = (Authentication, String, BTreeSet<String>);

/// RFC 8693 token exchange.
#[derive(Clone, Debug)]
pub struct TokenExchangeValidator {
    ctx: ValidatorContext,
}

impl TokenExchangeValidator {
    pub fn new(ctx: ValidatorContext) -> Self {
        Self { ctx }
    }

    fn token_type(raw: &str) -> Result<TokenExchangeType, OAuthError> {
        TokenExchangeType::parse(raw).ok_or_else(|| OAuthError::UnsupportedTokenType(raw.to_string()))
    }

    /// Identity behind a subject or actor token.
    async fn resolve(
        &self,
        token: &str,
        token_type: TokenExchangeType,
    ) -> Result<Resolved, OAuthError> {
        match token_type {
            TokenExchangeType::AccessToken => {
                if let Some(found) = self.ctx.registry.get_typed::<AccessToken>(token).await? {
                    return from_access_token(found);
                }
                if !looks_like_jwt(token) {
                    return Err(OAuthError::InvalidGrant("subject token is unknown or expired".to_string()));
                }
                let claims = self.verify(token)?;
                // A JWT access token minted here names its ticket in `jti`.
                if let Some(jti) = claims.jti.as_deref() {
                    match self.ctx.registry.get_typed::<AccessToken>(jti).await? {
                        Some(found) => return from_access_token(found),
                        None => {
                            return Err(OAuthError::InvalidGrant(
                                "subject token has been revoked or expired".to_string(),
                            ));
                        }
                    }
                }
                from_claims(&claims)
            }
            TokenExchangeType::Jwt => {
                let claims = self.verify(token)?;
                from_claims(&claims)
            }
            other => Err(OAuthError::UnsupportedTokenType(other.to_string())),
        }
    }

    fn verify(&self, token: &str) -> Result<JwtClaims, OAuthError> {
        let codec = self
            .ctx
            .jwt
            .as_ref()
            .ok_or_else(|| OAuthError::UnsupportedTokenType(TokenExchangeType::Jwt.to_string()))?;
        codec.verify_strict(token).map_err(|e| {
            debug!(error = %e, "subject token failed verification");
            OAuthError::InvalidGrant("subject token failed verification".to_string())
        })
    }
}

fn looks_like_jwt(token: &str) -> bool {
    matches!(token.split('.').count(), 3 | 5)
}

fn from_access_token(
    token: AccessToken,
) -> Result<Resolved, OAuthError> {
    let authentication = token
        .state
        .authentication
        .ok_or_else(|| OAuthError::InvalidGrant("subject token has no authentication".to_string()))?;
    Ok((authentication, token.token.client_id, token.token.scopes))
}

fn from_claims(
    claims: &JwtClaims,
) -> Result<Resolved, OAuthError> {
    let mut attributes = AttributeMap::new();
    for (name, value) in &claims.extra {
        if TOKEN_CLAIMS.contains(&name.as_str()) {
            continue;
        }
        let values = match value {
            Value::Array(items) => items.clone(),
            Value::Null => continue,
            other => vec![other.clone()],
        };
        attributes.insert(name.clone(), values);
    }
    let principal = Principal::new(claims.sub.clone(), attributes)
        .map_err(|_| OAuthError::InvalidGrant("subject token has a blank subject".to_string()))?;

    let issued_at = claims
        .iat
        .and_then(|iat| DateTime::<Utc>::from_timestamp(iat, 0))
        .ok_or_else(|| OAuthError::InvalidGrant("subject token has no iat".to_string()))?;

    let client_id = claims
        .extra
        .get("client_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| claims.audiences().into_iter().next())
        .ok_or_else(|| OAuthError::InvalidGrant("subject token names no client".to_string()))?;
    let scopes = parse_scopes(claims.extra.get("scope").and_then(Value::as_str));

    Ok((Authentication::new(principal, issued_at), client_id, scopes))
}

#[async_trait]
impl TokenRequestValidator for TokenExchangeValidator {
    fn name(&self) -> &'static str {
        "token_exchange"
    }

    fn supports(&self, request: &TokenRequest) -> bool {
        request.grant_type() == Some(GrantType::TokenExchange)
    }

    async fn validate(&self, request: &TokenRequest) -> Result<ValidatedTokenRequest, OAuthError> {
        let registered = self.ctx.authenticate_client(request)?;
        ensure_grant_type(&registered, GrantType::TokenExchange)?;

        let subject_token = request.require(params::SUBJECT_TOKEN)?;
        let subject_type = Self::token_type(request.require(params::SUBJECT_TOKEN_TYPE)?)?;
        let requested_token_type = match request.param(params::REQUESTED_TOKEN_TYPE) {
            Some(raw) => Self::token_type(raw)?,
            None => TokenExchangeType::AccessToken,
        };
        if !matches!(
            requested_token_type,
            TokenExchangeType::AccessToken | TokenExchangeType::Jwt
        ) {
            return Err(OAuthError::UnsupportedTokenType(requested_token_type.to_string()));
        }

        let (authentication, client_id, scopes) = self.resolve(subject_token, subject_type).await?;

        let actor = match request.param(params::ACTOR_TOKEN) {
            Some(actor_token) => {
                let actor_type = Self::token_type(request.require(params::ACTOR_TOKEN_TYPE)?)?;
                let (actor, _, _) = self.resolve(actor_token, actor_type).await?;
                Some(actor.principal)
            }
            None => None,
        };

        let subject_service = self.ctx.services.find_by_client_id(&client_id).ok_or_else(|| {
            warn!(client_id = %client_id, "subject token was issued to an unknown client");
            OAuthError::InvalidGrant("subject token client is not registered".to_string())
        })?;
        self.ctx
            .ensure_access(&subject_service, Some(&authentication.principal))?;
        self.ctx
            .ensure_access(&registered, Some(&authentication.principal))?;

        let resources = request.values(params::RESOURCE);
        let audiences = request.values(params::AUDIENCE);
        if !registered
            .token_exchange_policy
            .is_allowed(&resources, &audiences, requested_token_type)
        {
            warn!(client_id = %registered.client_id, "token exchange refused by policy");
            return Err(OAuthError::InvalidRequest(
                "requested resource, audience or token type is not allowed".to_string(),
            ));
        }

        // The exchanged token is issued to the requesting client.
        let service = Service::new(registered.service_id.clone());
        let mut validated =
            ValidatedTokenRequest::new(Some(GrantType::TokenExchange), registered, service);
        validated.subject = Some(SubjectToken {
            authentication,
            client_id,
            scopes,
            actor,
            requested_token_type,
            audiences,
            resources,
        });
        Ok(validated)
    }
}
