//! Renders access tokens either as their opaque id or as a JWT.
use chrono::Duration;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::services::oauth::jwt::JwtCodec;
use crate::services::oauth::{OAuthError, TokenExchangeType, attributes};
use crate::principal::AttributeMap;
use crate::services::registered::OAuthRegisteredService;
use crate::services::scopes::ScopeToAttributesFilter;
use crate::tickets::AccessToken;

/// Claims the encoder sets itself; principal attributes never override them.
const RESERVED_CLAIMS: [&str; 11] = [
    "iss", "aud", "sub", "exp", "iat", "nbf", "jti", "cnf", "scope", "client_id", "grant_type",
];

#[derive(Clone, Debug)]
pub struct AccessTokenEncoder {
    codec: Option<Arc<JwtCodec>>,
    create_as_jwt: bool,
    scope_filter: Option<Arc<dyn ScopeToAttributesFilter>>,
}

impl AccessTokenEncoder {
    pub fn new(codec: Option<Arc<JwtCodec>>, create_as_jwt: bool) -> Self {
        Self {
            codec,
            create_as_jwt,
            scope_filter: None,
        }
    }

    /// Release principal attributes as claims through `filter`. Without one,
    /// a JWT carries no principal attributes.
    pub fn with_scope_filter(mut self, filter: Arc<dyn ScopeToAttributesFilter>) -> Self {
        self.scope_filter = Some(filter);
        self
    }

    /// Opaque ids only.
    pub fn opaque() -> Self {
        Self::new(None, false)
    }

    pub fn codec(&self) -> Option<&Arc<JwtCodec>> {
        self.codec.as_ref()
    }

    fn wants_jwt(&self, token: &AccessToken, service: Option<&OAuthRegisteredService>) -> bool {
        let requested_jwt = token
            .token_type
            .as_deref()
            .is_some_and(|t| t == "jwt" || t == TokenExchangeType::Jwt.as_str());
        let dpop_bound = token
            .state
            .authentication
            .as_ref()
            .is_some_and(|a| a.attributes.contains(attributes::DPOP_CONFIRMATION));
        self.create_as_jwt || service.is_some_and(|s| s.jwt_access_token) || requested_jwt || dpop_bound
    }

    pub fn encode(
        &self,
        token: &AccessToken,
        service: Option<&OAuthRegisteredService>,
    ) -> Result<String, OAuthError> {
        if !self.wants_jwt(token, service) {
            return Ok(token.state.id.clone());
        }
        let Some(codec) = &self.codec else {
            tracing::error!(client_id = %token.token.client_id, "JWT access token required but no signing key is configured");
            return Err(OAuthError::Internal);
        };
        let claims = self.claims(token, service, codec.issuer())?;
        Ok(codec.sign(&Value::Object(claims))?)
    }

    fn claims(
        &self,
        token: &AccessToken,
        service: Option<&OAuthRegisteredService>,
        issuer: &str,
    ) -> Result<Map<String, Value>, OAuthError> {
        let authentication = token.state.authentication.as_ref().ok_or(OAuthError::Internal)?;
        let principal = &authentication.principal;

        let issued_at = authentication.authentication_date;
        let expires_at = issued_at
            .checked_add_signed(Duration::seconds(token.state.time_to_live()))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        let released = match (&self.scope_filter, service) {
            (Some(filter), Some(service)) => {
                filter.filter_claims(principal, service, &token.token.scopes)
            }
            _ => principal.with_attributes(AttributeMap::new()),
        };

        let mut claims = Map::new();
        for (name, values) in released.attributes().iter() {
            if RESERVED_CLAIMS.contains(&name) || name == attributes::PASSWORD {
                continue;
            }
            let value = match values {
                [single] => single.clone(),
                many => Value::Array(many.to_vec()),
            };
            claims.insert(name.to_string(), value);
        }

        claims.insert("iss".into(), json!(issuer));
        claims.insert("aud".into(), audience(token, service));
        claims.insert("sub".into(), json!(principal.id()));
        claims.insert("iat".into(), json!(issued_at.timestamp()));
        claims.insert("nbf".into(), json!(issued_at.timestamp()));
        claims.insert("exp".into(), json!(expires_at.timestamp()));
        claims.insert("jti".into(), json!(token.state.id));
        claims.insert("client_id".into(), json!(token.token.client_id));
        claims.insert("grant_type".into(), json!(token.token.grant_type.as_str()));
        claims.insert("scope".into(), json!(token.token.scope_string()));

        if let Some(actor) = authentication.attributes.first(attributes::ACTOR) {
            claims.insert(attributes::ACTOR.into(), actor.clone());
        }

        let mut cnf = Map::new();
        if let Some(jkt) = authentication.attributes.first_str(attributes::DPOP_CONFIRMATION) {
            cnf.insert("jkt".into(), json!(jkt));
        }
        if let Some(digest) = authentication
            .attributes
            .first_str(attributes::X509_CERTIFICATE_DIGEST)
        {
            cnf.insert("x5t#S256".into(), json!(digest));
        }
        if !cnf.is_empty() {
            claims.insert("cnf".into(), Value::Object(cnf));
        }
        Ok(claims)
    }
}

/// Exchange audience first, then the service's declared audience, then the
/// client id.
fn audience(token: &AccessToken, service: Option<&OAuthRegisteredService>) -> Value {
    let exchanged = token
        .state
        .authentication
        .as_ref()
        .map(|a| a.attributes.strings(attributes::TOKEN_EXCHANGE_AUDIENCE))
        .unwrap_or_default();
    let audiences: Vec<String> = if !exchanged.is_empty() {
        exchanged
    } else if let Some(declared) = service.filter(|s| !s.audience.is_empty()) {
        declared.audience.iter().cloned().collect()
    } else {
        vec![token.token.client_id.clone()]
    };
    match audiences.as_slice() {
        [single] => json!(single),
        many => json!(many),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::Authentication;
    use crate::expiration::ExpirationPolicy;
    use crate::principal::{AttributeMap, Principal};
    use crate::service::Service;
    use crate::services::oauth::GrantType;
    use crate::services::scopes::DefaultScopeToAttributesFilter;
    use crate::tickets::{OAuthTokenData, TicketState};
    use chrono::Utc;

    fn codec() -> Arc<JwtCodec> {
        Arc::new(JwtCodec::from_secret("https://sso.example.org/oauth2.0", &[3u8; 32]).unwrap())
    }

    fn token(authentication: Authentication) -> AccessToken {
        AccessToken {
            state: TicketState::new(
                "AT-1".into(),
                ExpirationPolicy::hard_timeout(600),
                Some(authentication),
                None,
                Utc::now(),
            ),
            token: OAuthTokenData {
                service: Service::new("https://app.example.org"),
                client_id: "client".into(),
                scopes: ["email".to_string(), "openid".to_string()].into(),
                claims: Map::new(),
                grant_type: GrantType::Password,
                response_type: None,
            },
            token_type: None,
        }
    }

    fn authentication() -> Authentication {
        let mut attrs = AttributeMap::new();
        attrs.insert_single("email", "casuser@example.org");
        attrs.insert_single("password", "secret");
        attrs.insert("memberOf", vec![json!("staff"), json!("admins")]);
        Authentication::new(Principal::new("casuser", attrs).unwrap(), Utc::now())
    }

    #[test]
    fn opaque_by_default() {
        let encoder = AccessTokenEncoder::new(Some(codec()), false);
        assert_eq!(encoder.encode(&token(authentication()), None).unwrap(), "AT-1");
    }

    fn filtered_encoder() -> AccessTokenEncoder {
        AccessTokenEncoder::new(Some(codec()), false)
            .with_scope_filter(Arc::new(DefaultScopeToAttributesFilter::default()))
    }

    fn client() -> OAuthRegisteredService {
        OAuthRegisteredService::new(1, "app", ".*", "client", None)
    }

    #[test]
    fn jwt_carries_scoped_attributes_and_binding_claims() {
        let authn = authentication()
            .with_attribute(attributes::DPOP_CONFIRMATION, "thumbprint")
            .with_attribute(attributes::X509_CERTIFICATE_DIGEST, "digest");
        let jwt = filtered_encoder().encode(&token(authn), Some(&client())).unwrap();
        let claims = codec().verify_strict(&jwt).unwrap();

        assert_eq!(claims.sub, "casuser");
        assert_eq!(claims.jti.as_deref(), Some("AT-1"));
        assert_eq!(claims.aud, json!("client"));
        assert_eq!(claims.exp - claims.iat.unwrap(), 600);
        assert_eq!(claims.extra["cnf"]["jkt"], json!("thumbprint"));
        assert_eq!(claims.extra["cnf"]["x5t#S256"], json!("digest"));
        assert_eq!(claims.extra["email"], json!("casuser@example.org"));
        assert_eq!(claims.extra["scope"], json!("email openid"));
        assert!(!claims.extra.contains_key("memberOf"));
        assert!(!claims.extra.contains_key("password"));
    }

    #[test]
    fn openid_alone_releases_no_attributes() {
        let mut at = token(authentication());
        at.token.scopes = ["openid".to_string()].into();
        at.token_type = Some("jwt".into());
        let jwt = filtered_encoder().encode(&at, Some(&client())).unwrap();
        let claims = codec().verify_strict(&jwt).unwrap();
        assert!(!claims.extra.contains_key("email"));
        assert!(!claims.extra.contains_key("memberOf"));
    }

    #[test]
    fn required_jwt_without_signing_key_is_an_error() {
        let authn = authentication().with_attribute(attributes::DPOP_CONFIRMATION, "thumbprint");
        let encoder = AccessTokenEncoder::new(None, false);
        assert!(matches!(
            encoder.encode(&token(authn), None),
            Err(OAuthError::Internal)
        ));
        assert!(matches!(
            AccessTokenEncoder::new(None, true).encode(&token(authentication()), None),
            Err(OAuthError::Internal)
        ));
        assert_eq!(
            AccessTokenEncoder::opaque().encode(&token(authentication()), None).unwrap(),
            "AT-1"
        );
    }

    #[test]
    fn service_flag_and_audience_apply() {
        let encoder = AccessTokenEncoder::new(Some(codec()), false);
        let mut svc = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        svc.jwt_access_token = true;
        svc.audience = ["api-a".to_string(), "api-b".to_string()].into();
        let jwt = encoder.encode(&token(authentication()), Some(&svc)).unwrap();
        let claims = codec().verify_strict(&jwt).unwrap();
        assert_eq!(claims.audiences(), vec!["api-a".to_string(), "api-b".to_string()]);
    }
}
