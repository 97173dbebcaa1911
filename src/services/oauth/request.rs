use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::services::oauth::{GrantType, OAuthError, ResponseType, params, parse_scopes};

/// Client id and secret presented through HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the secret.
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// A token endpoint request, detached from HTTP.
///
/// Parameters are form fields. Blank values read as absent.
#[derive(Clone, Default)]
pub struct TokenRequest {
    params: BTreeMap<String, String>,
    basic_credentials: Option<ClientCredentials>,
    dpop_confirmation: Option<String>,
    x509_certificate_digest: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.param(params::GRANT_TYPE))
            .field("response_type", &self.param(params::RESPONSE_TYPE))
            .field("client_id", &self.client_id())
            .field("dpop", &self.dpop_confirmation.is_some())
            .finish()
    }
}

impl TokenRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params<K, V>(params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: params.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_basic_credentials(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.basic_credentials = Some(ClientCredentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        });
        self
    }

    /// JWK thumbprint of a verified DPoP proof.
    pub fn with_dpop_confirmation(mut self, jkt: impl Into<String>) -> Self {
        self.dpop_confirmation = Some(jkt.into());
        self
    }

    /// SHA-256 digest of the client's mutual-TLS certificate.
    pub fn with_x509_certificate_digest(mut self, digest: impl Into<String>) -> Self {
        self.x509_certificate_digest = Some(digest.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Required parameter; absence is `invalid_request`.
    pub fn require(&self, name: &str) -> Result<&str, OAuthError> {
        self.param(name)
            .ok_or_else(|| OAuthError::InvalidRequest(format!("missing parameter {name}")))
    }

    pub fn grant_type(&self) -> Option<GrantType> {
        self.param(params::GRANT_TYPE).and_then(GrantType::parse)
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        self.param(params::RESPONSE_TYPE).and_then(ResponseType::parse)
    }

    /// Basic credentials win over form parameters.
    pub fn client_id(&self) -> Option<&str> {
        match &self.basic_credentials {
            Some(c) => Some(c.client_id.as_str()),
            None => self.param(params::CLIENT_ID),
        }
    }

    pub fn client_secret(&self) -> Option<&str> {
        match &self.basic_credentials {
            Some(c) => Some(c.client_secret.as_str()),
            None => self.param(params::CLIENT_SECRET),
        }
    }

    pub fn scopes(&self) -> BTreeSet<String> {
        parse_scopes(self.param(params::SCOPE))
    }

    /// The OIDC `claims` parameter as a JSON object.
    pub fn claims(&self) -> Result<Map<String, Value>, OAuthError> {
        let Some(raw) = self.param(params::CLAIMS) else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(OAuthError::InvalidRequest("claims must be a JSON object".to_string())),
        }
    }

    /// All values of a space-separated, possibly repeated parameter.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.param(name)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn dpop_confirmation(&self) -> Option<&str> {
        self.dpop_confirmation.as_deref()
    }

    pub fn x509_certificate_digest(&self) -> Option<&str> {
        self.x509_certificate_digest.as_deref()
    }
}
