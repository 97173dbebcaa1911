//! OAuth2 token issuance: request validation, token generation and encoding.
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod context;
pub mod encoder;
pub mod error;
pub mod generator;
pub mod jwt;
pub mod request;
pub mod response;
pub mod token_service;
pub mod validator;

pub use error::OAuthError;
pub use request::TokenRequest;
pub use response::{AccessTokenResponse, DeviceAuthorizationResponse, TokenResponse};
pub use token_service::TokenService;

/// Request parameter names.
pub mod params {
    pub const GRANT_TYPE: &str = "grant_type";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const CODE: &str = "code";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const CODE_VERIFIER: &str = "code_verifier";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const SCOPE: &str = "scope";
    pub const CLAIMS: &str = "claims";
    pub const DEVICE_CODE: &str = "device_code";
    pub const SERVICE: &str = "service";
    pub const SUBJECT_TOKEN: &str = "subject_token";
    pub const SUBJECT_TOKEN_TYPE: &str = "subject_token_type";
    pub const ACTOR_TOKEN: &str = "actor_token";
    pub const ACTOR_TOKEN_TYPE: &str = "actor_token_type";
    pub const REQUESTED_TOKEN_TYPE: &str = "requested_token_type";
    pub const RESOURCE: &str = "resource";
    pub const AUDIENCE: &str = "audience";
}

/// Authentication attribute names stamped on issued tokens.
pub mod attributes {
    pub const GRANT_TYPE: &str = "grant_type";
    pub const SCOPE: &str = "scope";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLAIMS: &str = "claims";
    pub const DPOP: &str = "dpop";
    pub const DPOP_CONFIRMATION: &str = "dpop_confirmation";
    pub const X509_CERTIFICATE_DIGEST: &str = "x509_certificate_digest";
    pub const ACTOR: &str = "act";
    pub const PASSWORD: &str = "password";
    pub const TOKEN_EXCHANGE_AUDIENCE: &str = "token_exchange_audience";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:device_code",
        alias = "device_code"
    )]
    DeviceCode,
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:token-exchange",
        alias = "token_exchange"
    )]
    TokenExchange,
}

impl GrantType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "authorization_code" => Some(Self::AuthorizationCode),
            "password" => Some(Self::Password),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "device_code" | "urn:ietf:params:oauth:grant-type:device_code" => {
                Some(Self::DeviceCode)
            }
            "token_exchange" | "urn:ietf:params:oauth:grant-type:token-exchange" => {
                Some(Self::TokenExchange)
            }
            _ => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
    DeviceCode,
}

impl ResponseType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::DeviceCode => "device_code",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "code" => Some(Self::Code),
            "token" => Some(Self::Token),
            "device_code" => Some(Self::DeviceCode),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token type URIs used by token exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenExchangeType {
    #[serde(rename = "urn:ietf:params:oauth:token-type:access_token")]
    AccessToken,
    #[serde(rename = "urn:ietf:params:oauth:token-type:jwt")]
    Jwt,
    #[serde(rename = "urn:ietf:params:oauth:token-type:id_token")]
    IdToken,
    #[serde(rename = "urn:ietf:params:oauth:token-type:refresh_token")]
    RefreshToken,
}

impl TokenExchangeType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "urn:ietf:params:oauth:token-type:access_token",
            Self::Jwt => "urn:ietf:params:oauth:token-type:jwt",
            Self::IdToken => "urn:ietf:params:oauth:token-type:id_token",
            Self::RefreshToken => "urn:ietf:params:oauth:token-type:refresh_token",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [Self::AccessToken, Self::Jwt, Self::IdToken, Self::RefreshToken]
            .into_iter()
            .find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for TokenExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space-separated scope parameter to a set.
pub fn parse_scopes(raw: Option<&str>) -> std::collections::BTreeSet<String> {
    raw.unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
