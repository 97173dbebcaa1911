//! Registered OAuth clients and lookup.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

use crate::service::Service;
use crate::services::access::AccessStrategy;
use crate::services::oauth::{GrantType, ResponseType, TokenExchangeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExpiration {
    pub max_time_to_live_in_seconds: i64,
    pub time_to_kill_in_seconds: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExpiration {
    pub number_of_uses: u32,
    pub time_to_kill_in_seconds: i64,
}

/// What a client may ask for in a token exchange. Empty sets are unrestricted;
/// entries are regular expressions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenExchangePolicy {
    #[serde(default)]
    pub allowed_resources: BTreeSet<String>,
    #[serde(default)]
    pub allowed_audiences: BTreeSet<String>,
    #[serde(default)]
    pub allowed_token_types: BTreeSet<TokenExchangeType>,
}

fn any_pattern_matches(patterns: &BTreeSet<String>, value: &str) -> bool {
    patterns.iter().any(|p| match Regex::new(&format!("^(?:{p})$")) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            warn!(pattern = %p, error = %e, "invalid token exchange pattern");
            false
        }
    })
}

impl TokenExchangePolicy {
    pub fn is_allowed(
        &self,
        resources: &[String],
        audiences: &[String],
        requested_type: TokenExchangeType,
    ) -> bool {
        let resources_ok = self.allowed_resources.is_empty()
            || resources
                .iter()
                .all(|r| any_pattern_matches(&self.allowed_resources, r));
        let audiences_ok = self.allowed_audiences.is_empty()
            || audiences
                .iter()
                .all(|a| any_pattern_matches(&self.allowed_audiences, a));
        let type_ok = self.allowed_token_types.is_empty()
            || self.allowed_token_types.contains(&requested_type);
        resources_ok && audiences_ok && type_ok
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Deserialize, Serialize)]
pub struct OAuthRegisteredService {
    pub id: i64,
    pub name: String,
    /// Regular expression matched against the whole service URL.
    pub service_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub supported_grant_types: BTreeSet<GrantType>,
    #[serde(default)]
    pub supported_response_types: BTreeSet<ResponseType>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub audience: BTreeSet<String>,
    #[serde(default)]
    pub jwt_access_token: bool,
    #[serde(default)]
    pub generate_refresh_token: bool,
    #[serde(default)]
    pub renew_refresh_token: bool,
    #[serde(default = "default_true")]
    pub logout_enabled: bool,
    #[serde(default)]
    pub logout_url: Option<String>,
    #[serde(default)]
    pub access_strategy: AccessStrategy,
    #[serde(default)]
    pub access_token_expiration: Option<TokenExpiration>,
    #[serde(default)]
    pub refresh_token_time_to_kill_in_seconds: Option<i64>,
    #[serde(default)]
    pub code_expiration: Option<CodeExpiration>,
    #[serde(default)]
    pub device_token_time_to_kill_in_seconds: Option<i64>,
    #[serde(default)]
    pub token_exchange_policy: TokenExchangePolicy,
    #[serde(default)]
    pub evaluation_order: i32,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl fmt::Debug for OAuthRegisteredService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the client secret.
        f.debug_struct("OAuthRegisteredService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("service_id", &self.service_id)
            .field("client_id", &self.client_id)
            .field("supported_grant_types", &self.supported_grant_types)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl OAuthRegisteredService {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        service_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            service_id: service_id.into(),
            client_id: client_id.into(),
            client_secret,
            supported_grant_types: BTreeSet::new(),
            supported_response_types: BTreeSet::new(),
            scopes: BTreeSet::new(),
            audience: BTreeSet::new(),
            jwt_access_token: false,
            generate_refresh_token: false,
            renew_refresh_token: false,
            logout_enabled: true,
            logout_url: None,
            access_strategy: AccessStrategy::default(),
            access_token_expiration: None,
            refresh_token_time_to_kill_in_seconds: None,
            code_expiration: None,
            device_token_time_to_kill_in_seconds: None,
            token_exchange_policy: TokenExchangePolicy::default(),
            evaluation_order: 0,
            compiled: OnceLock::new(),
        }
    }

    fn pattern(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| match Regex::new(&format!("^(?:{})$", self.service_id)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(service = %self.name, error = %e, "invalid service id pattern");
                    None
                }
            })
            .as_ref()
    }

    pub fn matches(&self, service: &Service) -> bool {
        self.pattern().is_some_and(|re| re.is_match(service.id()))
    }

    /// An empty set of declared grant types places no restriction.
    pub fn supports_grant_type(&self, grant_type: GrantType) -> bool {
        if self.supported_grant_types.is_empty() {
            warn!(
                service = %self.name,
                grant_type = %grant_type,
                "service declares no supported grant types; allowing"
            );
            return true;
        }
        self.supported_grant_types.contains(&grant_type)
    }

    /// An empty set of declared response types places no restriction.
    pub fn supports_response_type(&self, response_type: ResponseType) -> bool {
        if self.supported_response_types.is_empty() {
            warn!(
                service = %self.name,
                response_type = %response_type,
                "service declares no supported response types; allowing"
            );
            return true;
        }
        self.supported_response_types.contains(&response_type)
    }

    /// Public clients (no secret) accept any presented secret.
    pub fn check_client_secret(&self, presented: Option<&str>) -> bool {
        match (&self.client_secret, presented) {
            (None, _) => true,
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            (Some(_), None) => false,
        }
    }

    /// Client authentication in the strict sense: a secret must be configured
    /// and presented.
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// `allowed` intersected with the service's scopes; unrestricted when the
    /// service declares none.
    pub fn allowed_scopes(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        if self.scopes.is_empty() {
            return requested.clone();
        }
        requested.intersection(&self.scopes).cloned().collect()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub trait ServicesManager: Send + Sync + fmt::Debug {
    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<OAuthRegisteredService>>;

    fn find_by_service(&self, service: &Service) -> Option<Arc<OAuthRegisteredService>>;

    fn all(&self) -> Vec<Arc<OAuthRegisteredService>>;
}

/// Services held in memory, consulted in ascending `evaluation_order`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryServicesManager {
    services: Vec<Arc<OAuthRegisteredService>>,
}

impl InMemoryServicesManager {
    pub fn new(mut services: Vec<OAuthRegisteredService>) -> Self {
        services.sort_by_key(|s| s.evaluation_order);
        Self {
            services: services.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let services: Vec<OAuthRegisteredService> = serde_json::from_str(raw)?;
        Ok(Self::new(services))
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<OAuthRegisteredService>> {
        self.services
            .iter()
            .find(|s| s.client_id == client_id)
            .cloned()
    }

    fn find_by_service(&self, service: &Service) -> Option<Arc<OAuthRegisteredService>> {
        self.services.iter().find(|s| s.matches(service)).cloned()
    }

    fn all(&self) -> Vec<Arc<OAuthRegisteredService>> {
        self.services.clone()
    }
}
