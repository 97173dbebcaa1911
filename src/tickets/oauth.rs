//! OAuth2 tickets: authorization codes, tokens and the device-flow pair.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::service::Service;
use crate::services::oauth::{GrantType, ResponseType};
use crate::tickets::TicketState;

/// Protocol fields shared by codes, access tokens and refresh tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokenData {
    pub service: Service,
    pub client_id: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Claims requested by the client (OIDC `claims` parameter).
    #[serde(default)]
    pub claims: Map<String, Value>,
    pub grant_type: GrantType,
    #[serde(default)]
    pub response_type: Option<ResponseType>,
}

impl OAuthTokenData {
    pub fn scope_string(&self) -> String {
        self.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuthCode {
    pub state: TicketState,
    pub token: OAuthTokenData,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub state: TicketState,
    pub token: OAuthTokenData,
    /// Requested encoding, e.g. `jwt` for token exchange.
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub state: TicketState,
    pub token: OAuthTokenData,
    /// Access tokens minted from this refresh token.
    #[serde(default)]
    pub access_tokens: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub state: TicketState,
    pub service: Service,
    pub client_id: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Id of the paired [`DeviceUserCode`].
    pub user_code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceUserCode {
    pub state: TicketState,
    /// Id of the paired [`DeviceToken`].
    pub device_code: String,
    #[serde(default)]
    pub approved: bool,
}

impl DeviceUserCode {
    /// Ticket id for a code as typed by the user.
    pub fn id_for(user_code: &str) -> String {
        format!(
            "{}-{}",
            crate::tickets::TicketKind::DeviceUserCode.prefix(),
            crate::tickets::id::normalize_user_code(user_code)
        )
    }

    /// The code to show to the user.
    pub fn user_code(&self) -> &str {
        self.state
            .id
            .split_once('-')
            .map_or(self.state.id.as_str(), |(_, code)| code)
    }
}
