use thiserror::Error;

use crate::error::TicketError;
use crate::repos::RegistryError;
use crate::services::access::AccessDenied;
use crate::services::oauth::jwt::JwtError;

/// Token endpoint failures, each with a stable OAuth2 error code.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client authentication failed")]
    InvalidClient,

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("client is not authorized for {0}")]
    UnauthorizedClient(String),

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    #[error("device code {0} is invalid or expired")]
    InvalidDeviceToken(String),

    #[error("user code for device code {0} is not approved yet")]
    UnapprovedDeviceUserCode(String),

    #[error("device code {0} polled too often")]
    ThrottledDeviceUserCodeApproval(String),

    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Encoding(#[from] JwtError),

    #[error("internal error")]
    Internal,
}

impl OAuthError {
    /// Code for the `error` member of the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidDeviceToken(_) => "expired_token",
            Self::UnapprovedDeviceUserCode(_) => "authorization_pending",
            Self::ThrottledDeviceUserCodeApproval(_) => "slow_down",
            Self::UnsupportedTokenType(_) => "unsupported_token_type",
            Self::Registry(_) | Self::Encoding(_) | Self::Internal => "server_error",
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.error_code() == "server_error"
    }
}

impl From<TicketError> for OAuthError {
    fn from(e: TicketError) -> Self {
        match e {
            TicketError::Registry(e) => Self::Registry(e),
            TicketError::AccessDenied(e) => Self::AccessDenied(e),
            TicketError::InvalidTicket(id) => Self::InvalidGrant(format!("ticket {id} is unknown or expired")),
            TicketError::UnrecognizableService { service, .. } => {
                Self::InvalidGrant(format!("ticket was not issued for {service}"))
            }
            TicketError::UnauthorizedService(service) => Self::UnauthorizedClient(service),
            TicketError::Election(e) => Self::InvalidGrant(e.to_string()),
            other => {
                tracing::error!(error = %other, "ticket operation failed");
                Self::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_conditions_have_distinct_codes() {
        let codes = [
            OAuthError::InvalidDeviceToken("d".into()).error_code(),
            OAuthError::UnapprovedDeviceUserCode("d".into()).error_code(),
            OAuthError::ThrottledDeviceUserCodeApproval("d".into()).error_code(),
        ];
        assert_eq!(codes, ["expired_token", "authorization_pending", "slow_down"]);
    }

    #[test]
    fn access_denied_is_not_a_validation_error() {
        let e = OAuthError::from(AccessDenied {
            service: "app".into(),
            reason: "disabled".into(),
        });
        assert_eq!(e.error_code(), "access_denied");
        assert_ne!(e.error_code(), OAuthError::InvalidGrant("x".into()).error_code());
    }
}
