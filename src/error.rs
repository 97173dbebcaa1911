use thiserror::Error;

use crate::expiration::PolicyError;
use crate::principal::ElectionError;
use crate::repos::RegistryError;
use crate::services::access::AccessDenied;

/// Failures of the ticket chain (granting, validating and destroying tickets).
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket {0} is unknown or expired")]
    InvalidTicket(String),

    #[error("ticket {id} was not issued for service {service}")]
    UnrecognizableService { id: String, service: String },

    #[error("service {0} is not registered")]
    UnauthorizedService(String),

    #[error("ticket {0} has already granted a proxy-granting ticket")]
    AlreadyGranted(String),

    #[error("ticket id generation failed")]
    IdGeneration,

    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Election(#[from] ElectionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
