//! Ticket lifecycle and OAuth2 token issuance core of a single sign-on server.
//!
//! Tickets are minted by [`tickets::TicketFactory`], persisted through a
//! [`repos::TicketRegistry`] and consumed by [`services::ticketing`] (the CAS
//! ticket chain) and [`services::oauth`] (the OAuth2 token endpoint pipeline).
pub mod authentication;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiration;
pub mod principal;
pub mod repos;
pub mod service;
pub mod services;
pub mod tickets;

pub use authentication::{Authentication, AuthenticationBuilder};
pub use clock::{Clock, SharedClock, SystemClock};
pub use error::TicketError;
pub use principal::Principal;
pub use service::Service;
