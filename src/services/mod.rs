pub mod access;
pub mod logout;
pub mod oauth;
pub mod registered;
pub mod scopes;
pub mod ticketing;
