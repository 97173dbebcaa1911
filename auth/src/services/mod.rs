pub mod dpop;
pub mod users;
