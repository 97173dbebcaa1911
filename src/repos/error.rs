use thiserror::Error;

/// What a ticket store reports upward.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("ticket {0} already exists")]
    Duplicate(String),

    #[error("ticket {0} not found")]
    NotFound(String),

    #[error("ticket {id} was modified concurrently (expected version {expected})")]
    Conflict { id: String, expected: u64 },

    #[error("ticket serialization failed")]
    Serialization(#[from] serde_json::Error),

    #[error("valkey error")]
    Valkey(#[from] redis::RedisError),

    #[error("db error")]
    Db(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
