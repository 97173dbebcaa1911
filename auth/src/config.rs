use std::net::SocketAddr;
use std::str::FromStr;
use std::{env, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where tickets live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    Valkey(String),
    Postgres(String),
}

/// Access token signing material.
#[derive(Clone)]
pub enum SigningKey {
    Ed25519 { private_pem: String, public_pem: String },
    Secret(String),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Ed25519 { .. } => f.write_str("SigningKey::Ed25519(..)"),
            SigningKey::Secret(_) => f.write_str("SigningKey::Secret(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    // Used to rebuild the DPoP `htu` behind a proxy
    pub public_base_url: Option<String>,
    pub registry: RegistryBackend,
    pub signing_key: Option<SigningKey>,
    // 32 bytes, hex; wraps signed access tokens in JWE when set
    pub encryption_key: Option<Vec<u8>>,
    pub services_file: String,
    pub users_file: Option<String>,
    pub dpop_iat_leeway_seconds: i64,
    pub dpop_max_age_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = env::var("AUTH_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("AUTH_PORT"))?;

        let app_env = AppEnv::from_env();
        let public_base_url = env::var("PUBLIC_BASE_URL").ok();

        let registry = match env::var("TICKET_REGISTRY")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => RegistryBackend::Memory,
            "valkey" => RegistryBackend::Valkey(
                env::var("VALKEY_URL").map_err(|_| ConfigError::Missing("VALKEY_URL"))?,
            ),
            "postgres" => RegistryBackend::Postgres(
                env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            ),
            _ => return Err(ConfigError::Invalid("TICKET_REGISTRY")),
        };

        let signing_key = match (
            env::var("ACCESS_JWT_PRIVATE_KEY_PEM").ok(),
            env::var("ACCESS_JWT_PUBLIC_KEY_PEM").ok(),
            env::var("ACCESS_JWT_SECRET").ok(),
        ) {
            (Some(private_pem), Some(public_pem), _) => Some(SigningKey::Ed25519 {
                private_pem: private_pem.replace("\\n", "\n"),
                public_pem: public_pem.replace("\\n", "\n"),
            }),
            (Some(_), None, _) => return Err(ConfigError::Missing("ACCESS_JWT_PUBLIC_KEY_PEM")),
            (None, _, Some(secret)) => Some(SigningKey::Secret(secret)),
            (None, _, None) => None,
        };

        let encryption_key = env::var("ACCESS_JWE_KEY_HEX")
            .ok()
            .map(|raw| hex::decode(raw.trim()).map_err(|_| ConfigError::Invalid("ACCESS_JWE_KEY_HEX")))
            .transpose()?;

        let services_file = env::var("REGISTERED_SERVICES_FILE")
            .map_err(|_| ConfigError::Missing("REGISTERED_SERVICES_FILE"))?;
        let users_file = env::var("STATIC_USERS_FILE").ok();

        let dpop_iat_leeway_seconds = env::var("DPOP_IAT_LEEWAY_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        let dpop_max_age_seconds = env::var("DPOP_MAX_AGE_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        Ok(Config {
            addr,
            app_env,
            public_base_url,
            registry,
            signing_key,
            encryption_key,
            services_file,
            users_file,
            dpop_iat_leeway_seconds,
            dpop_max_age_seconds,
        })
    }
}
