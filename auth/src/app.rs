use axum::{Router, routing::get};
use std::{panic, process, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sso_core::config::{OAuthProperties, TicketProperties};
use sso_core::repos::{
    InMemoryTicketRegistry, PostgresTicketRegistry, TicketRegistry, ValkeyTicketRegistry,
};
use sso_core::services::access::DefaultAccessStrategyEnforcer;
use sso_core::services::oauth::context::{CredentialAuthenticator, RejectingAuthenticator};
use sso_core::services::oauth::encoder::AccessTokenEncoder;
use sso_core::services::oauth::jwt::JwtCodec;
use sso_core::services::oauth::token_service::TokenServiceParts;
use sso_core::services::oauth::TokenService;
use sso_core::services::registered::InMemoryServicesManager;
use sso_core::services::scopes::DefaultScopeToAttributesFilter;
use sso_core::tickets::TicketFactory;
use sso_core::{AuthenticationBuilder, SharedClock, SystemClock};

use crate::api;
use crate::config::{Config, RegistryBackend, SigningKey};
use crate::error::AppError;
use crate::middleware;
use crate::services::dpop::DpopPolicy;
use crate::services::users::StaticUsersAuthenticator;
use crate::state::AppState;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    // RUST_LOG wins, e.g. RUST_LOG=info,sso_core=debug,tower_http=debug
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // stderr may be hidden depending on how the process is launched.
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let config = Config::from_env()?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    info!(
        "starting token endpoint in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let registry = build_registry(&config, Arc::clone(&clock)).await?;
    spawn_reaper(Arc::clone(&registry));

    let state = build_state(&config, registry, clock).await?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| {
            error!(addr = %config.addr, error = %e, "failed to bind listener");
            AppError::Internal
        })?;
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "server stopped");
        AppError::Internal
    })?;

    Ok(())
}

async fn build_registry(
    config: &Config,
    clock: SharedClock,
) -> Result<Arc<dyn TicketRegistry>, AppError> {
    let registry: Arc<dyn TicketRegistry> = match &config.registry {
        RegistryBackend::Memory => Arc::new(InMemoryTicketRegistry::new(clock)),
        RegistryBackend::Valkey(url) => {
            Arc::new(ValkeyTicketRegistry::new(url, clock).await.map_err(|e| {
                error!(error = %e, "failed to open valkey ticket registry");
                AppError::Internal
            })?)
        }
        RegistryBackend::Postgres(url) => {
            let registry = PostgresTicketRegistry::connect(url, clock).await.map_err(|e| {
                error!(error = %e, "failed to connect to postgres");
                AppError::Internal
            })?;
            registry.ensure_schema().await.map_err(|e| {
                error!(error = %e, "failed to create tickets table");
                AppError::Internal
            })?;
            Arc::new(registry)
        }
    };
    info!(backend = registry.backend_name(), "ticket registry ready");
    Ok(registry)
}

/// Periodically drop expired tickets the registry does not expire itself.
fn spawn_reaper(registry: Arc<dyn TicketRegistry>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            match registry.reap_expired().await {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "reaped expired tickets"),
                Err(e) => warn!(error = %e, "ticket reaping failed"),
            }
        }
    });
}

fn build_codec(config: &Config, oauth: &OAuthProperties) -> Result<Option<Arc<JwtCodec>>, AppError> {
    let Some(key) = &config.signing_key else {
        if oauth.create_as_jwt {
            warn!("JWT access tokens requested but no signing key configured; issuing opaque tokens");
        }
        return Ok(None);
    };
    let codec = match key {
        SigningKey::Ed25519 {
            private_pem,
            public_pem,
        } => JwtCodec::from_ed_pem(oauth.issuer.clone(), private_pem, public_pem),
        SigningKey::Secret(secret) => JwtCodec::from_secret(oauth.issuer.clone(), secret.as_bytes()),
    }
    .map_err(|e| {
        error!(error = %e, "invalid access token signing key");
        AppError::Internal
    })?;
    let codec = match &config.encryption_key {
        Some(key) => codec.with_encryption_key(key.clone()).map_err(|e| {
            error!(error = %e, "invalid access token encryption key");
            AppError::Internal
        })?,
        None => codec,
    };
    Ok(Some(Arc::new(codec)))
}

async fn build_state(
    config: &Config,
    registry: Arc<dyn TicketRegistry>,
    clock: SharedClock,
) -> Result<AppState, AppError> {
    let tickets = TicketProperties::from_env();
    let oauth = OAuthProperties::from_env();

    let factory = TicketFactory::new(&tickets, &oauth).map_err(|e| {
        error!(error = %e, "invalid expiration policy settings");
        AppError::Internal
    })?;

    let raw = tokio::fs::read_to_string(&config.services_file)
        .await
        .map_err(|e| {
            error!(path = %config.services_file, error = %e, "failed to read registered services");
            AppError::Internal
        })?;
    let services = InMemoryServicesManager::from_json(&raw).map_err(|e| {
        error!(path = %config.services_file, error = %e, "invalid registered services");
        AppError::Internal
    })?;

    let users: Arc<dyn CredentialAuthenticator> = match &config.users_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                error!(path = %path, error = %e, "failed to read static users");
                AppError::Internal
            })?;
            let users = StaticUsersAuthenticator::from_json(&raw).map_err(|e| {
                error!(path = %path, error = %e, "invalid static users");
                AppError::Internal
            })?;
            info!(users = users.len(), "loaded static users");
            Arc::new(users)
        }
        None => {
            warn!("STATIC_USERS_FILE not set; password grant and device approval are disabled");
            Arc::new(RejectingAuthenticator)
        }
    };

    let encoder = AccessTokenEncoder::new(build_codec(config, &oauth)?, oauth.create_as_jwt);
    let tokens = TokenService::new(
        TokenServiceParts {
            registry,
            factory: Arc::new(factory),
            services: Arc::new(services),
            access: Arc::new(DefaultAccessStrategyEnforcer),
            scope_filter: Arc::new(DefaultScopeToAttributesFilter::default()),
            authenticator: Arc::clone(&users),
            authentication: AuthenticationBuilder::default(),
            encoder,
        },
        &oauth,
    );

    let dpop = DpopPolicy {
        iat_leeway_seconds: config.dpop_iat_leeway_seconds,
        max_age_seconds: config.dpop_max_age_seconds,
    };
    Ok(AppState::new(
        Arc::new(tokens),
        users,
        clock,
        dpop,
        config.public_base_url.clone(),
    ))
}

pub(crate) fn build_router(state: AppState) -> Router {
    async fn health() -> &'static str {
        "ok"
    }

    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes(state.clone()))
        .with_state(state);

    middleware::http::apply(router)
}
