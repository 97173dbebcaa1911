//! Mints tokens for validated requests and persists them.
//!
//! Supporting tickets are consumed before anything new is minted, so a code
//! or device code redeemed twice concurrently yields tokens only once.
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::authentication::Authentication;
use crate::config::OAuthProperties;
use crate::repos::TicketRegistry;
use crate::services::oauth::context::TokenRequestContext;
use crate::services::oauth::validator::SupportingTicket;
use crate::services::oauth::{GrantType, OAuthError, ResponseType, TokenExchangeType, attributes};
use crate::services::registered::OAuthRegisteredService;
use crate::services::scopes::ScopeToAttributesFilter;
use crate::tickets::factory::TokenSpec;
use crate::tickets::{
    AccessToken, OAuthCode, RefreshToken, TicketFactory, TicketGrantingTicket,
};

mod device;
mod exchange;

/// Result of [`TokenGenerator::generate`].
#[derive(Clone, Debug)]
pub enum GeneratedTokens {
    Tokens {
        registered_service: Arc<OAuthRegisteredService>,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        issued_token_type: Option<TokenExchangeType>,
    },
    DeviceAuthorization {
        device_code: String,
        user_code: String,
        expires_in: i64,
        interval: i64,
    },
}

#[derive(Clone, Debug)]
pub struct TokenGenerator {
    registry: Arc<dyn TicketRegistry>,
    factory: Arc<TicketFactory>,
    scope_filter: Arc<dyn ScopeToAttributesFilter>,
    device_refresh_interval_in_seconds: i64,
}

impl TokenGenerator {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        factory: Arc<TicketFactory>,
        scope_filter: Arc<dyn ScopeToAttributesFilter>,
        oauth: &OAuthProperties,
    ) -> Self {
        Self {
            registry,
            factory,
            scope_filter,
            device_refresh_interval_in_seconds: oauth.device_refresh_interval_in_seconds,
        }
    }

    pub async fn generate(&self, ctx: TokenRequestContext) -> Result<GeneratedTokens, OAuthError> {
        if ctx.response_type == Some(ResponseType::DeviceCode)
            || ctx.grant_type == Some(GrantType::DeviceCode)
        {
            return self.generate_device(ctx).await;
        }
        if ctx.grant_type == Some(GrantType::TokenExchange) {
            return self.generate_exchange(ctx).await;
        }
        self.generate_grant(ctx).await
    }

    /// Authentication stamped on the issued tokens.
    fn token_authentication(&self, ctx: &TokenRequestContext) -> Authentication {
        let now = self.registry.now();
        let mut authentication = ctx.authentication.clone();
        authentication.authentication_date = now;

        let attrs = &mut authentication.attributes;
        if let Some(grant_type) = ctx.grant_type {
            attrs.insert_single(attributes::GRANT_TYPE, grant_type.as_str());
        }
        attrs.insert(
            attributes::SCOPE,
            ctx.scopes.iter().map(|s| json!(s)).collect(),
        );
        attrs.insert_single(attributes::CLIENT_ID, ctx.client_id());
        if !ctx.claims.is_empty() {
            attrs.insert_single(attributes::CLAIMS, Value::Object(ctx.claims.clone()));
        }
        if let Some(jkt) = &ctx.dpop_confirmation {
            attrs.insert_single(attributes::DPOP, true);
            attrs.insert_single(attributes::DPOP_CONFIRMATION, jkt.as_str());
        }
        if let Some(digest) = &ctx.x509_certificate_digest {
            attrs.insert_single(attributes::X509_CERTIFICATE_DIGEST, digest.as_str());
        }
        authentication
    }

    /// Session the new tokens belong to, if it is still alive.
    async fn live_session(&self, ctx: &TokenRequestContext) -> Result<Option<String>, OAuthError> {
        let Some(id) = ctx.ticket_granting_ticket.as_deref() else {
            return Ok(None);
        };
        let live = self
            .registry
            .get_typed::<TicketGrantingTicket>(id)
            .await?
            .map(|t| t.state.id);
        if live.is_none() {
            debug!("granting session expired; tokens will stand alone");
        }
        Ok(live)
    }

    async fn track_in_session(&self, session: Option<&str>, ticket_id: &str) -> Result<(), OAuthError> {
        let Some(session) = session else {
            return Ok(());
        };
        let tracked = self
            .registry
            .update_atomically::<TicketGrantingTicket, _, OAuthError, _>(session, |tgt| {
                tgt.descendant_tickets.insert(ticket_id.to_string());
                Ok(())
            })
            .await?;
        if tracked.is_none() {
            warn!("granting session vanished while issuing tokens");
        }
        Ok(())
    }

    /// Refuse to mint access tokens that would be born expired.
    fn ensure_access_token_lifetime(&self, registered: &OAuthRegisteredService) -> Result<(), OAuthError> {
        let ttl = self.factory.access_token_policy(Some(registered))?.time_to_live(None);
        if ttl <= 0 {
            error!(client_id = %registered.client_id, ttl, "access token lifetime is not positive");
            return Err(OAuthError::Internal);
        }
        Ok(())
    }

    /// Count one use of the authorization code; drop it once used up.
    async fn consume_code(&self, code: &OAuthCode) -> Result<(), OAuthError> {
        let now = self.registry.now();
        let (stored, ()) = self
            .registry
            .update_atomically::<OAuthCode, _, OAuthError, _>(&code.state.id, |c| {
                c.state.update(now);
                Ok(())
            })
            .await?
            .ok_or_else(|| {
                warn!("authorization code was redeemed concurrently");
                OAuthError::InvalidGrant("authorization code is unknown or expired".to_string())
            })?;
        if stored.state.is_expired(now) {
            self.registry.delete_ticket(&stored.state.id).await?;
        }
        Ok(())
    }

    /// Authorization code, password, client credentials, refresh token and
    /// approved device code grants.
    pub(crate) async fn generate_grant(&self, ctx: TokenRequestContext) -> Result<GeneratedTokens, OAuthError> {
        self.ensure_access_token_lifetime(&ctx.registered_service)?;
        if let Some(SupportingTicket::Code(code)) = &ctx.token {
            self.consume_code(code).await?;
        }

        let now = self.registry.now();
        let registered = Arc::clone(&ctx.registered_service);
        let session = self.live_session(&ctx).await?;
        let authentication = self.token_authentication(&ctx);

        let mut spec = TokenSpec {
            service: &ctx.service,
            registered_service: Some(registered.as_ref()),
            client_id: &registered.client_id,
            authentication,
            ticket_granting_ticket_id: session.clone(),
            scopes: ctx.scopes.clone(),
            claims: ctx.claims.clone(),
            grant_type: ctx.grant_type.unwrap_or(GrantType::AuthorizationCode),
            response_type: ctx.response_type,
        };

        let access_token = self.factory.create_access_token(&spec, None, now)?;
        let access_token = self.registry.add_typed(access_token).await?;
        self.track_in_session(session.as_deref(), &access_token.state.id).await?;
        debug!(client_id = %registered.client_id, "issued access token");

        if let Some(SupportingTicket::RefreshToken(old)) = &ctx.token {
            if !ctx.expire_old_refresh_token {
                let at_id = access_token.state.id.clone();
                self.registry
                    .update_atomically::<RefreshToken, _, OAuthError, _>(&old.state.id, |rt| {
                        rt.access_tokens.insert(at_id.clone());
                        Ok(())
                    })
                    .await?;
            }
        }

        let refresh_ttl = self
            .factory
            .refresh_token_policy(Some(registered.as_ref()))
            .time_to_live(None);
        let refresh_token = if ctx.generate_refresh_token && refresh_ttl > 0 {
            spec.scopes = ctx.refresh_scopes.clone();
            let token = self
                .factory
                .create_refresh_token(&spec, Some(access_token.state.id.as_str()), now)?;
            let token = self.registry.add_typed(token).await?;
            self.track_in_session(session.as_deref(), &token.state.id).await?;

            if ctx.expire_old_refresh_token {
                if let Some(SupportingTicket::RefreshToken(old)) = &ctx.token {
                    debug!("expiring rotated refresh token");
                    self.registry.delete_single_ticket(&old.state.id).await?;
                }
            }
            Some(token)
        } else {
            debug!(client_id = %registered.client_id, "no refresh token for this request");
            None
        };

        Ok(GeneratedTokens::Tokens {
            registered_service: registered,
            access_token,
            refresh_token,
            issued_token_type: None,
        })
    }
}
