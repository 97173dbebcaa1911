//! Token exchange (RFC 8693): a new access token for the subject of an
//! existing one, narrowed to the scopes the requesting client may have.
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{GeneratedTokens, TokenGenerator};
use crate::authentication::Authentication;
use crate::services::oauth::context::TokenRequestContext;
use crate::services::oauth::{GrantType, OAuthError, attributes};
use crate::tickets::factory::TokenSpec;

impl TokenGenerator {
    pub(crate) async fn generate_exchange(
        &self,
        ctx: TokenRequestContext,
    ) -> Result<GeneratedTokens, OAuthError> {
        let subject = ctx.exchange.as_ref().ok_or_else(|| {
            OAuthError::InvalidRequest("missing subject token".to_string())
        })?;
        self.ensure_access_token_lifetime(&ctx.registered_service)?;
        let now = self.registry.now();
        let registered = Arc::clone(&ctx.registered_service);

        let principal = self.scope_filter.filter(
            &subject.authentication.principal,
            &registered,
            &ctx.scopes,
        );
        let mut exchanged = Authentication::new(principal, now);
        exchanged.attributes = self.token_authentication(&ctx).attributes;
        if let Some(actor) = &subject.actor {
            exchanged
                .attributes
                .insert_single(attributes::ACTOR, json!({ "sub": actor.id() }));
        }
        if !subject.audiences.is_empty() {
            exchanged.attributes.insert(
                attributes::TOKEN_EXCHANGE_AUDIENCE,
                subject.audiences.iter().map(|a| json!(a)).collect(),
            );
        }

        let spec = TokenSpec {
            service: &ctx.service,
            registered_service: Some(registered.as_ref()),
            client_id: &registered.client_id,
            authentication: exchanged,
            ticket_granting_ticket_id: None,
            scopes: ctx.scopes.clone(),
            claims: ctx.claims.clone(),
            grant_type: GrantType::TokenExchange,
            response_type: None,
        };
        let requested = subject.requested_token_type;
        let access_token = self
            .factory
            .create_access_token(&spec, Some(requested.as_str().to_string()), now)?;
        let access_token = self.registry.add_typed(access_token).await?;
        debug!(client_id = %registered.client_id, token_type = %requested, "exchanged token");

        Ok(GeneratedTokens::Tokens {
            registered_service: registered,
            access_token,
            refresh_token: None,
            issued_token_type: Some(requested),
        })
    }
}
