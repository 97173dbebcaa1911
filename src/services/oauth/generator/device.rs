//! Device authorization grant (RFC 8628).
//!
//! Polling is cooperative: readiness is computed per request from the
//! timestamps stored on the device code.
use chrono::Duration;
use tracing::{debug, info, warn};

use super::{GeneratedTokens, TokenGenerator};
use crate::authentication::Authentication;
use crate::services::oauth::context::TokenRequestContext;
use crate::services::oauth::{GrantType, OAuthError, params};
use crate::tickets::{DeviceToken, DeviceUserCode};

impl TokenGenerator {
    pub(crate) async fn generate_device(
        &self,
        ctx: TokenRequestContext,
    ) -> Result<GeneratedTokens, OAuthError> {
        if ctx.grant_type != Some(GrantType::DeviceCode) {
            return self.create_device_codes(&ctx).await;
        }
        let Some(device_code) = ctx.device_code.clone() else {
            return Err(OAuthError::InvalidRequest(format!("missing parameter {}", params::DEVICE_CODE)));
        };
        self.poll_device_code(ctx, &device_code).await
    }

    async fn create_device_codes(&self, ctx: &TokenRequestContext) -> Result<GeneratedTokens, OAuthError> {
        let now = self.registry.now();
        let (device, user_code) = self.factory.create_device_code(
            &ctx.service,
            Some(ctx.registered_service.as_ref()),
            ctx.client_id(),
            ctx.scopes.clone(),
            now,
        )?;
        let device = self.registry.add_typed(device).await?;
        let user_code = self.registry.add_typed(user_code).await?;
        debug!(client_id = %ctx.client_id(), "issued device and user codes");

        Ok(GeneratedTokens::DeviceAuthorization {
            expires_in: device.state.time_to_live(),
            device_code: device.state.id,
            user_code: user_code.user_code().to_string(),
            interval: self.device_refresh_interval_in_seconds,
        })
    }

    async fn poll_device_code(
        &self,
        ctx: TokenRequestContext,
        device_code: &str,
    ) -> Result<GeneratedTokens, OAuthError> {
        let invalid = || OAuthError::InvalidDeviceToken(device_code.to_string());

        let Some(device) = self.registry.get_typed::<DeviceToken>(device_code).await? else {
            warn!("device code is invalid or expired");
            self.registry.delete_ticket(device_code).await?;
            return Err(invalid());
        };
        if device.client_id != ctx.client_id() {
            warn!(client_id = %ctx.client_id(), "device code belongs to another client");
            return Err(invalid());
        }
        let Some(user_code) = self
            .registry
            .get_typed::<DeviceUserCode>(&device.user_code)
            .await?
        else {
            warn!("user code linked to device code is invalid or expired");
            return Err(invalid());
        };

        if user_code.approved {
            // Whoever removes the device code redeems it.
            if !self.registry.delete_single_ticket(device_code).await? {
                return Err(invalid());
            }
            self.registry.delete_single_ticket(&user_code.state.id).await?;

            let authentication = user_code.state.authentication.clone().ok_or_else(|| {
                warn!("approved user code carries no authentication");
                OAuthError::Internal
            })?;
            info!(client_id = %ctx.client_id(), "device code approved; issuing tokens");

            let granted = TokenRequestContext {
                authentication,
                grant_type: Some(GrantType::DeviceCode),
                response_type: None,
                scopes: device.scopes.clone(),
                refresh_scopes: device.scopes.clone(),
                device_code: None,
                token: None,
                ticket_granting_ticket: None,
                generate_refresh_token: ctx.registered_service.generate_refresh_token,
                expire_old_refresh_token: false,
                ..ctx
            };
            return self.generate_grant(granted).await;
        }

        let now = self.registry.now();
        let interval = Duration::seconds(self.device_refresh_interval_in_seconds);
        let (_, throttled) = self
            .registry
            .update_atomically::<DeviceToken, _, OAuthError, _>(device_code, |d| {
                let polled_before = d.state.count_of_uses > 0;
                if polled_before && d.state.last_time_used + interval > now {
                    return Ok(true);
                }
                d.state.update(now);
                Ok(false)
            })
            .await?
            .ok_or_else(invalid)?;

        if throttled {
            warn!(
                interval = self.device_refresh_interval_in_seconds,
                "device code polled faster than the refresh interval"
            );
            return Err(OAuthError::ThrottledDeviceUserCodeApproval(device_code.to_string()));
        }
        debug!("user code not approved yet");
        Err(OAuthError::UnapprovedDeviceUserCode(device_code.to_string()))
    }

    /// Mark a user code as approved by `authentication`. Polling the paired
    /// device code then yields tokens for that user.
    pub async fn approve_device_user_code(
        &self,
        user_code: &str,
        authentication: Authentication,
    ) -> Result<DeviceUserCode, OAuthError> {
        let now = self.registry.now();
        let id = DeviceUserCode::id_for(user_code);
        let (approved, ()) = self
            .registry
            .update_atomically::<DeviceUserCode, _, OAuthError, _>(&id, |code| {
                if code.approved {
                    return Err(OAuthError::InvalidGrant("user code is already approved".to_string()));
                }
                code.approved = true;
                code.state.authentication = Some(authentication.clone());
                code.state.update(now);
                Ok(())
            })
            .await?
            .ok_or_else(|| OAuthError::InvalidDeviceToken(user_code.to_string()))?;
        info!(principal = %authentication.principal.id(), "user code approved");
        Ok(approved)
    }
}
