//! Mints tickets with the right ids, parents and expiration policies.
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::authentication::Authentication;
use crate::config::{OAuthProperties, TicketProperties};
use crate::error::TicketError;
use crate::expiration::builder::access_token_policy;
use crate::expiration::{ExpirationPolicy, ExpirationPolicyBuilder, PolicyError};
use crate::service::Service;
use crate::services::oauth::{GrantType, ResponseType};
use crate::services::registered::OAuthRegisteredService;
use crate::tickets::id::{new_ticket_id, new_user_code};
use crate::tickets::{
    AccessToken, DeviceToken, DeviceUserCode, OAuthCode, OAuthTokenData, ProxyGrantingTicket,
    ProxyTicket, RefreshToken, ServiceTicket, TicketGrantingTicket, TicketKind, TicketState,
};

/// Everything needed to mint a code, access token or refresh token.
#[derive(Clone, Debug)]
pub struct TokenSpec<'a> {
    pub service: &'a Service,
    pub registered_service: Option<&'a OAuthRegisteredService>,
    pub client_id: &'a str,
    pub authentication: Authentication,
    pub ticket_granting_ticket_id: Option<String>,
    pub scopes: BTreeSet<String>,
    pub claims: Map<String, Value>,
    pub grant_type: GrantType,
    pub response_type: Option<ResponseType>,
}

impl TokenSpec<'_> {
    fn data(&self) -> OAuthTokenData {
        OAuthTokenData {
            service: self.service.clone(),
            client_id: self.client_id.to_string(),
            scopes: self.scopes.clone(),
            claims: self.claims.clone(),
            grant_type: self.grant_type,
            response_type: self.response_type,
        }
    }

    fn state(&self, kind: TicketKind, policy: ExpirationPolicy, now: DateTime<Utc>) -> Result<TicketState, TicketError> {
        Ok(TicketState::new(
            new_ticket_id(kind)?,
            policy,
            Some(self.authentication.clone()),
            self.ticket_granting_ticket_id.clone(),
            now,
        ))
    }
}

#[derive(Clone, Debug)]
pub struct TicketFactory {
    ticket_granting_ticket: ExpirationPolicy,
    service_ticket: ExpirationPolicy,
    proxy_ticket: ExpirationPolicy,
    oauth_code: ExpirationPolicy,
    access_token: ExpirationPolicy,
    refresh_token: ExpirationPolicy,
    device_token: ExpirationPolicy,
    device_user_code_length: usize,
    only_track_most_recent_session: bool,
}

impl TicketFactory {
    pub fn new(tickets: &TicketProperties, oauth: &OAuthProperties) -> Result<Self, PolicyError> {
        let builder = ExpirationPolicyBuilder::new(tickets.clone(), oauth.clone());
        Ok(Self {
            ticket_granting_ticket: builder.ticket_granting_ticket()?,
            service_ticket: builder.service_ticket()?,
            proxy_ticket: builder.proxy_ticket()?,
            oauth_code: builder.oauth_code()?,
            access_token: builder.access_token()?,
            refresh_token: builder.refresh_token(),
            device_token: builder.device_token(),
            device_user_code_length: oauth.device_user_code_length,
            only_track_most_recent_session: tickets.tgt_only_track_most_recent_session,
        })
    }

    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
        now: DateTime<Utc>,
    ) -> Result<TicketGrantingTicket, TicketError> {
        Ok(TicketGrantingTicket::new(
            TicketState::new(
                new_ticket_id(TicketKind::TicketGranting)?,
                self.ticket_granting_ticket.clone(),
                Some(authentication),
                None,
                now,
            ),
            None,
        ))
    }

    pub fn grant_service_ticket(
        &self,
        granting: &mut TicketGrantingTicket,
        service: &Service,
        credentials_provided: bool,
        now: DateTime<Utc>,
    ) -> Result<ServiceTicket, TicketError> {
        Ok(granting.grant_service_ticket(
            new_ticket_id(TicketKind::Service)?,
            service,
            self.service_ticket.clone(),
            credentials_provided,
            self.only_track_most_recent_session,
            now,
        ))
    }

    pub fn create_proxy_granting_ticket(
        &self,
        service_ticket: &mut ServiceTicket,
        authentication: Authentication,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> Result<ProxyGrantingTicket, TicketError> {
        service_ticket.grant_proxy_granting_ticket(
            new_ticket_id(TicketKind::ProxyGranting)?,
            authentication,
            self.ticket_granting_ticket.clone(),
            proxied_by,
            now,
        )
    }

    pub fn grant_proxy_ticket(
        &self,
        granting: &mut ProxyGrantingTicket,
        service: &Service,
        now: DateTime<Utc>,
    ) -> Result<ProxyTicket, TicketError> {
        Ok(granting.grant_proxy_ticket(
            new_ticket_id(TicketKind::Proxy)?,
            service,
            self.proxy_ticket.clone(),
            self.only_track_most_recent_session,
            now,
        ))
    }

    pub fn code_policy(&self, registered: Option<&OAuthRegisteredService>) -> Result<ExpirationPolicy, TicketError> {
        match registered.and_then(|s| s.code_expiration) {
            Some(c) => Ok(ExpirationPolicy::multi_time_use(c.number_of_uses, c.time_to_kill_in_seconds)?),
            None => Ok(self.oauth_code.clone()),
        }
    }

    pub fn access_token_policy(&self, registered: Option<&OAuthRegisteredService>) -> Result<ExpirationPolicy, TicketError> {
        match registered.and_then(|s| s.access_token_expiration) {
            Some(e) => Ok(access_token_policy(e.max_time_to_live_in_seconds, e.time_to_kill_in_seconds)?),
            None => Ok(self.access_token.clone()),
        }
    }

    pub fn refresh_token_policy(&self, registered: Option<&OAuthRegisteredService>) -> ExpirationPolicy {
        match registered.and_then(|s| s.refresh_token_time_to_kill_in_seconds) {
            Some(ttk) => ExpirationPolicy::hard_timeout(ttk),
            None => self.refresh_token.clone(),
        }
    }

    pub fn device_token_policy(&self, registered: Option<&OAuthRegisteredService>) -> ExpirationPolicy {
        match registered.and_then(|s| s.device_token_time_to_kill_in_seconds) {
            Some(ttk) => ExpirationPolicy::hard_timeout(ttk),
            None => self.device_token.clone(),
        }
    }

    pub fn create_code(
        &self,
        spec: &TokenSpec<'_>,
        redirect_uri: Option<String>,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<OAuthCode, TicketError> {
        let policy = self.code_policy(spec.registered_service)?;
        Ok(OAuthCode {
            state: spec.state(TicketKind::OAuthCode, policy, now)?,
            token: spec.data(),
            redirect_uri,
            code_challenge,
            code_challenge_method,
        })
    }

    pub fn create_access_token(
        &self,
        spec: &TokenSpec<'_>,
        token_type: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TicketError> {
        let policy = self.access_token_policy(spec.registered_service)?;
        Ok(AccessToken {
            state: spec.state(TicketKind::AccessToken, policy, now)?,
            token: spec.data(),
            token_type,
        })
    }

    pub fn create_refresh_token(
        &self,
        spec: &TokenSpec<'_>,
        access_token_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, TicketError> {
        let policy = self.refresh_token_policy(spec.registered_service);
        Ok(RefreshToken {
            state: spec.state(TicketKind::RefreshToken, policy, now)?,
            token: spec.data(),
            access_tokens: access_token_id.map(str::to_string).into_iter().collect(),
        })
    }

    /// A device code and its user code, cross-linked by id.
    pub fn create_device_code(
        &self,
        service: &Service,
        registered: Option<&OAuthRegisteredService>,
        client_id: &str,
        scopes: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<(DeviceToken, DeviceUserCode), TicketError> {
        let policy = self.device_token_policy(registered);
        let device_id = new_ticket_id(TicketKind::DeviceToken)?;
        let user_code_id = DeviceUserCode::id_for(&new_user_code(self.device_user_code_length)?);

        let device = DeviceToken {
            state: TicketState::new(device_id.clone(), policy.clone(), None, None, now),
            service: service.clone(),
            client_id: client_id.to_string(),
            scopes,
            user_code: user_code_id.clone(),
        };
        let user_code = DeviceUserCode {
            state: TicketState::new(user_code_id, policy, None, Some(device_id.clone()), now),
            device_code: device_id,
            approved: false,
        };
        Ok((device, user_code))
    }
}
