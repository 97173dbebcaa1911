//! Browser single sign-on tickets: the granting ticket and what it grants.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::authentication::Authentication;
use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;
use crate::service::Service;
use crate::tickets::TicketState;

/// Root of a login session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    pub state: TicketState,
    /// Service tickets granted from this session, by id.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Proxy-granting tickets issued below this session, by id.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeMap<String, Service>,
    /// Other tickets (OAuth codes and tokens) bound to this session.
    #[serde(default)]
    pub descendant_tickets: BTreeSet<String>,
    #[serde(default)]
    pub chained_authentications: Vec<Authentication>,
    #[serde(default)]
    pub proxied_by: Option<Service>,
}

impl TicketGrantingTicket {
    pub fn new(state: TicketState, proxied_by: Option<Service>) -> Self {
        let chained_authentications = state.authentication.iter().cloned().collect();
        Self {
            state,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
            chained_authentications,
            proxied_by,
        }
    }

    pub fn is_root(&self) -> bool {
        self.state.parent_id.is_none()
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.state.authentication.as_ref()
    }

    /// Grant a service ticket and track the session for `service`.
    ///
    /// With `only_track_most_recent_session`, earlier tickets for the same
    /// normalized service are forgotten.
    pub fn grant_service_ticket(
        &mut self,
        id: String,
        service: &Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) -> ServiceTicket {
        let from_new_login = credentials_provided || self.state.count_of_uses == 0;
        self.track_service(&id, service, only_track_most_recent_session, now);
        ServiceTicket {
            state: TicketState::new(
                id,
                expiration_policy,
                self.state.authentication.clone(),
                Some(self.state.id.clone()),
                now,
            ),
            service: service.clone(),
            from_new_login,
            granted_ticket_already: false,
            chained_authentications: self.chained_authentications.clone(),
        }
    }

    pub(crate) fn track_service(
        &mut self,
        id: &str,
        service: &Service,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) {
        self.state.update(now);
        if only_track_most_recent_session {
            self.services.retain(|_, s| !s.matches(service));
        }
        self.services.insert(id.to_string(), service.clone());
    }

    pub fn descendant_ids(&self) -> Vec<String> {
        self.services
            .keys()
            .chain(self.proxy_granting_tickets.keys())
            .chain(self.descendant_tickets.iter())
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub state: TicketState,
    pub service: Service,
    pub from_new_login: bool,
    #[serde(default)]
    pub granted_ticket_already: bool,
    #[serde(default)]
    pub chained_authentications: Vec<Authentication>,
}

impl ServiceTicket {
    pub fn is_valid_for(&self, service: &Service) -> bool {
        self.service.matches(service)
    }

    /// At most one proxy-granting ticket per service ticket.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: String,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> Result<ProxyGrantingTicket, TicketError> {
        if self.granted_ticket_already {
            return Err(TicketError::AlreadyGranted(self.state.id.clone()));
        }
        self.granted_ticket_already = true;

        let mut granting = TicketGrantingTicket::new(
            TicketState::new(
                id,
                expiration_policy,
                Some(authentication.clone()),
                self.state.parent_id.clone(),
                now,
            ),
            Some(proxied_by.clone()),
        );
        granting.chained_authentications = self
            .chained_authentications
            .iter()
            .cloned()
            .chain(std::iter::once(authentication))
            .collect();
        Ok(ProxyGrantingTicket {
            granting,
            proxied_by,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyGrantingTicket {
    pub granting: TicketGrantingTicket,
    pub proxied_by: Service,
}

impl ProxyGrantingTicket {
    pub fn grant_proxy_ticket(
        &mut self,
        id: String,
        service: &Service,
        expiration_policy: ExpirationPolicy,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) -> ProxyTicket {
        self.granting
            .track_service(&id, service, only_track_most_recent_session, now);
        ProxyTicket {
            state: TicketState::new(
                id,
                expiration_policy,
                self.granting.state.authentication.clone(),
                Some(self.granting.state.id.clone()),
                now,
            ),
            service: service.clone(),
            proxied_by: self.proxied_by.clone(),
            chained_authentications: self.granting.chained_authentications.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyTicket {
    pub state: TicketState,
    pub service: Service,
    pub proxied_by: Service,
    #[serde(default)]
    pub chained_authentications: Vec<Authentication>,
}
