//! The CAS ticket chain: sessions, service tickets, proxying and logout.
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::authentication::{Authentication, AuthenticationBuilder};
use crate::error::TicketError;
use crate::principal::Principal;
use crate::repos::TicketRegistry;
use crate::service::Service;
use crate::services::access::AccessStrategyEnforcer;
use crate::services::logout::{LogoutDispatcher, LogoutRequest, logout_requests};
use crate::services::registered::{OAuthRegisteredService, ServicesManager};
use crate::tickets::{
    ProxyGrantingTicket, ProxyTicket, ServiceTicket, TicketFactory, TicketGrantingTicket,
    TicketKind, TypedTicket,
};

/// Outcome of a successful service ticket validation.
#[derive(Clone, Debug, PartialEq)]
pub struct Assertion {
    pub principal: Principal,
    /// Root authentication first, then one entry per proxy hop.
    pub chained_authentications: Vec<Authentication>,
    pub from_new_login: bool,
    pub service: Service,
}

/// Tickets that can be presented to a service and validated.
trait ValidatableTicket: TypedTicket {
    fn service(&self) -> &Service;
    fn chained_authentications(&self) -> &[Authentication];
    fn from_new_login(&self) -> bool;
}

impl ValidatableTicket for ServiceTicket {
    fn service(&self) -> &Service {
        &self.service
    }

    fn chained_authentications(&self) -> &[Authentication] {
        &self.chained_authentications
    }

    fn from_new_login(&self) -> bool {
        self.from_new_login
    }
}

impl ValidatableTicket for ProxyTicket {
    fn service(&self) -> &Service {
        &self.service
    }

    fn chained_authentications(&self) -> &[Authentication] {
        &self.chained_authentications
    }

    fn from_new_login(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct CentralTicketService {
    registry: Arc<dyn TicketRegistry>,
    factory: Arc<TicketFactory>,
    services: Arc<dyn ServicesManager>,
    access: Arc<dyn AccessStrategyEnforcer>,
    authentication: AuthenticationBuilder,
    logout: Option<LogoutDispatcher>,
}

impl CentralTicketService {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        factory: Arc<TicketFactory>,
        services: Arc<dyn ServicesManager>,
        access: Arc<dyn AccessStrategyEnforcer>,
    ) -> Self {
        Self {
            registry,
            factory,
            services,
            access,
            authentication: AuthenticationBuilder::default(),
            logout: None,
        }
    }

    pub fn with_authentication_builder(mut self, builder: AuthenticationBuilder) -> Self {
        self.authentication = builder;
        self
    }

    pub fn with_logout_dispatcher(mut self, dispatcher: LogoutDispatcher) -> Self {
        self.logout = Some(dispatcher);
        self
    }

    fn registered_service(&self, service: &Service) -> Result<Arc<OAuthRegisteredService>, TicketError> {
        self.services.find_by_service(service).ok_or_else(|| {
            warn!(service = %service, "service is not registered");
            TicketError::UnauthorizedService(service.to_string())
        })
    }

    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket, TicketError> {
        self.create_ticket_granting_ticket_for_chain(&[authentication]).await
    }

    /// Open a session for every authentication gathered during one login;
    /// the principals are resolved and elected into one.
    pub async fn create_ticket_granting_ticket_for_chain(
        &self,
        chained: &[Authentication],
    ) -> Result<TicketGrantingTicket, TicketError> {
        let authentication = self.authentication.build(chained).inspect_err(|e| {
            warn!(error = %e, chained = chained.len(), "no principal could be established");
        })?;
        let now = self.registry.now();
        let principal = authentication.principal.id().to_string();
        let tgt = self.factory.create_ticket_granting_ticket(authentication, now)?;
        let tgt = self.registry.add_typed(tgt).await?;
        info!(principal = %principal, "created ticket-granting ticket");
        Ok(tgt)
    }

    /// Grant a service ticket off a live session.
    ///
    /// `credentials_provided` is true when the user just re-entered
    /// credentials (renew); the ticket is then marked as a new login.
    pub async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &Service,
        credentials_provided: bool,
    ) -> Result<ServiceTicket, TicketError> {
        let registered = self.registered_service(service)?;
        let invalid = || TicketError::InvalidTicket(ticket_granting_ticket_id.to_string());

        let snapshot = self
            .registry
            .get_typed::<TicketGrantingTicket>(ticket_granting_ticket_id)
            .await?
            .ok_or_else(invalid)?;
        self.access.ensure_service_access_is_allowed(
            &registered,
            snapshot.authentication().map(|a| &a.principal),
        )?;

        let now = self.registry.now();
        let factory = &self.factory;
        let (_, st) = self
            .registry
            .update_atomically::<TicketGrantingTicket, _, TicketError, _>(
                ticket_granting_ticket_id,
                |tgt| factory.grant_service_ticket(tgt, service, credentials_provided, now),
            )
            .await?
            .ok_or_else(invalid)?;

        let st = self.registry.add_typed(st).await?;
        debug!(ticket_id = %st.state.id, service = %service, "granted service ticket");
        Ok(st)
    }

    /// Validate a service or proxy ticket for `service`. Each call counts as
    /// one use; a ticket that is used up is removed.
    pub async fn validate_service_ticket(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, TicketError> {
        match TicketKind::from_id(ticket_id) {
            Some(TicketKind::Proxy) => self.validate::<ProxyTicket>(ticket_id, service).await,
            _ => self.validate::<ServiceTicket>(ticket_id, service).await,
        }
    }

    async fn validate<T: ValidatableTicket>(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, TicketError> {
        let now = self.registry.now();
        let (ticket, valid_for_service) = self
            .registry
            .update_atomically::<T, _, TicketError, _>(ticket_id, |t| {
                t.state_mut().update(now);
                Ok(t.service().matches(service))
            })
            .await?
            .ok_or_else(|| {
                debug!(ticket_id = %ticket_id, "ticket is unknown or expired");
                TicketError::InvalidTicket(ticket_id.to_string())
            })?;

        if ticket.state().is_expired(now) {
            self.registry.delete_ticket(ticket_id).await?;
        }
        if !valid_for_service {
            error!(
                ticket_id = %ticket_id,
                issued_for = %ticket.service(),
                presented = %service,
                "ticket does not match the supplied service"
            );
            return Err(TicketError::UnrecognizableService {
                id: ticket_id.to_string(),
                service: service.to_string(),
            });
        }

        let registered = self.registered_service(service)?;
        let authentication = ticket
            .chained_authentications()
            .first()
            .or(ticket.state().authentication.as_ref())
            .cloned()
            .ok_or_else(|| TicketError::InvalidTicket(ticket_id.to_string()))?;
        self.access
            .ensure_service_access_is_allowed(&registered, Some(&authentication.principal))?;

        Ok(Assertion {
            principal: authentication.principal.clone(),
            chained_authentications: ticket.chained_authentications().to_vec(),
            from_new_login: ticket.from_new_login(),
            service: ticket.service().clone(),
        })
    }

    /// Let `proxied_by` act on behalf of the user behind `service_ticket_id`.
    pub async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        proxied_by: &Service,
        authentication: Authentication,
    ) -> Result<ProxyGrantingTicket, TicketError> {
        let now = self.registry.now();
        let factory = &self.factory;
        let (_, pgt) = self
            .registry
            .update_atomically::<ServiceTicket, _, TicketError, _>(service_ticket_id, |st| {
                factory.create_proxy_granting_ticket(st, authentication.clone(), proxied_by.clone(), now)
            })
            .await?
            .ok_or_else(|| TicketError::InvalidTicket(service_ticket_id.to_string()))?;

        let pgt = self.registry.add_typed(pgt).await?;
        let pgt_id = pgt.granting.state.id.clone();

        match pgt.granting.state.parent_id.as_deref() {
            Some(parent) => {
                let tracked = self
                    .registry
                    .update_atomically::<TicketGrantingTicket, _, TicketError, _>(parent, |tgt| {
                        tgt.proxy_granting_tickets
                            .insert(pgt_id.clone(), proxied_by.clone());
                        Ok(())
                    })
                    .await?;
                if tracked.is_none() {
                    warn!(ticket_id = %pgt_id, "parent session is gone; proxy-granting ticket is untracked");
                }
            }
            None => warn!(ticket_id = %pgt_id, "proxy-granting ticket has no parent session"),
        }
        debug!(ticket_id = %pgt_id, proxied_by = %proxied_by, "created proxy-granting ticket");
        Ok(pgt)
    }

    pub async fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &Service,
    ) -> Result<ProxyTicket, TicketError> {
        let registered = self.registered_service(service)?;
        let invalid = || TicketError::InvalidTicket(proxy_granting_ticket_id.to_string());

        let snapshot = self
            .registry
            .get_typed::<ProxyGrantingTicket>(proxy_granting_ticket_id)
            .await?
            .ok_or_else(invalid)?;
        self.access.ensure_service_access_is_allowed(
            &registered,
            snapshot.granting.authentication().map(|a| &a.principal),
        )?;

        let now = self.registry.now();
        let factory = &self.factory;
        let (_, pt) = self
            .registry
            .update_atomically::<ProxyGrantingTicket, _, TicketError, _>(
                proxy_granting_ticket_id,
                |pgt| factory.grant_proxy_ticket(pgt, service, now),
            )
            .await?
            .ok_or_else(invalid)?;

        let pt = self.registry.add_typed(pt).await?;
        debug!(ticket_id = %pt.state.id, service = %service, "granted proxy ticket");
        Ok(pt)
    }

    /// End a session: delete it with everything it granted, then notify the
    /// services that took part. Unknown sessions yield no requests.
    pub async fn destroy_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> Result<Vec<LogoutRequest>, TicketError> {
        let Some(tgt) = self
            .registry
            .get_typed::<TicketGrantingTicket>(ticket_granting_ticket_id)
            .await?
        else {
            debug!(ticket_id = %ticket_granting_ticket_id, "no session to destroy");
            return Ok(Vec::new());
        };

        let requests = logout_requests(&tgt, self.services.as_ref());
        let deleted = self.registry.delete_ticket(ticket_granting_ticket_id).await?;
        info!(deleted, notifications = requests.len(), "destroyed ticket-granting ticket");

        if let Some(dispatcher) = &self.logout {
            dispatcher.dispatch(requests.clone());
        }
        Ok(requests)
    }
}
