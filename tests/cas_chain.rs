mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use common::{BACKEND, Fixture, PORTAL, PROXY_CALLBACK, default_services};
use sso_core::services::access::DefaultAccessStrategyEnforcer;
use sso_core::services::logout::{LogoutDispatcher, LogoutError, LogoutNotifier, LogoutRequest};
use sso_core::services::ticketing::CentralTicketService;
use sso_core::tickets::{ServiceTicket, TicketGrantingTicket};
use sso_core::{Service, TicketError};

#[derive(Debug)]
struct Recording(mpsc::UnboundedSender<LogoutRequest>);

#[async_trait]
impl LogoutNotifier for Recording {
    async fn notify(&self, request: &LogoutRequest) -> Result<(), LogoutError> {
        let _ = self.0.send(request.clone());
        Ok(())
    }
}

async fn session(fx: &Fixture) -> Result<String> {
    let tgt = fx.cas.create_ticket_granting_ticket(fx.authentication()).await?;
    Ok(tgt.state.id)
}

#[tokio::test]
async fn service_ticket_validates_once() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;
    let portal = Service::new(PORTAL);

    let st = fx.cas.grant_service_ticket(&tgt, &portal, true).await?;
    assert!(st.state.id.starts_with("ST-"));

    let assertion = fx.cas.validate_service_ticket(&st.state.id, &portal).await?;
    assert_eq!(assertion.principal.id(), "casuser");
    assert!(assertion.from_new_login);
    assert_eq!(assertion.chained_authentications.len(), 1);

    let again = fx.cas.validate_service_ticket(&st.state.id, &portal).await;
    assert!(matches!(again, Err(TicketError::InvalidTicket(_))));
    Ok(())
}

#[tokio::test]
async fn ticket_presented_by_another_service_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;
    let st = fx.cas.grant_service_ticket(&tgt, &Service::new(PORTAL), false).await?;

    let result = fx
        .cas
        .validate_service_ticket(&st.state.id, &Service::new(BACKEND))
        .await;
    assert!(matches!(result, Err(TicketError::UnrecognizableService { .. })));
    Ok(())
}

#[tokio::test]
async fn unregistered_service_gets_no_ticket() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;

    let result = fx
        .cas
        .grant_service_ticket(&tgt, &Service::new("https://intranet.example.net/"), false)
        .await;
    assert!(matches!(result, Err(TicketError::UnauthorizedService(_))));
    Ok(())
}

#[tokio::test]
async fn disabled_service_is_denied() -> Result<()> {
    let mut services = default_services();
    for service in services.iter_mut().filter(|s| s.name == "portal") {
        service.access_strategy.enabled = false;
    }
    let fx = Fixture::with_services(services);
    let tgt = session(&fx).await?;

    let result = fx.cas.grant_service_ticket(&tgt, &Service::new(PORTAL), false).await;
    assert!(matches!(result, Err(TicketError::AccessDenied(_))));
    Ok(())
}

#[tokio::test]
async fn proxy_chain_carries_every_authentication() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;
    let portal = Service::new(PORTAL);
    let st = fx.cas.grant_service_ticket(&tgt, &portal, false).await?;

    let pgt = fx
        .cas
        .create_proxy_granting_ticket(&st.state.id, &Service::new(PROXY_CALLBACK), fx.authentication())
        .await?;
    let pgt_id = pgt.granting.state.id.clone();
    assert!(pgt_id.starts_with("PGT-"));

    let twice = fx
        .cas
        .create_proxy_granting_ticket(&st.state.id, &Service::new(PROXY_CALLBACK), fx.authentication())
        .await;
    assert!(matches!(twice, Err(TicketError::AlreadyGranted(_))));

    fx.cas.validate_service_ticket(&st.state.id, &portal).await?;

    let backend = Service::new(BACKEND);
    let pt = fx.cas.grant_proxy_ticket(&pgt_id, &backend).await?;
    assert!(pt.state.id.starts_with("PT-"));

    let assertion = fx.cas.validate_service_ticket(&pt.state.id, &backend).await?;
    assert_eq!(assertion.chained_authentications.len(), 2);
    assert_eq!(assertion.principal.id(), "casuser");
    assert!(!assertion.from_new_login);

    let session = fx
        .registry
        .get_typed::<TicketGrantingTicket>(&tgt)
        .await?
        .expect("session is live");
    assert!(session.proxy_granting_tickets.contains_key(&pgt_id));
    Ok(())
}

#[tokio::test]
async fn service_ticket_expires_after_ten_seconds() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;
    let portal = Service::new(PORTAL);
    let st = fx.cas.grant_service_ticket(&tgt, &portal, false).await?;

    fx.advance(11);
    let result = fx.cas.validate_service_ticket(&st.state.id, &portal).await;
    assert!(matches!(result, Err(TicketError::InvalidTicket(_))));
    assert!(fx.registry.get_typed::<ServiceTicket>(&st.state.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn idle_session_cannot_grant() -> Result<()> {
    let fx = Fixture::new();
    let tgt = session(&fx).await?;

    fx.advance(7201);
    let result = fx.cas.grant_service_ticket(&tgt, &Service::new(PORTAL), false).await;
    assert!(matches!(result, Err(TicketError::InvalidTicket(_))));
    Ok(())
}

#[tokio::test]
async fn destroying_session_notifies_services_and_removes_tickets() -> Result<()> {
    let fx = Fixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cas = CentralTicketService::new(
        Arc::clone(&fx.registry),
        Arc::clone(&fx.factory),
        fx.services.clone(),
        Arc::new(DefaultAccessStrategyEnforcer),
    )
    .with_logout_dispatcher(LogoutDispatcher::new(Arc::new(Recording(tx)), Handle::current()));

    let tgt = cas.create_ticket_granting_ticket(fx.authentication()).await?.state.id;
    let portal_st = cas.grant_service_ticket(&tgt, &Service::new(PORTAL), false).await?;
    let backend_st = cas.grant_service_ticket(&tgt, &Service::new(BACKEND), false).await?;

    let requests = cas.destroy_ticket_granting_ticket(&tgt).await?;
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().any(|r| r.ticket_id == portal_st.state.id && r.logout_url == PORTAL));

    for _ in 0..requests.len() {
        assert!(rx.recv().await.is_some());
    }

    assert!(fx.registry.get_typed::<TicketGrantingTicket>(&tgt).await?.is_none());
    assert!(fx.registry.get_typed::<ServiceTicket>(&portal_st.state.id).await?.is_none());
    assert!(fx.registry.get_typed::<ServiceTicket>(&backend_st.state.id).await?.is_none());

    // A second logout for the same session is a no-op.
    assert!(cas.destroy_ticket_granting_ticket(&tgt).await?.is_empty());
    Ok(())
}
