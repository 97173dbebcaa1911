//! Single logout: tell every service that took part in a session that the
//! session is over.
//!
//! Notifications are side effects. [`LogoutDispatcher::dispatch`] hands them to
//! an injected tokio runtime and returns immediately.
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::Service;
use crate::services::registered::ServicesManager;
use crate::tickets::TicketGrantingTicket;

#[derive(Debug, Error)]
pub enum LogoutError {
    #[error("logout callback to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("logout callback to {url} answered {status}")]
    Rejected { url: String, status: u16 },
}

/// One back-channel logout message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogoutRequest {
    /// Service ticket that established the session at the service.
    pub ticket_id: String,
    pub service: Service,
    pub logout_url: String,
}

impl LogoutRequest {
    /// SAML 2 `LogoutRequest` body carried in the `logoutRequest` form field.
    pub fn payload(&self, issued_at: DateTime<Utc>) -> String {
        format!(
            concat!(
                "<samlp:LogoutRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "ID=\"LR-{}\" Version=\"2.0\" IssueInstant=\"{}\">",
                "<saml:NameID xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\">@NOT_USED@</saml:NameID>",
                "<samlp:SessionIndex>{}</samlp:SessionIndex>",
                "</samlp:LogoutRequest>"
            ),
            Uuid::new_v4(),
            issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.ticket_id
        )
    }
}

/// Build the logout requests for every service the session touched.
///
/// Services that are not registered or have logout disabled are skipped.
pub fn logout_requests(
    granting: &TicketGrantingTicket,
    services: &dyn ServicesManager,
) -> Vec<LogoutRequest> {
    granting
        .services
        .iter()
        .filter_map(|(ticket_id, service)| {
            let Some(registered) = services.find_by_service(service) else {
                debug!(service = %service, "no registered service; skipping logout");
                return None;
            };
            if !registered.logout_enabled {
                return None;
            }
            let logout_url = registered
                .logout_url
                .clone()
                .unwrap_or_else(|| service.normalized().to_string());
            Some(LogoutRequest {
                ticket_id: ticket_id.clone(),
                service: service.clone(),
                logout_url,
            })
        })
        .collect()
}

#[async_trait]
pub trait LogoutNotifier: Send + Sync + fmt::Debug {
    async fn notify(&self, request: &LogoutRequest) -> Result<(), LogoutError>;
}

/// Posts the SAML logout message as a form field.
#[derive(Clone, Debug)]
pub struct HttpLogoutNotifier {
    client: reqwest::Client,
}

impl HttpLogoutNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LogoutNotifier for HttpLogoutNotifier {
    async fn notify(&self, request: &LogoutRequest) -> Result<(), LogoutError> {
        let body = request.payload(Utc::now());
        let response = self
            .client
            .post(&request.logout_url)
            .form(&[("logoutRequest", body.as_str())])
            .send()
            .await
            .map_err(|source| LogoutError::Transport {
                url: request.logout_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LogoutError::Rejected {
                url: request.logout_url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Fire-and-forget delivery of logout requests.
#[derive(Clone, Debug)]
pub struct LogoutDispatcher {
    notifier: Arc<dyn LogoutNotifier>,
    executor: Handle,
}

impl LogoutDispatcher {
    pub fn new(notifier: Arc<dyn LogoutNotifier>, executor: Handle) -> Self {
        Self { notifier, executor }
    }

    /// Spawn one task per request. Failures are logged, never returned.
    pub fn dispatch(&self, requests: Vec<LogoutRequest>) -> usize {
        let count = requests.len();
        for request in requests {
            let notifier = Arc::clone(&self.notifier);
            self.executor.spawn(async move {
                match notifier.notify(&request).await {
                    Ok(()) => debug!(service = %request.service, "logout notification delivered"),
                    Err(e) => warn!(service = %request.service, error = %e, "logout notification failed"),
                }
            });
        }
        count
    }
}
