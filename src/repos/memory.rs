use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::SharedClock;
use crate::repos::{RegistryError, RegistryResult, TicketRegistry};
use crate::tickets::Ticket;

/// Process-local registry. Expired tickets are evicted when read or by
/// [`TicketRegistry::reap_expired`].
#[derive(Debug)]
pub struct InMemoryTicketRegistry {
    tickets: RwLock<HashMap<String, Ticket>>,
    clock: SharedClock,
}

impl InMemoryTicketRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }
}

#[async_trait]
impl TicketRegistry for InMemoryTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn add_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        let mut tickets = self.tickets.write().await;
        let id = ticket.id().to_string();
        if tickets.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        ticket.state_mut().version = 1;
        tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn load_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        Ok(self.tickets.read().await.get(id).cloned())
    }

    async fn update_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        let mut tickets = self.tickets.write().await;
        let id = ticket.id().to_string();
        let stored = tickets
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let expected = ticket.state().version;
        if stored.state().version != expected {
            return Err(RegistryError::Conflict { id, expected });
        }
        ticket.state_mut().version = expected + 1;
        tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn delete_single_ticket(&self, id: &str) -> RegistryResult<bool> {
        Ok(self.tickets.write().await.remove(id).is_some())
    }

    async fn reap_expired(&self) -> RegistryResult<usize> {
        let now = self.clock.now();
        let mut tickets = self.tickets.write().await;
        let before = tickets.len();
        tickets.retain(|_, t| !t.is_expired(now));
        let reaped = before - tickets.len();
        debug!(reaped, "reaped expired tickets");
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::expiration::ExpirationPolicy;
    use crate::repos::TicketRegistry;
    use crate::service::Service;
    use crate::tickets::{ServiceTicket, TicketGrantingTicket, TicketState};
    use chrono::Duration;
    use std::sync::Arc;

    fn tgt(id: &str, policy: ExpirationPolicy, now: DateTime<Utc>) -> Ticket {
        TicketGrantingTicket::new(TicketState::new(id.into(), policy, None, None, now), None).into()
    }

    fn registry() -> (Arc<FixedClock>, Arc<dyn TicketRegistry>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let registry: Arc<dyn TicketRegistry> = Arc::new(InMemoryTicketRegistry::new(clock.clone()));
        (clock, registry)
    }

    #[tokio::test]
    async fn add_rejects_duplicates() {
        let (clock, registry) = registry();
        let t = tgt("TGT-1", ExpirationPolicy::never(), clock.now());
        registry.add_ticket(t.clone()).await.unwrap();
        assert!(matches!(
            registry.add_ticket(t).await,
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let (clock, registry) = registry();
        let stored = registry
            .add_ticket(tgt("TGT-1", ExpirationPolicy::never(), clock.now()))
            .await
            .unwrap();

        let mut first = stored.clone();
        first.state_mut().update(clock.now());
        let mut second = stored;
        second.state_mut().update(clock.now());

        let written = registry.update_ticket(first).await.unwrap();
        assert_eq!(written.state().version, 2);
        assert!(matches!(
            registry.update_ticket(second).await,
            Err(RegistryError::Conflict { expected: 1, .. })
        ));
    }

    #[tokio::test]
    async fn expired_tickets_are_evicted_on_read() {
        let (clock, registry) = registry();
        registry
            .add_ticket(tgt("TGT-1", ExpirationPolicy::hard_timeout(10), clock.now()))
            .await
            .unwrap();
        assert!(registry.get_ticket("TGT-1").await.unwrap().is_some());

        clock.advance(Duration::seconds(11));
        assert!(registry.get_ticket("TGT-1").await.unwrap().is_none());
        assert!(registry.load_ticket("TGT-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn typed_reads_reject_other_kinds() {
        let (clock, registry) = registry();
        registry
            .add_ticket(tgt("TGT-1", ExpirationPolicy::never(), clock.now()))
            .await
            .unwrap();
        assert!(
            registry
                .get_typed::<ServiceTicket>("TGT-1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            registry
                .get_typed::<TicketGrantingTicket>("TGT-1")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn delete_cascades_to_descendants() {
        let (clock, registry) = registry();
        let now = clock.now();
        let mut granting =
            TicketGrantingTicket::new(TicketState::new("TGT-1".into(), ExpirationPolicy::never(), None, None, now), None);
        let st = granting.grant_service_ticket(
            "ST-1".into(),
            &Service::new("https://app.example.org"),
            ExpirationPolicy::never(),
            false,
            true,
            now,
        );
        granting.descendant_tickets.insert("AT-1".into());
        registry.add_ticket(granting.into()).await.unwrap();
        registry.add_ticket(st.into()).await.unwrap();
        registry
            .add_ticket(tgt("TGT-2", ExpirationPolicy::never(), now))
            .await
            .unwrap();

        let deleted = registry.delete_ticket("TGT-1").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(registry.load_ticket("ST-1").await.unwrap().is_none());
        assert!(registry.load_ticket("TGT-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_atomic_updates_lose_nothing() {
        let (clock, registry) = registry();
        registry
            .add_ticket(tgt("TGT-1", ExpirationPolicy::never(), clock.now()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let now = clock.now();
            handles.push(tokio::spawn(async move {
                registry
                    .update_atomically::<TicketGrantingTicket, (), RegistryError, _>("TGT-1", |t| {
                        t.state.update(now);
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap().unwrap();
        }
        let t = registry
            .get_typed::<TicketGrantingTicket>("TGT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.state.count_of_uses, 4);
    }

    #[tokio::test]
    async fn reap_removes_only_expired() {
        let (clock, registry) = registry();
        let now = clock.now();
        registry
            .add_ticket(tgt("TGT-1", ExpirationPolicy::hard_timeout(5), now))
            .await
            .unwrap();
        registry
            .add_ticket(tgt("TGT-2", ExpirationPolicy::never(), now))
            .await
            .unwrap();
        clock.advance(Duration::seconds(6));
        assert_eq!(registry.reap_expired().await.unwrap(), 1);
    }
}
