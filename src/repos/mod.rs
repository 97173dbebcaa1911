//! Ticket registry contract and backends.
//!
//! The registry owns the canonical copy of every ticket. Callers get
//! snapshots and write them back through [`TicketRegistry::update_ticket`],
//! which refuses stale snapshots (optimistic versioning) so concurrent uses of
//! the same ticket never lose an update.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

use crate::tickets::{Ticket, TypedTicket};

pub mod error;
pub mod memory;
pub mod postgres;
pub mod valkey;

pub use error::{RegistryError, RegistryResult};
pub use memory::InMemoryTicketRegistry;
pub use postgres::PostgresTicketRegistry;
pub use valkey::ValkeyTicketRegistry;

/// Attempts made by [`update_atomically`](dyn TicketRegistry::update_atomically)
/// before giving up on a contended ticket.
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

#[async_trait]
pub trait TicketRegistry: Send + Sync + fmt::Debug {
    /// Backend name (for logging).
    fn backend_name(&self) -> &'static str;

    /// Current time as seen by this registry's clock.
    fn now(&self) -> DateTime<Utc>;

    /// Store a new ticket. Fails with `Duplicate` if the id is taken.
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<Ticket>;

    /// Raw read, expired or not.
    async fn load_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>>;

    /// Replace a ticket if nobody wrote it since `ticket` was read; returns the
    /// stored copy with its new version.
    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<Ticket>;

    /// Remove one ticket without touching its descendants.
    async fn delete_single_ticket(&self, id: &str) -> RegistryResult<bool>;

    /// Drop every expired ticket the backend can find; returns how many went.
    async fn reap_expired(&self) -> RegistryResult<usize> {
        Ok(0)
    }

    /// Read a live ticket. An expired ticket is evicted on the way and
    /// reported as absent.
    async fn get_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        let Some(ticket) = self.load_ticket(id).await? else {
            return Ok(None);
        };
        if ticket.is_expired(self.now()) {
            debug!(ticket_id = %id, backend = self.backend_name(), "evicting expired ticket");
            self.delete_single_ticket(id).await?;
            return Ok(None);
        }
        Ok(Some(ticket))
    }
}

impl dyn TicketRegistry {
    /// Read a live ticket of kind `T`; any other kind reads as absent.
    pub async fn get_typed<T: TypedTicket>(&self, id: &str) -> RegistryResult<Option<T>> {
        let Some(ticket) = self.get_ticket(id).await? else {
            return Ok(None);
        };
        if ticket.kind() != T::KIND {
            debug!(
                ticket_id = %id,
                expected = %T::KIND,
                actual = %ticket.kind(),
                "ticket kind mismatch"
            );
            return Ok(None);
        }
        Ok(ticket.into_typed())
    }

    pub async fn add_typed<T: TypedTicket>(&self, ticket: T) -> RegistryResult<T> {
        let id = ticket.id().to_string();
        self.add_ticket(ticket.into())
            .await?
            .into_typed()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Delete a ticket and everything whose lifetime hangs off it.
    pub async fn delete_ticket(&self, id: &str) -> RegistryResult<usize> {
        let mut pending = vec![id.to_string()];
        let mut seen = HashSet::new();
        let mut deleted = 0;
        while let Some(next) = pending.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(ticket) = self.load_ticket(&next).await? {
                pending.extend(ticket.descendants());
            }
            if self.delete_single_ticket(&next).await? {
                deleted += 1;
            }
        }
        debug!(ticket_id = %id, deleted, "deleted ticket tree");
        Ok(deleted)
    }

    /// Read-modify-write a live ticket, retrying when another writer got
    /// there first. `mutate` may run more than once and must only touch the
    /// ticket it is given. Returns `None` if the ticket is absent or expired.
    pub async fn update_atomically<T, R, E, F>(
        &self,
        id: &str,
        mut mutate: F,
    ) -> Result<Option<(T, R)>, E>
    where
        T: TypedTicket,
        R: Send,
        E: From<RegistryError>,
        F: FnMut(&mut T) -> Result<R, E> + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(mut ticket) = self.get_typed::<T>(id).await? else {
                return Ok(None);
            };
            let out = mutate(&mut ticket)?;
            match self.update_ticket(ticket.into()).await {
                Ok(stored) => {
                    let stored = stored
                        .into_typed::<T>()
                        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
                    return Ok(Some((stored, out)));
                }
                Err(RegistryError::Conflict { .. }) => {
                    debug!(ticket_id = %id, attempt, "concurrent ticket update; retrying");
                }
                Err(RegistryError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        warn!(ticket_id = %id, "ticket update kept conflicting; giving up");
        Err(RegistryError::Conflict {
            id: id.to_string(),
            expected: 0,
        }
        .into())
    }
}
