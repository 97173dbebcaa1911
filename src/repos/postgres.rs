use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::clock::SharedClock;
use crate::repos::{RegistryError, RegistryResult, TicketRegistry};
use crate::tickets::Ticket;

const SCHEMA: &str = include_str!("../../sql/tickets.sql");

/// Postgres-backed registry.
///
/// Notes:
/// - The ticket is stored as its JSON body next to a `version` column used for
///   conditional updates.
/// - `expires_at` is the hard deadline (if any) so sweeps can run in SQL; idle
///   timeouts are still decided by the policy when a ticket is read.
#[derive(Clone, Debug)]
pub struct PostgresTicketRegistry {
    pool: PgPool,
    clock: SharedClock,
}

impl PostgresTicketRegistry {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    pub async fn connect(database_url: &str, clock: SharedClock) -> RegistryResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool, clock))
    }

    /// Create the tickets table if it is missing.
    pub async fn ensure_schema(&self) -> RegistryResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> RegistryResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT version FROM tickets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl TicketRegistry for PostgresTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn add_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        ticket.state_mut().version = 1;
        let body = serde_json::to_string(&ticket)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tickets (id, kind, parent_id, body, version, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(ticket.id())
        .bind(ticket.kind().prefix())
        .bind(ticket.state().parent_id.as_deref())
        .bind(body)
        .bind(1i64)
        .bind(ticket.state().hard_deadline())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::Duplicate(ticket.id().to_string()));
        }
        Ok(ticket)
    }

    async fn load_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        let body = sqlx::query_scalar::<_, String>(
            r#"
            SELECT body FROM tickets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match body {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn update_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        let expected = ticket.state().version;
        ticket.state_mut().version = expected + 1;
        let body = serde_json::to_string(&ticket)?;

        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET body = $1, version = $2, expires_at = $3, updated_at = now()
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(body)
        .bind((expected + 1) as i64)
        .bind(ticket.state().hard_deadline())
        .bind(ticket.id())
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ticket);
        }
        if self.exists(ticket.id()).await? {
            Err(RegistryError::Conflict {
                id: ticket.id().to_string(),
                expected,
            })
        } else {
            Err(RegistryError::NotFound(ticket.id().to_string()))
        }
    }

    async fn delete_single_ticket(&self, id: &str) -> RegistryResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM tickets WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reap_expired(&self) -> RegistryResult<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM tickets
            WHERE expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        let reaped = result.rows_affected() as usize;
        debug!(reaped, "reaped expired tickets");
        Ok(reaped)
    }
}
