use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::clock::SharedClock;
use crate::repos::{RegistryError, RegistryResult, TicketRegistry};
use crate::tickets::Ticket;

const KEY_PREFIX: &str = "sso:ticket:";

// KEYS[1] = ticket key
// ARGV = version, body, ttl seconds (0 = no expiry)
const ADD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'body', ARGV[2])
if tonumber(ARGV[3]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[3])
end
return 1
"#;

// KEYS[1] = ticket key
// ARGV = expected version, new version, body, ttl seconds (0 = no expiry)
// Returns -1 when missing, 0 on version mismatch, 1 when written.
const UPDATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'body', ARGV[3])
if tonumber(ARGV[4]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[4])
else
    redis.call('PERSIST', KEYS[1])
end
return 1
"#;

/// Valkey/Redis-backed registry: one hash per ticket (`version`, `body`), with
/// compare-and-set done server side and key expiry taken from the ticket's
/// hard deadline.
#[derive(Clone, Debug)]
pub struct ValkeyTicketRegistry {
    manager: redis::aio::ConnectionManager,
    clock: SharedClock,
}

impl ValkeyTicketRegistry {
    // Create a registry from a URL like `redis://localhost:6379`
    pub async fn new(url: &str, clock: SharedClock) -> RegistryResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            error!(error = %e, "failed to connect to valkey");
            RegistryError::Valkey(e)
        })?;
        Ok(Self { manager, clock })
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    /// Seconds until the key may be dropped; 0 for unbounded tickets.
    fn ttl_seconds(&self, ticket: &Ticket) -> i64 {
        match ticket.state().hard_deadline() {
            // EXPIRE takes whole seconds; round up so the key outlives the ticket.
            Some(deadline) => ((deadline - self.clock.now()).num_seconds() + 1).max(1),
            None => 0,
        }
    }
}

#[async_trait]
impl TicketRegistry for ValkeyTicketRegistry {
    fn backend_name(&self) -> &'static str {
        "valkey"
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn add_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        let mut conn = self.manager.clone();
        ticket.state_mut().version = 1;
        let body = serde_json::to_string(&ticket)?;

        let added: i64 = redis::cmd("EVAL")
            .arg(ADD_SCRIPT)
            .arg(1)
            .arg(Self::key(ticket.id()))
            .arg(1u64)
            .arg(body)
            .arg(self.ttl_seconds(&ticket))
            .query_async(&mut conn)
            .await?;

        if added == 0 {
            return Err(RegistryError::Duplicate(ticket.id().to_string()));
        }
        Ok(ticket)
    }

    async fn load_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        let mut conn = self.manager.clone();
        let body: Option<String> = redis::cmd("HGET")
            .arg(Self::key(id))
            .arg("body")
            .query_async(&mut conn)
            .await?;
        match body {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn update_ticket(&self, mut ticket: Ticket) -> RegistryResult<Ticket> {
        let mut conn = self.manager.clone();
        let expected = ticket.state().version;
        ticket.state_mut().version = expected + 1;
        let body = serde_json::to_string(&ticket)?;

        let outcome: i64 = redis::cmd("EVAL")
            .arg(UPDATE_SCRIPT)
            .arg(1)
            .arg(Self::key(ticket.id()))
            .arg(expected)
            .arg(expected + 1)
            .arg(body)
            .arg(self.ttl_seconds(&ticket))
            .query_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(ticket),
            0 => Err(RegistryError::Conflict {
                id: ticket.id().to_string(),
                expected,
            }),
            _ => Err(RegistryError::NotFound(ticket.id().to_string())),
        }
    }

    async fn delete_single_ticket(&self, id: &str) -> RegistryResult<bool> {
        let mut conn = self.manager.clone();
        // DEL returns number of keys removed (0 or 1 for a single key).
        let n: u64 = redis::cmd("DEL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await?;
        debug!(ticket_id = %id, removed = n, "deleted ticket key");
        Ok(n > 0)
    }
}
