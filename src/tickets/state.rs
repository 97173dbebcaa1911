use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authentication::Authentication;
use crate::expiration::ExpirationPolicy;

/// Fields every ticket shares: identity, usage counters, its own policy and a
/// weak link (by id) to the ticket that granted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketState {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub last_time_used: DateTime<Utc>,
    #[serde(default)]
    pub previous_time_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count_of_uses: u32,
    /// Set on explicit destruction (logout, revocation).
    #[serde(default)]
    pub expired: bool,
    /// Bumped by the registry on every successful write.
    #[serde(default)]
    pub version: u64,
    pub expiration_policy: ExpirationPolicy,
    #[serde(default)]
    pub authentication: Option<Authentication>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl TicketState {
    pub fn new(
        id: String,
        expiration_policy: ExpirationPolicy,
        authentication: Option<Authentication>,
        parent_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expired: false,
            version: 0,
            expiration_policy,
            authentication,
            parent_id,
        }
    }

    /// Record one use.
    pub fn update(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(Some(self), now)
    }

    pub fn time_to_live(&self) -> i64 {
        self.expiration_policy.time_to_live(Some(self))
    }

    pub fn hard_deadline(&self) -> Option<DateTime<Utc>> {
        self.expiration_policy.hard_deadline(self)
    }
}
