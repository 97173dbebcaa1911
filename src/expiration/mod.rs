//! Expiration policy engine.
//!
//! Policies are a closed set of variants evaluated by a single match. They
//! persist next to tickets as a `{ "type": ..., "params": { ... } }` envelope.
//! Durations are whole seconds; "never" is reported as `i64::MAX`.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::tickets::TicketState;

pub mod builder;
pub mod delegating;
pub mod timeout;

pub use builder::ExpirationPolicyBuilder;
pub use delegating::{
    DEFAULT_POLICY_NAME, NamedDelegatingPolicy, NamedPolicy, PolicySelector, RememberMePolicy,
};
pub use timeout::{
    HardTimeoutPolicy, MultiTimeUsePolicy, ThrottledPolicy, TicketGrantingTicketPolicy,
    TimeoutPolicy,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error(
        "hard timeout ({max_time_to_live}s) must not be shorter than sliding timeout ({time_to_kill}s)"
    )]
    HardBelowSliding {
        max_time_to_live: i64,
        time_to_kill: i64,
    },
    #[error("number of uses must be positive")]
    ZeroUses,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "params",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ExpirationPolicy {
    AlwaysExpires {},
    NeverExpires {},
    Timeout(TimeoutPolicy),
    HardTimeout(HardTimeoutPolicy),
    MultiTimeUseOrTimeout(MultiTimeUsePolicy),
    ThrottledUseAndTimeout(ThrottledPolicy),
    TicketGrantingTicket(TicketGrantingTicketPolicy),
    RememberMeDelegating(RememberMePolicy),
    NamedDelegating(NamedDelegatingPolicy),
}

/// `start + secs`, or `None` if the deadline is past the representable range.
fn deadline(start: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| start.checked_add_signed(d))
}

fn is_past(start: DateTime<Utc>, secs: i64, now: DateTime<Utc>) -> bool {
    deadline(start, secs).is_some_and(|d| now > d)
}

impl ExpirationPolicy {
    pub const fn always() -> Self {
        Self::AlwaysExpires {}
    }

    pub const fn never() -> Self {
        Self::NeverExpires {}
    }

    pub const fn timeout(time_to_kill_in_seconds: i64) -> Self {
        Self::Timeout(TimeoutPolicy {
            time_to_kill_in_seconds,
        })
    }

    pub const fn hard_timeout(time_to_kill_in_seconds: i64) -> Self {
        Self::HardTimeout(HardTimeoutPolicy {
            time_to_kill_in_seconds,
        })
    }

    pub fn multi_time_use(
        number_of_uses: u32,
        time_to_kill_in_seconds: i64,
    ) -> Result<Self, PolicyError> {
        MultiTimeUsePolicy::new(number_of_uses, time_to_kill_in_seconds)
            .map(Self::MultiTimeUseOrTimeout)
    }

    pub const fn throttled(
        time_to_kill_in_seconds: i64,
        time_in_between_uses_in_seconds: i64,
    ) -> Self {
        Self::ThrottledUseAndTimeout(ThrottledPolicy {
            time_to_kill_in_seconds,
            time_in_between_uses_in_seconds,
        })
    }

    pub fn ticket_granting_ticket(
        max_time_to_live_in_seconds: i64,
        time_to_kill_in_seconds: i64,
    ) -> Result<Self, PolicyError> {
        TicketGrantingTicketPolicy::new(max_time_to_live_in_seconds, time_to_kill_in_seconds)
            .map(Self::TicketGrantingTicket)
    }

    pub fn remember_me(remember_me: ExpirationPolicy, default: ExpirationPolicy) -> Self {
        Self::RememberMeDelegating(RememberMePolicy::new(remember_me, default))
    }

    pub fn is_expired(&self, state: Option<&TicketState>, now: DateTime<Utc>) -> bool {
        match self {
            Self::AlwaysExpires {} => true,
            Self::NeverExpires {} => false,
            Self::Timeout(p) => {
                state.is_none_or(|s| is_past(s.last_time_used, p.time_to_kill_in_seconds, now))
            }
            Self::HardTimeout(p) => {
                state.is_none_or(|s| is_past(s.creation_time, p.time_to_kill_in_seconds, now))
            }
            Self::MultiTimeUseOrTimeout(p) => state.is_none_or(|s| {
                s.count_of_uses >= p.number_of_uses()
                    || is_past(s.last_time_used, p.time_to_kill_in_seconds(), now)
            }),
            Self::ThrottledUseAndTimeout(p) => state.is_none_or(|s| {
                let within_ttl = deadline(s.creation_time, p.time_to_kill_in_seconds)
                    .is_none_or(|d| now < d);
                if s.count_of_uses == 0 && within_ttl {
                    return false;
                }
                let too_soon = deadline(s.last_time_used, p.time_in_between_uses_in_seconds)
                    .is_some_and(|d| now < d);
                is_past(s.creation_time, p.time_to_kill_in_seconds, now) || too_soon
            }),
            Self::TicketGrantingTicket(p) => state.is_none_or(|s| {
                is_past(s.creation_time, p.max_time_to_live_in_seconds(), now)
                    || is_past(s.last_time_used, p.time_to_kill_in_seconds(), now)
            }),
            Self::RememberMeDelegating(p) => match p.select(state) {
                Some(policy) => policy.is_expired(state, now),
                None => {
                    warn!("remember-me policy has no sub-policies; ticket never expires");
                    false
                }
            },
            Self::NamedDelegating(p) => match p.select(state) {
                Some(policy) => policy.is_expired(state, now),
                None => {
                    warn!(
                        policy = %p.policy_name_for(state),
                        "no delegated expiration policy matched; treating ticket as not expired"
                    );
                    false
                }
            },
        }
    }

    /// Seconds the ticket may live in total.
    pub fn time_to_live(&self, state: Option<&TicketState>) -> i64 {
        match self {
            Self::AlwaysExpires {} => 0,
            Self::NeverExpires {} => i64::MAX,
            Self::Timeout(p) => p.time_to_kill_in_seconds,
            Self::HardTimeout(p) => p.time_to_kill_in_seconds,
            Self::MultiTimeUseOrTimeout(p) => p.time_to_kill_in_seconds(),
            Self::ThrottledUseAndTimeout(p) => p.time_to_kill_in_seconds,
            Self::TicketGrantingTicket(p) => p.max_time_to_live_in_seconds(),
            Self::RememberMeDelegating(p) => p
                .select(state)
                .map_or(i64::MAX, |policy| policy.time_to_live(state)),
            Self::NamedDelegating(p) => p
                .select(state)
                .map_or(i64::MAX, |policy| policy.time_to_live(state)),
        }
    }

    /// Seconds the ticket may sit unused; `0` means no idle bound of its own.
    pub fn time_to_idle(&self, state: Option<&TicketState>) -> i64 {
        match self {
            Self::AlwaysExpires {} => 0,
            Self::NeverExpires {} => i64::MAX,
            Self::Timeout(p) => p.time_to_kill_in_seconds,
            Self::HardTimeout(_) | Self::ThrottledUseAndTimeout(_) => 0,
            Self::MultiTimeUseOrTimeout(p) => p.time_to_kill_in_seconds(),
            Self::TicketGrantingTicket(p) => p.time_to_kill_in_seconds(),
            Self::RememberMeDelegating(p) => p
                .select(state)
                .map_or(i64::MAX, |policy| policy.time_to_idle(state)),
            Self::NamedDelegating(p) => p
                .select(state)
                .map_or(i64::MAX, |policy| policy.time_to_idle(state)),
        }
    }

    /// Instant after which the ticket is expired whatever happens next, if
    /// bounded. Idle bounds count from the last use, so stores must refresh
    /// this on every update.
    pub fn hard_deadline(&self, state: &TicketState) -> Option<DateTime<Utc>> {
        match self {
            Self::AlwaysExpires {} => Some(state.creation_time),
            Self::NeverExpires {} => None,
            Self::Timeout(p) => deadline(state.last_time_used, p.time_to_kill_in_seconds),
            Self::HardTimeout(p) => deadline(state.creation_time, p.time_to_kill_in_seconds),
            Self::MultiTimeUseOrTimeout(p) => {
                deadline(state.last_time_used, p.time_to_kill_in_seconds())
            }
            // Throttling only expires a ticket for a while; the hard TTL is final.
            Self::ThrottledUseAndTimeout(p) => {
                deadline(state.creation_time, p.time_to_kill_in_seconds)
            }
            Self::TicketGrantingTicket(p) => {
                let hard = deadline(state.creation_time, p.max_time_to_live_in_seconds());
                let sliding = deadline(state.last_time_used, p.time_to_kill_in_seconds());
                match (hard, sliding) {
                    (Some(h), Some(s)) => Some(h.min(s)),
                    (h, s) => h.or(s),
                }
            }
            Self::RememberMeDelegating(p) => {
                p.select(Some(state)).and_then(|policy| policy.hard_deadline(state))
            }
            Self::NamedDelegating(p) => {
                p.select(Some(state)).and_then(|policy| policy.hard_deadline(state))
            }
        }
    }
}
