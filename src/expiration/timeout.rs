//! Time- and use-bounded policy parameters.
use serde::{Deserialize, Serialize};

use crate::expiration::PolicyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub time_to_kill_in_seconds: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardTimeoutPolicy {
    pub time_to_kill_in_seconds: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMultiTimeUse")]
pub struct MultiTimeUsePolicy {
    number_of_uses: u32,
    time_to_kill_in_seconds: i64,
}

#[derive(Deserialize)]
struct RawMultiTimeUse {
    number_of_uses: u32,
    time_to_kill_in_seconds: i64,
}

impl TryFrom<RawMultiTimeUse> for MultiTimeUsePolicy {
    type Error = PolicyError;

    fn try_from(raw: RawMultiTimeUse) -> Result<Self, Self::Error> {
        Self::new(raw.number_of_uses, raw.time_to_kill_in_seconds)
    }
}

impl MultiTimeUsePolicy {
    pub fn new(number_of_uses: u32, time_to_kill_in_seconds: i64) -> Result<Self, PolicyError> {
        if number_of_uses == 0 {
            return Err(PolicyError::ZeroUses);
        }
        Ok(Self {
            number_of_uses,
            time_to_kill_in_seconds,
        })
    }

    pub fn number_of_uses(&self) -> u32 {
        self.number_of_uses
    }

    pub fn time_to_kill_in_seconds(&self) -> i64 {
        self.time_to_kill_in_seconds
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottledPolicy {
    pub time_to_kill_in_seconds: i64,
    pub time_in_between_uses_in_seconds: i64,
}

/// Hard upper bound plus a sliding idle window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTicketGrantingTicket")]
pub struct TicketGrantingTicketPolicy {
    max_time_to_live_in_seconds: i64,
    time_to_kill_in_seconds: i64,
}

#[derive(Deserialize)]
struct RawTicketGrantingTicket {
    max_time_to_live_in_seconds: i64,
    time_to_kill_in_seconds: i64,
}

impl TryFrom<RawTicketGrantingTicket> for TicketGrantingTicketPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawTicketGrantingTicket) -> Result<Self, Self::Error> {
        Self::new(raw.max_time_to_live_in_seconds, raw.time_to_kill_in_seconds)
    }
}

impl TicketGrantingTicketPolicy {
    pub fn new(
        max_time_to_live_in_seconds: i64,
        time_to_kill_in_seconds: i64,
    ) -> Result<Self, PolicyError> {
        if max_time_to_live_in_seconds < time_to_kill_in_seconds {
            return Err(PolicyError::HardBelowSliding {
                max_time_to_live: max_time_to_live_in_seconds,
                time_to_kill: time_to_kill_in_seconds,
            });
        }
        Ok(Self {
            max_time_to_live_in_seconds,
            time_to_kill_in_seconds,
        })
    }

    pub fn max_time_to_live_in_seconds(&self) -> i64 {
        self.max_time_to_live_in_seconds
    }

    pub fn time_to_kill_in_seconds(&self) -> i64 {
        self.time_to_kill_in_seconds
    }
}
