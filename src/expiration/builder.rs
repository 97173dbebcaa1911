//! Turns [`TicketProperties`] / [`OAuthProperties`] into concrete policies.
use tracing::{debug, warn};

use crate::config::{OAuthProperties, TicketProperties};
use crate::expiration::{ExpirationPolicy, PolicyError};

#[derive(Clone, Debug, Default)]
pub struct ExpirationPolicyBuilder {
    tickets: TicketProperties,
    oauth: OAuthProperties,
}

impl ExpirationPolicyBuilder {
    pub fn new(tickets: TicketProperties, oauth: OAuthProperties) -> Self {
        Self { tickets, oauth }
    }

    /// Granting-ticket policy, in precedence order: never, timeout,
    /// hard+sliding, throttled, hard timeout, always. A remember-me setting
    /// wraps whatever was selected.
    pub fn ticket_granting_ticket(&self) -> Result<ExpirationPolicy, PolicyError> {
        let base = self.base_ticket_granting_ticket()?;
        let t = &self.tickets;
        if t.remember_me_enabled {
            debug!(
                ttk = t.remember_me_time_to_kill_in_seconds,
                "wrapping granting-ticket policy with remember-me"
            );
            return Ok(ExpirationPolicy::remember_me(
                ExpirationPolicy::hard_timeout(t.remember_me_time_to_kill_in_seconds),
                base,
            ));
        }
        Ok(base)
    }

    fn base_ticket_granting_ticket(&self) -> Result<ExpirationPolicy, PolicyError> {
        let t = &self.tickets;
        if t.tgt_max_time_to_live_in_seconds <= 0 && t.tgt_time_to_kill_in_seconds <= 0 {
            warn!("granting tickets are configured to never expire");
            return Ok(ExpirationPolicy::never());
        }
        if t.timeout_max_time_to_live_in_seconds > 0 {
            return Ok(ExpirationPolicy::timeout(
                t.timeout_max_time_to_live_in_seconds,
            ));
        }
        if t.tgt_max_time_to_live_in_seconds > 0 && t.tgt_time_to_kill_in_seconds > 0 {
            return ExpirationPolicy::ticket_granting_ticket(
                t.tgt_max_time_to_live_in_seconds,
                t.tgt_time_to_kill_in_seconds,
            );
        }
        if t.throttled_time_in_between_uses_in_seconds > 0
            && t.throttled_time_to_kill_in_seconds > 0
        {
            return Ok(ExpirationPolicy::throttled(
                t.throttled_time_to_kill_in_seconds,
                t.throttled_time_in_between_uses_in_seconds,
            ));
        }
        if t.hard_timeout_time_to_kill_in_seconds > 0 {
            return Ok(ExpirationPolicy::hard_timeout(
                t.hard_timeout_time_to_kill_in_seconds,
            ));
        }
        warn!("no granting-ticket expiration settings apply; tickets always expire");
        Ok(ExpirationPolicy::always())
    }

    pub fn service_ticket(&self) -> Result<ExpirationPolicy, PolicyError> {
        ExpirationPolicy::multi_time_use(
            self.tickets.st_number_of_uses,
            self.tickets.st_time_to_kill_in_seconds,
        )
    }

    pub fn proxy_ticket(&self) -> Result<ExpirationPolicy, PolicyError> {
        ExpirationPolicy::multi_time_use(
            self.tickets.pt_number_of_uses,
            self.tickets.pt_time_to_kill_in_seconds,
        )
    }

    pub fn oauth_code(&self) -> Result<ExpirationPolicy, PolicyError> {
        ExpirationPolicy::multi_time_use(
            self.oauth.code_number_of_uses,
            self.oauth.code_time_to_kill_in_seconds,
        )
    }

    pub fn access_token(&self) -> Result<ExpirationPolicy, PolicyError> {
        access_token_policy(
            self.oauth.access_token_max_time_to_live_in_seconds,
            self.oauth.access_token_time_to_kill_in_seconds,
        )
    }

    pub fn refresh_token(&self) -> ExpirationPolicy {
        ExpirationPolicy::hard_timeout(self.oauth.refresh_token_time_to_kill_in_seconds)
    }

    pub fn device_token(&self) -> ExpirationPolicy {
        ExpirationPolicy::hard_timeout(self.oauth.device_token_time_to_kill_in_seconds)
    }
}

/// Zero on both ends means "issue nothing"; callers check the TTL first.
pub fn access_token_policy(
    max_time_to_live_in_seconds: i64,
    time_to_kill_in_seconds: i64,
) -> Result<ExpirationPolicy, PolicyError> {
    match (max_time_to_live_in_seconds > 0, time_to_kill_in_seconds > 0) {
        (false, false) => Ok(ExpirationPolicy::hard_timeout(0)),
        (true, false) => Ok(ExpirationPolicy::hard_timeout(max_time_to_live_in_seconds)),
        (false, true) => Ok(ExpirationPolicy::timeout(time_to_kill_in_seconds)),
        (true, true) => ExpirationPolicy::ticket_granting_ticket(
            max_time_to_live_in_seconds,
            time_to_kill_in_seconds.min(max_time_to_live_in_seconds),
        ),
    }
}
