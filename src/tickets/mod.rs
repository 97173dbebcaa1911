//! Ticket model.
//!
//! A [`Ticket`] is one of a closed set of kinds sharing a [`TicketState`].
//! Concrete kinds implement [`TypedTicket`] so callers can ask the registry for
//! a specific kind and get `None` on a mismatch.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cas;
pub mod factory;
pub mod id;
pub mod oauth;
pub mod state;

pub use cas::{ProxyGrantingTicket, ProxyTicket, ServiceTicket, TicketGrantingTicket};
pub use factory::TicketFactory;
pub use oauth::{AccessToken, DeviceToken, DeviceUserCode, OAuthCode, OAuthTokenData, RefreshToken};
pub use state::TicketState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TicketKind {
    TicketGranting,
    Service,
    ProxyGranting,
    Proxy,
    OAuthCode,
    AccessToken,
    RefreshToken,
    DeviceToken,
    DeviceUserCode,
}

impl TicketKind {
    pub const ALL: [TicketKind; 9] = [
        Self::TicketGranting,
        Self::Service,
        Self::ProxyGranting,
        Self::Proxy,
        Self::OAuthCode,
        Self::AccessToken,
        Self::RefreshToken,
        Self::DeviceToken,
        Self::DeviceUserCode,
    ];

    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
            Self::OAuthCode => "OC",
            Self::AccessToken => "AT",
            Self::RefreshToken => "RT",
            Self::DeviceToken => "ODT",
            Self::DeviceUserCode => "ODUC",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    TicketGranting(TicketGrantingTicket),
    Service(ServiceTicket),
    ProxyGranting(ProxyGrantingTicket),
    Proxy(ProxyTicket),
    OAuthCode(OAuthCode),
    AccessToken(AccessToken),
    RefreshToken(RefreshToken),
    DeviceToken(DeviceToken),
    DeviceUserCode(DeviceUserCode),
}

pub trait TypedTicket: Sized + Into<Ticket> + Send {
    const KIND: TicketKind;

    fn from_ticket(ticket: Ticket) -> Option<Self>;

    fn state(&self) -> &TicketState;

    fn state_mut(&mut self) -> &mut TicketState;

    fn id(&self) -> &str {
        &self.state().id
    }
}

macro_rules! typed_ticket {
    ($ty:ty, $variant:ident, $kind:expr, $($field:ident).+) => {
        impl From<$ty> for Ticket {
            fn from(t: $ty) -> Self {
                Ticket::$variant(t)
            }
        }

        impl TypedTicket for $ty {
            const KIND: TicketKind = $kind;

            fn from_ticket(ticket: Ticket) -> Option<Self> {
                match ticket {
                    Ticket::$variant(t) => Some(t),
                    _ => None,
                }
            }

            fn state(&self) -> &TicketState {
                &self.$($field).+
            }

            fn state_mut(&mut self) -> &mut TicketState {
                &mut self.$($field).+
            }
        }
    };
}

typed_ticket!(TicketGrantingTicket, TicketGranting, TicketKind::TicketGranting, state);
typed_ticket!(ServiceTicket, Service, TicketKind::Service, state);
typed_ticket!(ProxyGrantingTicket, ProxyGranting, TicketKind::ProxyGranting, granting.state);
typed_ticket!(ProxyTicket, Proxy, TicketKind::Proxy, state);
typed_ticket!(OAuthCode, OAuthCode, TicketKind::OAuthCode, state);
typed_ticket!(AccessToken, AccessToken, TicketKind::AccessToken, state);
typed_ticket!(RefreshToken, RefreshToken, TicketKind::RefreshToken, state);
typed_ticket!(DeviceToken, DeviceToken, TicketKind::DeviceToken, state);
typed_ticket!(DeviceUserCode, DeviceUserCode, TicketKind::DeviceUserCode, state);

macro_rules! each_ticket {
    ($ticket:expr, $t:ident => $body:expr) => {
        match $ticket {
            Ticket::TicketGranting($t) => $body,
            Ticket::Service($t) => $body,
            Ticket::ProxyGranting($t) => $body,
            Ticket::Proxy($t) => $body,
            Ticket::OAuthCode($t) => $body,
            Ticket::AccessToken($t) => $body,
            Ticket::RefreshToken($t) => $body,
            Ticket::DeviceToken($t) => $body,
            Ticket::DeviceUserCode($t) => $body,
        }
    };
}

impl Ticket {
    pub fn kind(&self) -> TicketKind {
        each_ticket!(self, t => kind_of(t))
    }

    pub fn state(&self) -> &TicketState {
        each_ticket!(self, t => t.state())
    }

    pub fn state_mut(&mut self) -> &mut TicketState {
        each_ticket!(self, t => t.state_mut())
    }

    pub fn id(&self) -> &str {
        &self.state().id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state().is_expired(now)
    }

    pub fn into_typed<T: TypedTicket>(self) -> Option<T> {
        T::from_ticket(self)
    }

    /// Ids of tickets whose lifetime is bound to this one.
    pub fn descendants(&self) -> Vec<String> {
        match self {
            Ticket::TicketGranting(t) => t.descendant_ids(),
            Ticket::ProxyGranting(t) => t.granting.descendant_ids(),
            Ticket::RefreshToken(t) => t.access_tokens.iter().cloned().collect(),
            Ticket::DeviceToken(t) => vec![t.user_code.clone()],
            _ => Vec::new(),
        }
    }
}

fn kind_of<T: TypedTicket>(_: &T) -> TicketKind {
    T::KIND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::ExpirationPolicy;

    #[test]
    fn kind_is_recovered_from_id_prefix() {
        for kind in TicketKind::ALL {
            let id = format!("{}-abc", kind.prefix());
            assert_eq!(TicketKind::from_id(&id), Some(kind));
        }
        assert_eq!(TicketKind::from_id("XYZ-1"), None);
        assert_eq!(TicketKind::from_id("TGT"), None);
    }

    #[test]
    fn typed_conversion_rejects_other_kinds() {
        let now = Utc::now();
        let tgt = TicketGrantingTicket::new(
            TicketState::new("TGT-1".into(), ExpirationPolicy::never(), None, None, now),
            None,
        );
        let ticket: Ticket = tgt.clone().into();
        assert_eq!(ticket.kind(), TicketKind::TicketGranting);
        assert!(ticket.clone().into_typed::<RefreshToken>().is_none());
        assert_eq!(ticket.into_typed::<TicketGrantingTicket>(), Some(tgt));
    }

    #[test]
    fn tickets_round_trip_through_json() {
        let now = Utc::now();
        let tgt = TicketGrantingTicket::new(
            TicketState::new(
                "TGT-1".into(),
                ExpirationPolicy::ticket_granting_ticket(100, 10).unwrap(),
                None,
                None,
                now,
            ),
            None,
        );
        let ticket: Ticket = tgt.into();
        let raw = serde_json::to_string(&ticket).unwrap();
        assert!(raw.contains(r#""kind":"ticket_granting""#));
        let back: Ticket = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, ticket);
    }
}
