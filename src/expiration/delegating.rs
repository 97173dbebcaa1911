//! Policies that pick another policy per ticket.
use serde::{Deserialize, Serialize};

use crate::expiration::ExpirationPolicy;
use crate::tickets::{TicketKind, TicketState};

/// Name looked up when the selector yields nothing.
pub const DEFAULT_POLICY_NAME: &str = "DEFAULT";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberMePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<Box<ExpirationPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Box<ExpirationPolicy>>,
}

impl RememberMePolicy {
    pub fn new(remember_me: ExpirationPolicy, default: ExpirationPolicy) -> Self {
        Self {
            remember_me: Some(Box::new(remember_me)),
            default: Some(Box::new(default)),
        }
    }

    /// `None` when neither sub-policy is configured.
    pub(crate) fn select(&self, state: Option<&TicketState>) -> Option<&ExpirationPolicy> {
        let remembered = state
            .and_then(|s| s.authentication.as_ref())
            .is_some_and(|a| a.is_remember_me());
        let chosen = if remembered {
            self.remember_me.as_deref()
        } else {
            self.default.as_deref()
        };
        chosen
            .or(self.default.as_deref())
            .or(self.remember_me.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPolicy {
    pub name: String,
    pub policy: ExpirationPolicy,
}

/// How a delegating policy derives the policy name from a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PolicySelector {
    /// First value of an authentication attribute.
    AuthenticationAttribute { attribute: String },
    /// The ticket kind prefix (`TGT`, `ST`, `AT`, ...).
    TicketKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDelegatingPolicy {
    pub policies: Vec<NamedPolicy>,
    pub selector: PolicySelector,
}

impl NamedDelegatingPolicy {
    pub fn new(selector: PolicySelector) -> Self {
        Self {
            policies: Vec::new(),
            selector,
        }
    }

    pub fn with_policy(mut self, name: impl Into<String>, policy: ExpirationPolicy) -> Self {
        self.policies.push(NamedPolicy {
            name: name.into(),
            policy,
        });
        self
    }

    pub fn policy_name_for(&self, state: Option<&TicketState>) -> String {
        let name = state.and_then(|s| match &self.selector {
            PolicySelector::AuthenticationAttribute { attribute } => s
                .authentication
                .as_ref()
                .and_then(|a| a.attributes.first(attribute))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            PolicySelector::TicketKind => {
                TicketKind::from_id(&s.id).map(|k| k.prefix().to_string())
            }
        });
        name.unwrap_or_else(|| DEFAULT_POLICY_NAME.to_string())
    }

    pub(crate) fn select(&self, state: Option<&TicketState>) -> Option<&ExpirationPolicy> {
        let name = self.policy_name_for(state);
        self.policies
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.policy)
    }
}
