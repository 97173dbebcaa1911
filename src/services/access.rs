//! Service access strategy and its enforcement.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::principal::Principal;
use crate::services::registered::OAuthRegisteredService;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("access to service {service} denied: {reason}")]
pub struct AccessDenied {
    pub service: String,
    pub reason: String,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStrategy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attribute name to accepted values; the principal needs one match per entry.
    #[serde(default)]
    pub required_attributes: BTreeMap<String, BTreeSet<String>>,
    /// Attribute name to values that block access.
    #[serde(default)]
    pub rejected_attributes: BTreeMap<String, BTreeSet<String>>,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self {
            enabled: true,
            required_attributes: BTreeMap::new(),
            rejected_attributes: BTreeMap::new(),
        }
    }
}

pub trait AccessStrategyEnforcer: Send + Sync + fmt::Debug {
    /// `principal` is `None` when only the service itself is being checked
    /// (before any user is known).
    fn ensure_service_access_is_allowed(
        &self,
        service: &OAuthRegisteredService,
        principal: Option<&Principal>,
    ) -> Result<(), AccessDenied>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAccessStrategyEnforcer;

impl AccessStrategyEnforcer for DefaultAccessStrategyEnforcer {
    fn ensure_service_access_is_allowed(
        &self,
        service: &OAuthRegisteredService,
        principal: Option<&Principal>,
    ) -> Result<(), AccessDenied> {
        let strategy = &service.access_strategy;
        let deny = |reason: String| {
            debug!(service = %service.name, reason = %reason, "service access denied");
            AccessDenied {
                service: service.name.clone(),
                reason,
            }
        };

        if !strategy.enabled {
            return Err(deny("service is disabled".to_string()));
        }
        let Some(principal) = principal else {
            return Ok(());
        };

        let attrs = principal.attributes();
        for (name, rejected) in &strategy.rejected_attributes {
            if attrs.strings(name).iter().any(|v| rejected.contains(v)) {
                return Err(deny(format!("attribute {name} carries a rejected value")));
            }
        }
        for (name, accepted) in &strategy.required_attributes {
            let values = attrs.strings(name);
            let ok = if accepted.is_empty() {
                !values.is_empty()
            } else {
                values.iter().any(|v| accepted.contains(v))
            };
            if !ok {
                return Err(deny(format!("required attribute {name} not satisfied")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::AttributeMap;

    fn service(strategy: AccessStrategy) -> OAuthRegisteredService {
        let mut s = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        s.access_strategy = strategy;
        s
    }

    fn principal(groups: &[&str]) -> Principal {
        let mut attrs = AttributeMap::new();
        attrs.insert(
            "memberOf",
            groups.iter().map(|g| serde_json::json!(g)).collect(),
        );
        Principal::new("casuser", attrs).unwrap()
    }

    #[test]
    fn disabled_service_is_denied_even_without_principal() {
        let svc = service(AccessStrategy {
            enabled: false,
            ..Default::default()
        });
        assert!(
            DefaultAccessStrategyEnforcer
                .ensure_service_access_is_allowed(&svc, None)
                .is_err()
        );
    }

    #[test]
    fn required_and_rejected_attributes() {
        let svc = service(AccessStrategy {
            enabled: true,
            required_attributes: [("memberOf".to_string(), ["staff".to_string()].into())].into(),
            rejected_attributes: [("memberOf".to_string(), ["banned".to_string()].into())].into(),
        });
        let e = DefaultAccessStrategyEnforcer;
        assert!(
            e.ensure_service_access_is_allowed(&svc, Some(&principal(&["staff"])))
                .is_ok()
        );
        assert!(
            e.ensure_service_access_is_allowed(&svc, Some(&principal(&["guest"])))
                .is_err()
        );
        assert!(
            e.ensure_service_access_is_allowed(&svc, Some(&principal(&["staff", "banned"])))
                .is_err()
        );
    }
}
