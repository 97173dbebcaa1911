//! Scope-based attribute release.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::principal::{AttributeMap, Principal};
use crate::services::registered::OAuthRegisteredService;

pub trait ScopeToAttributesFilter: Send + Sync + fmt::Debug {
    /// Narrow `principal` to what `scopes` release for `service`.
    fn filter(
        &self,
        principal: &Principal,
        service: &OAuthRegisteredService,
        scopes: &BTreeSet<String>,
    ) -> Principal;

    /// Attributes a signed token may carry as claims. Unlike [`filter`],
    /// nothing is released unless a granted scope maps to it.
    ///
    /// [`filter`]: ScopeToAttributesFilter::filter
    fn filter_claims(
        &self,
        principal: &Principal,
        service: &OAuthRegisteredService,
        scopes: &BTreeSet<String>,
    ) -> Principal;
}

/// Standard OpenID Connect scope to claim mapping.
#[derive(Debug, Clone)]
pub struct DefaultScopeToAttributesFilter {
    scope_claims: BTreeMap<String, Vec<String>>,
}

impl Default for DefaultScopeToAttributesFilter {
    fn default() -> Self {
        let table: [(&str, &[&str]); 4] = [
            (
                "profile",
                &[
                    "name",
                    "family_name",
                    "given_name",
                    "middle_name",
                    "nickname",
                    "preferred_username",
                    "profile",
                    "picture",
                    "website",
                    "gender",
                    "birthdate",
                    "zoneinfo",
                    "locale",
                    "updated_at",
                ],
            ),
            ("email", &["email", "email_verified"]),
            ("address", &["address"]),
            ("phone", &["phone_number", "phone_number_verified"]),
        ];
        Self {
            scope_claims: table
                .iter()
                .map(|(scope, claims)| {
                    (
                        scope.to_string(),
                        claims.iter().map(|c| c.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl DefaultScopeToAttributesFilter {
    pub fn with_scope(mut self, scope: impl Into<String>, claims: Vec<String>) -> Self {
        self.scope_claims.insert(scope.into(), claims);
        self
    }
}

impl DefaultScopeToAttributesFilter {
    /// Claim names released by the scopes the service grants, or `None` when
    /// none of them has a claim mapping.
    fn released(
        &self,
        service: &OAuthRegisteredService,
        scopes: &BTreeSet<String>,
    ) -> Option<BTreeSet<&str>> {
        let effective = service.allowed_scopes(scopes);
        if !effective.iter().any(|s| self.scope_claims.contains_key(s)) {
            return None;
        }
        Some(
            effective
                .iter()
                .filter_map(|s| self.scope_claims.get(s))
                .flatten()
                .map(String::as_str)
                .collect(),
        )
    }

    fn retain(principal: &Principal, released: &BTreeSet<&str>) -> Principal {
        let mut attrs: AttributeMap = principal.attributes().clone();
        attrs.retain(|name| released.iter().any(|c| c.eq_ignore_ascii_case(name)));
        debug!(
            principal = %principal.id(),
            released = attrs.len(),
            "filtered principal attributes by scope"
        );
        principal.with_attributes(attrs)
    }
}

impl ScopeToAttributesFilter for DefaultScopeToAttributesFilter {
    fn filter(
        &self,
        principal: &Principal,
        service: &OAuthRegisteredService,
        scopes: &BTreeSet<String>,
    ) -> Principal {
        // Plain OAuth scopes carry no claim mapping; release the principal as is.
        match self.released(service, scopes) {
            Some(released) => Self::retain(principal, &released),
            None => principal.clone(),
        }
    }

    fn filter_claims(
        &self,
        principal: &Principal,
        service: &OAuthRegisteredService,
        scopes: &BTreeSet<String>,
    ) -> Principal {
        let released = self.released(service, scopes).unwrap_or_default();
        Self::retain(principal, &released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        let mut attrs = AttributeMap::new();
        attrs.insert_single("email", "casuser@example.org");
        attrs.insert_single("given_name", "Cas");
        attrs.insert_single("memberOf", "staff");
        Principal::new("casuser", attrs).unwrap()
    }

    #[test]
    fn email_scope_releases_only_email_claims() {
        let svc = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        let scopes: BTreeSet<String> = ["openid".to_string(), "email".to_string()].into();
        let p = DefaultScopeToAttributesFilter::default().filter(&principal(), &svc, &scopes);
        assert_eq!(p.id(), "casuser");
        assert!(p.attributes().contains("email"));
        assert!(!p.attributes().contains("given_name"));
        assert!(!p.attributes().contains("memberOf"));
    }

    #[test]
    fn scopes_outside_service_are_ignored() {
        let mut svc = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        svc.scopes = ["profile".to_string()].into();
        let scopes: BTreeSet<String> = ["email".to_string(), "profile".to_string()].into();
        let p = DefaultScopeToAttributesFilter::default().filter(&principal(), &svc, &scopes);
        assert!(p.attributes().contains("given_name"));
        assert!(!p.attributes().contains("email"));
    }

    #[test]
    fn unknown_scopes_leave_principal_untouched() {
        let svc = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        let scopes: BTreeSet<String> = ["api.read".to_string()].into();
        let p = DefaultScopeToAttributesFilter::default().filter(&principal(), &svc, &scopes);
        assert_eq!(p, principal());
    }

    #[test]
    fn claims_need_a_mapped_scope() {
        let svc = OAuthRegisteredService::new(1, "app", ".*", "client", None);
        let filter = DefaultScopeToAttributesFilter::default();

        let openid_only: BTreeSet<String> = ["openid".to_string()].into();
        let p = filter.filter_claims(&principal(), &svc, &openid_only);
        assert_eq!(p.id(), "casuser");
        assert!(p.attributes().is_empty());

        let with_email: BTreeSet<String> = ["openid".to_string(), "email".to_string()].into();
        let p = filter.filter_claims(&principal(), &svc, &with_email);
        assert!(p.attributes().contains("email"));
        assert!(!p.attributes().contains("memberOf"));
    }
}
