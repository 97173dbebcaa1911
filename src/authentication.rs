//! Authentication record: the principal plus metadata about how and when
//! it was established.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::principal::{
    AttributeMap, AttributeMerger, ChainingPrincipalElectionStrategy, ConflictResolver,
    DefaultPrincipalElectionStrategy, DefaultPrincipalFactory, EchoingPrincipalResolver,
    ElectionError, Principal, PrincipalElectionStrategy, PrincipalFactory, PrincipalResolver,
};

/// Authentication attribute flagging a long-term ("remember me") session.
pub const REMEMBER_ME: &str = "remember_me";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    pub authentication_date: DateTime<Utc>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Authentication {
    pub fn new(principal: Principal, authentication_date: DateTime<Utc>) -> Self {
        Self {
            principal,
            authentication_date,
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert_single(name, value);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    pub fn is_remember_me(&self) -> bool {
        self.attributes.first_bool(REMEMBER_ME).unwrap_or(false)
    }
}

/// Folds the authentications gathered during one login into the single
/// authentication a session or token is issued for.
///
/// Each handler principal goes through the resolvers that support its id;
/// a principal no resolver supports stands as its own candidate. The
/// election strategy then picks the final id, carrying the merged
/// attributes of every candidate.
#[derive(Clone, Debug)]
pub struct AuthenticationBuilder {
    resolvers: Vec<Arc<dyn PrincipalResolver>>,
    election: Arc<dyn PrincipalElectionStrategy>,
    merger: AttributeMerger,
}

impl Default for AuthenticationBuilder {
    fn default() -> Self {
        let factory: Arc<dyn PrincipalFactory> = Arc::new(DefaultPrincipalFactory);
        let last_wins = DefaultPrincipalElectionStrategy::new(ConflictResolver::Last, Arc::clone(&factory));
        Self::new(
            vec![Arc::new(EchoingPrincipalResolver::new(factory))],
            Arc::new(ChainingPrincipalElectionStrategy::new(vec![Arc::new(last_wins)])),
            AttributeMerger::default(),
        )
    }
}

impl AuthenticationBuilder {
    pub fn new(
        resolvers: Vec<Arc<dyn PrincipalResolver>>,
        election: Arc<dyn PrincipalElectionStrategy>,
        merger: AttributeMerger,
    ) -> Self {
        Self {
            resolvers,
            election,
            merger,
        }
    }

    pub fn build(&self, chained: &[Authentication]) -> Result<Authentication, ElectionError> {
        let mut candidates = Vec::new();
        let mut principal_attributes = AttributeMap::new();
        for authentication in chained.iter().filter(|a| !a.principal.is_null()) {
            let principal = &authentication.principal;
            let supporting: Vec<_> = self
                .resolvers
                .iter()
                .filter(|r| r.supports(principal.id()))
                .collect();
            if supporting.is_empty() {
                self.merger.merge(&mut principal_attributes, principal.attributes());
                candidates.push(principal.clone());
                continue;
            }
            for resolver in supporting {
                if let Some(resolved) = resolver.resolve(principal.id(), principal.attributes())? {
                    self.merger.merge(&mut principal_attributes, resolved.attributes());
                    candidates.push(resolved);
                }
            }
        }

        let unresolved = || ElectionError::Unresolved {
            candidates: candidates.len(),
        };
        let elected = self
            .election
            .nominate_principals(&candidates, &principal_attributes)?
            .ok_or_else(unresolved)?;
        let authentication_date = chained
            .iter()
            .map(|a| a.authentication_date)
            .max()
            .ok_or_else(unresolved)?;

        let mut attributes = AttributeMap::new();
        for authentication in chained {
            self.merger.merge(&mut attributes, &authentication.attributes);
        }
        debug!(
            principal = %elected.id(),
            chained = chained.len(),
            "built authentication"
        );
        Ok(Authentication {
            principal: elected,
            authentication_date,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{NULL_PRINCIPAL, PrincipalError};
    use chrono::Duration;

    fn principal(id: &str, name: &str, value: &str) -> Principal {
        let mut attrs = AttributeMap::new();
        attrs.insert_single(name, value);
        Principal::new(id, attrs).unwrap()
    }

    /// Resolves only ids it recognises, adding a directory attribute.
    #[derive(Debug)]
    struct Directory;

    impl PrincipalResolver for Directory {
        fn supports(&self, credential_id: &str) -> bool {
            credential_id != "anonymous"
        }

        fn resolve(
            &self,
            credential_id: &str,
            attributes: &AttributeMap,
        ) -> Result<Option<Principal>, PrincipalError> {
            if credential_id == "ghost" {
                return Ok(None);
            }
            let mut attrs = attributes.clone();
            attrs.insert_single("department", "IT");
            Principal::new(credential_id, attrs).map(Some)
        }
    }

    fn directory_builder() -> AuthenticationBuilder {
        let factory: Arc<dyn PrincipalFactory> = Arc::new(DefaultPrincipalFactory);
        AuthenticationBuilder::new(
            vec![Arc::new(Directory)],
            Arc::new(DefaultPrincipalElectionStrategy::new(ConflictResolver::Last, factory)),
            AttributeMerger::MultiValued,
        )
    }

    #[test]
    fn single_authentication_passes_through() {
        let now = Utc::now();
        let authn = Authentication::new(principal("casuser", "email", "casuser@example.org"), now)
            .with_attribute(REMEMBER_ME, true);
        let built = AuthenticationBuilder::default().build(&[authn.clone()]).unwrap();
        assert_eq!(built, authn);
    }

    #[test]
    fn chain_elects_last_principal_with_merged_attributes() {
        let t0 = Utc::now();
        let first = Authentication::new(principal("casuser", "mail", "a@example.org"), t0)
            .with_attribute("method", "password");
        let second = Authentication::new(
            principal("casuser@example.org", "mail", "b@example.org"),
            t0 + Duration::seconds(5),
        )
        .with_attribute("method", "otp");

        let built = directory_builder().build(&[first, second]).unwrap();
        assert_eq!(built.principal.id(), "casuser@example.org");
        assert_eq!(
            built.principal.attributes().strings("mail"),
            vec!["a@example.org", "b@example.org"]
        );
        assert_eq!(built.principal.attributes().strings("department"), vec!["IT"]);
        assert_eq!(built.attributes.strings("method"), vec!["password", "otp"]);
        assert_eq!(built.authentication_date, t0 + Duration::seconds(5));
    }

    #[test]
    fn unsupported_principal_stands_as_its_own_candidate() {
        let authn = Authentication::new(principal("anonymous", "mail", "x@example.org"), Utc::now());
        let built = directory_builder().build(&[authn]).unwrap();
        assert_eq!(built.principal.id(), "anonymous");
        assert!(!built.principal.attributes().contains("department"));
    }

    #[test]
    fn nothing_resolved_is_an_election_failure() {
        let now = Utc::now();
        let ghost = Authentication::new(principal("ghost", "mail", "g@example.org"), now);
        let null = Authentication::new(NULL_PRINCIPAL, now);

        assert_eq!(
            directory_builder().build(&[ghost, null.clone()]).unwrap_err(),
            ElectionError::Unresolved { candidates: 0 }
        );
        assert!(AuthenticationBuilder::default().build(&[null]).is_err());
        assert!(AuthenticationBuilder::default().build(&[]).is_err());
    }
}
