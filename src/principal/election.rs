//! Principal election: reconcile several candidate identities into one.
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::authentication::Authentication;
use crate::principal::{AttributeMap, Principal, PrincipalError, PrincipalFactory};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    #[error("no principal could be elected from {candidates} candidate(s)")]
    Unresolved { candidates: usize },
    #[error(transparent)]
    Principal(#[from] PrincipalError),
}

/// Picks which candidate's id wins when candidates disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictResolver {
    First,
    #[default]
    Last,
}

impl ConflictResolver {
    pub fn resolve<'a>(&self, candidates: &'a [Principal]) -> Option<&'a Principal> {
        let mut iter = candidates.iter().filter(|p| !p.is_null());
        match self {
            Self::First => iter.next(),
            Self::Last => iter.last(),
        }
    }
}

pub trait PrincipalElectionStrategy: Send + Sync + fmt::Debug {
    /// Position inside a chain; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Nominate from already-resolved principals. `attributes` is the merged
    /// attribute set the final principal must carry.
    fn nominate_principals(
        &self,
        principals: &[Principal],
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, ElectionError>;

    fn nominate(
        &self,
        authentications: &[Authentication],
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, ElectionError> {
        let principals: Vec<Principal> = authentications
            .iter()
            .map(|a| a.principal.clone())
            .collect();
        self.nominate_principals(&principals, attributes)
    }
}

#[derive(Debug, Clone)]
pub struct DefaultPrincipalElectionStrategy {
    resolver: ConflictResolver,
    factory: Arc<dyn PrincipalFactory>,
    order: i32,
}

impl DefaultPrincipalElectionStrategy {
    pub fn new(resolver: ConflictResolver, factory: Arc<dyn PrincipalFactory>) -> Self {
        Self {
            resolver,
            factory,
            order: 0,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl PrincipalElectionStrategy for DefaultPrincipalElectionStrategy {
    fn order(&self) -> i32 {
        self.order
    }

    fn nominate_principals(
        &self,
        principals: &[Principal],
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, ElectionError> {
        let Some(winner) = self.resolver.resolve(principals) else {
            return Ok(None);
        };
        let elected = self
            .factory
            .create_principal(winner.id(), attributes.clone())?;
        debug!(
            principal = %elected.id(),
            candidates = principals.len(),
            "nominated principal"
        );
        Ok(Some(elected))
    }
}

/// Runs strategies in ascending [`PrincipalElectionStrategy::order`]; the
/// first nomination wins. Ties keep registration order.
#[derive(Debug, Clone, Default)]
pub struct ChainingPrincipalElectionStrategy {
    strategies: Vec<Arc<dyn PrincipalElectionStrategy>>,
}

impl ChainingPrincipalElectionStrategy {
    pub fn new(strategies: Vec<Arc<dyn PrincipalElectionStrategy>>) -> Self {
        let mut chain = Self::default();
        for s in strategies {
            chain.register(s);
        }
        chain
    }

    pub fn register(&mut self, strategy: Arc<dyn PrincipalElectionStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.order());
    }
}

impl PrincipalElectionStrategy for ChainingPrincipalElectionStrategy {
    fn nominate_principals(
        &self,
        principals: &[Principal],
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, ElectionError> {
        for strategy in &self.strategies {
            if let Some(p) = strategy.nominate_principals(principals, attributes)? {
                return Ok(Some(p));
            }
        }
        warn!(
            candidates = principals.len(),
            "no election strategy nominated a principal"
        );
        Err(ElectionError::Unresolved {
            candidates: principals.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{DefaultPrincipalFactory, NULL_PRINCIPAL};
    use serde_json::json;

    fn principal(id: &str, attr: &str) -> Principal {
        let mut attrs = AttributeMap::new();
        attrs.insert_single(attr, "own");
        Principal::new(id, attrs).unwrap()
    }

    fn merged() -> AttributeMap {
        let mut attrs = AttributeMap::new();
        attrs.insert("memberOf", vec![json!("staff"), json!("faculty")]);
        attrs
    }

    #[test]
    fn last_wins_takes_second_id_with_merged_attributes() {
        let strategy = DefaultPrincipalElectionStrategy::new(
            ConflictResolver::Last,
            Arc::new(DefaultPrincipalFactory),
        );
        let candidates = [principal("first", "a"), principal("second", "b")];

        let elected = strategy
            .nominate_principals(&candidates, &merged())
            .unwrap()
            .unwrap();

        assert_eq!(elected.id(), "second");
        assert_eq!(elected.attributes(), &merged());
        assert!(!elected.attributes().contains("b"));
    }

    #[test]
    fn first_wins_takes_first_id() {
        let strategy = DefaultPrincipalElectionStrategy::new(
            ConflictResolver::First,
            Arc::new(DefaultPrincipalFactory),
        );
        let candidates = [principal("first", "a"), principal("second", "b")];
        let elected = strategy
            .nominate_principals(&candidates, &merged())
            .unwrap()
            .unwrap();
        assert_eq!(elected.id(), "first");
    }

    #[test]
    fn null_principals_are_never_elected() {
        let strategy = DefaultPrincipalElectionStrategy::new(
            ConflictResolver::Last,
            Arc::new(DefaultPrincipalFactory),
        );
        let candidates = [principal("casuser", "a"), NULL_PRINCIPAL];
        let elected = strategy
            .nominate_principals(&candidates, &AttributeMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(elected.id(), "casuser");
    }

    #[derive(Debug)]
    struct Fixed {
        order: i32,
        id: Option<&'static str>,
    }

    impl PrincipalElectionStrategy for Fixed {
        fn order(&self) -> i32 {
            self.order
        }

        fn nominate_principals(
            &self,
            _principals: &[Principal],
            attributes: &AttributeMap,
        ) -> Result<Option<Principal>, ElectionError> {
            Ok(self
                .id
                .map(|id| Principal::new(id, attributes.clone()))
                .transpose()?)
        }
    }

    #[test]
    fn chain_runs_in_declared_order_not_insertion_order() {
        let chain = ChainingPrincipalElectionStrategy::new(vec![
            Arc::new(Fixed {
                order: 10,
                id: Some("late"),
            }),
            Arc::new(Fixed {
                order: 1,
                id: None,
            }),
            Arc::new(Fixed {
                order: 5,
                id: Some("early"),
            }),
        ]);
        let elected = chain
            .nominate_principals(&[], &AttributeMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(elected.id(), "early");
    }

    #[test]
    fn chain_fails_loudly_when_nobody_nominates() {
        let chain = ChainingPrincipalElectionStrategy::new(vec![Arc::new(Fixed {
            order: 0,
            id: None,
        })]);
        let err = chain
            .nominate_principals(&[principal("x", "a")], &AttributeMap::new())
            .unwrap_err();
        assert_eq!(err, ElectionError::Unresolved { candidates: 1 });
    }
}
