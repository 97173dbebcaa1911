//! Principal resolvers turn a credential id (plus any attributes the
//! authentication handler produced) into a principal.
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::principal::{
    AttributeMap, ElectionError, Principal, PrincipalElectionStrategy, PrincipalError,
    PrincipalFactory,
};

/// How attribute sets from several sources are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttributeMerger {
    /// Later sources overwrite earlier values.
    #[default]
    Replace,
    /// Earlier sources win; later ones only fill gaps.
    Add,
    /// Values from every source are kept.
    MultiValued,
}

impl AttributeMerger {
    pub fn merge(&self, target: &mut AttributeMap, source: &AttributeMap) {
        for (name, values) in source.iter() {
            match self {
                Self::Replace => {
                    target.insert(name, values.to_vec());
                }
                Self::Add => {
                    if !target.contains(name) {
                        target.insert(name, values.to_vec());
                    }
                }
                Self::MultiValued => target.add_values(name, values.iter().cloned()),
            }
        }
    }
}

pub trait PrincipalResolver: Send + Sync + fmt::Debug {
    fn supports(&self, _credential_id: &str) -> bool {
        true
    }

    fn resolve(
        &self,
        credential_id: &str,
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, PrincipalError>;
}

/// Uses the credential id as-is.
#[derive(Debug, Clone)]
pub struct EchoingPrincipalResolver {
    factory: Arc<dyn PrincipalFactory>,
}

impl EchoingPrincipalResolver {
    pub fn new(factory: Arc<dyn PrincipalFactory>) -> Self {
        Self { factory }
    }
}

impl PrincipalResolver for EchoingPrincipalResolver {
    fn resolve(
        &self,
        credential_id: &str,
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, PrincipalError> {
        if credential_id.trim().is_empty() {
            return Ok(None);
        }
        self.factory
            .create_principal(credential_id, attributes.clone())
            .map(Some)
    }
}

/// Asks every supporting resolver, merges their attributes and elects one
/// final principal.
#[derive(Debug, Clone)]
pub struct ChainingPrincipalResolver {
    resolvers: Vec<Arc<dyn PrincipalResolver>>,
    election: Arc<dyn PrincipalElectionStrategy>,
    merger: AttributeMerger,
}

impl ChainingPrincipalResolver {
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

    pub fn resolve(
        &self,
        credential_id: &str,
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, ElectionError> {
        let mut candidates = Vec::new();
        let mut merged = AttributeMap::new();
        for resolver in self.resolvers.iter().filter(|r| r.supports(credential_id)) {
            if let Some(p) = resolver.resolve(credential_id, attributes)? {
                self.merger.merge(&mut merged, p.attributes());
                candidates.push(p);
            }
        }
        debug!(
            credential = %credential_id,
            candidates = candidates.len(),
            "resolved principal candidates"
        );
        if candidates.is_empty() {
            return Ok(None);
        }
        self.election.nominate_principals(&candidates, &merged)
    }
}
