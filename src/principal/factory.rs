use std::fmt;

use crate::principal::{AttributeMap, Principal, PrincipalError};

/// Builds principals from a resolved id plus attributes.
pub trait PrincipalFactory: Send + Sync + fmt::Debug {
    fn create_principal(
        &self,
        id: &str,
        attributes: AttributeMap,
    ) -> Result<Principal, PrincipalError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPrincipalFactory;

impl PrincipalFactory for DefaultPrincipalFactory {
    fn create_principal(
        &self,
        id: &str,
        attributes: AttributeMap,
    ) -> Result<Principal, PrincipalError> {
        Principal::new(id.trim(), attributes)
    }
}
