mod common;

use anyhow::Result;
use std::sync::Arc;

use common::{Fixture, user};
use sso_core::principal::{
    AttributeMap, AttributeMerger, ChainingPrincipalElectionStrategy, ConflictResolver,
    DefaultPrincipalElectionStrategy, DefaultPrincipalFactory, ElectionError, Principal,
    PrincipalError, PrincipalResolver,
};
use sso_core::services::oauth::OAuthError;
use sso_core::tickets::AccessToken;
use sso_core::{Authentication, AuthenticationBuilder, Clock, TicketError};

/// Directory lookup that adds a department and knows nobody called `reject`.
#[derive(Debug)]
struct Directory {
    reject: &'static str,
}

impl PrincipalResolver for Directory {
    fn resolve(
        &self,
        credential_id: &str,
        attributes: &AttributeMap,
    ) -> Result<Option<Principal>, PrincipalError> {
        if credential_id == self.reject {
            return Ok(None);
        }
        let mut attrs = attributes.clone();
        attrs.insert_single("department", "IT");
        Principal::new(credential_id, attrs).map(Some)
    }
}

fn builder(reject: &'static str, conflicts: ConflictResolver) -> AuthenticationBuilder {
    let election = DefaultPrincipalElectionStrategy::new(conflicts, Arc::new(DefaultPrincipalFactory));
    AuthenticationBuilder::new(
        vec![Arc::new(Directory { reject })],
        Arc::new(ChainingPrincipalElectionStrategy::new(vec![Arc::new(election)])),
        AttributeMerger::MultiValued,
    )
}

fn password_grant() -> [(&'static str, &'static str); 6] {
    [
        ("grant_type", "password"),
        ("client_id", "web"),
        ("client_secret", "web-secret"),
        ("username", "casuser"),
        ("password", "Mellon"),
        ("scope", "read"),
    ]
}

#[tokio::test]
async fn password_grant_token_carries_resolved_principal() -> Result<()> {
    let fx = Fixture::with_authentication_builder(builder("nobody", ConflictResolver::Last));
    let response = fx.token(&password_grant()).await?;

    let stored = fx
        .registry
        .get_typed::<AccessToken>(&response.access_token)
        .await?
        .expect("access token");
    let principal = stored.state.authentication.expect("authentication").principal;
    assert_eq!(principal.id(), "casuser");
    assert_eq!(principal.attributes().first_str("department"), Some("IT"));
    assert_eq!(principal.attributes().first_str("email"), Some("casuser@example.org"));
    Ok(())
}

#[tokio::test]
async fn unresolvable_resource_owner_is_invalid_grant() -> Result<()> {
    let fx = Fixture::with_authentication_builder(builder("casuser", ConflictResolver::Last));
    let result = fx.token(&password_grant()).await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn session_elects_one_principal_from_the_chain() -> Result<()> {
    let fx = Fixture::with_authentication_builder(builder("nobody", ConflictResolver::First));
    let password = fx.authentication().with_attribute("method", "password");
    fx.advance(5);
    let otp = Authentication::new(user("casuser-otp"), fx.clock.now()).with_attribute("method", "otp");

    let tgt = fx
        .cas
        .create_ticket_granting_ticket_for_chain(&[password, otp])
        .await?;
    let authn = tgt.authentication().expect("authentication");
    assert_eq!(authn.principal.id(), "casuser");
    assert_eq!(
        authn.principal.attributes().strings("email"),
        vec!["casuser@example.org", "casuser-otp@example.org"]
    );
    assert_eq!(authn.attributes.strings("method"), vec!["password", "otp"]);
    assert_eq!(authn.authentication_date, fx.clock.now());
    Ok(())
}

#[tokio::test]
async fn session_without_resolvable_principal_is_refused() -> Result<()> {
    let fx = Fixture::with_authentication_builder(builder("casuser", ConflictResolver::Last));
    let result = fx.cas.create_ticket_granting_ticket(fx.authentication()).await;
    assert!(
        matches!(
            result,
            Err(TicketError::Election(ElectionError::Unresolved { candidates: 0 }))
        ),
        "{result:?}"
    );
    Ok(())
}
