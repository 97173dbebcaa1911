mod common;

use anyhow::Result;
use common::Fixture;
use serde_json::json;
use sso_core::services::oauth::{AccessTokenResponse, OAuthError, TokenExchangeType};
use sso_core::tickets::AccessToken;

const EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const JWT_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

async fn user_token(fx: &Fixture) -> Result<AccessTokenResponse> {
    Ok(fx
        .token(&[
            ("grant_type", "password"),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
            ("username", "casuser"),
            ("password", "Mellon"),
            ("scope", "read email"),
        ])
        .await?)
}

fn exchange<'a>(subject: &'a str, subject_type: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![
        ("grant_type", EXCHANGE),
        ("client_id", "api"),
        ("client_secret", "api-secret"),
        ("subject_token", subject),
        ("subject_token_type", subject_type),
    ]
}

#[tokio::test]
async fn opaque_token_is_exchanged_for_narrower_access_token() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;

    let exchanged = fx.token(&exchange(&subject.access_token, ACCESS_TOKEN_TYPE)).await?;
    assert_eq!(exchanged.scope, "read");
    assert_eq!(exchanged.issued_token_type.as_deref(), Some(ACCESS_TOKEN_TYPE));
    assert!(exchanged.refresh_token.is_none());

    let stored = fx
        .registry
        .get_typed::<AccessToken>(&exchanged.access_token)
        .await?
        .expect("exchanged token is persisted");
    assert_eq!(stored.token.client_id, "api");
    let authn = stored.state.authentication.expect("authentication");
    assert_eq!(authn.principal.id(), "casuser");
    Ok(())
}

#[tokio::test]
async fn jwt_requested_for_allowed_audience() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;

    let mut params = exchange(&subject.access_token, ACCESS_TOKEN_TYPE);
    params.push(("requested_token_type", JWT_TYPE));
    params.push(("audience", "https://api.example.org/orders"));
    let exchanged = fx.token(&params).await?;
    assert_eq!(
        exchanged.issued_token_type.as_deref(),
        Some(TokenExchangeType::Jwt.as_str())
    );

    let claims = fx.codec.verify_strict(&exchanged.access_token)?;
    assert_eq!(claims.sub, "casuser");
    assert_eq!(claims.audiences(), vec!["https://api.example.org/orders".to_string()]);
    assert_eq!(claims.extra.get("client_id"), Some(&json!("api")));
    assert_eq!(claims.extra.get("scope"), Some(&json!("read")));

    // The JWT names its ticket, so it can itself be exchanged as an access token.
    let again = fx.token(&exchange(&exchanged.access_token, ACCESS_TOKEN_TYPE)).await?;
    assert_eq!(again.scope, "read");
    Ok(())
}

#[tokio::test]
async fn actor_token_is_recorded_as_act_claim() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;
    let actor = user_token(&fx).await?;

    let mut params = exchange(&subject.access_token, ACCESS_TOKEN_TYPE);
    params.push(("requested_token_type", JWT_TYPE));
    params.push(("actor_token", actor.access_token.as_str()));
    params.push(("actor_token_type", ACCESS_TOKEN_TYPE));
    let exchanged = fx.token(&params).await?;

    let claims = fx.codec.verify_strict(&exchanged.access_token)?;
    assert_eq!(claims.extra.get("act"), Some(&json!({ "sub": "casuser" })));
    Ok(())
}

#[tokio::test]
async fn audience_outside_policy_is_refused() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;

    let mut params = exchange(&subject.access_token, ACCESS_TOKEN_TYPE);
    params.push(("audience", "https://evil.example.com/"));
    let result = fx.token(&params).await;
    assert!(matches!(result, Err(OAuthError::InvalidRequest(_))));
    Ok(())
}

#[tokio::test]
async fn unusable_subject_tokens_are_rejected() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;

    let unknown = fx.token(&exchange("AT-unknown", ACCESS_TOKEN_TYPE)).await;
    assert!(matches!(unknown, Err(OAuthError::InvalidGrant(_))));

    let refresh_type = "urn:ietf:params:oauth:token-type:refresh_token";
    let unsupported = fx.token(&exchange(&subject.access_token, refresh_type)).await;
    assert!(matches!(unsupported, Err(OAuthError::UnsupportedTokenType(_))));

    let garbage_jwt = fx.token(&exchange("a.b.c", JWT_TYPE)).await;
    assert!(matches!(garbage_jwt, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn client_without_exchange_grant_is_unauthorized() -> Result<()> {
    let fx = Fixture::new();
    let subject = user_token(&fx).await?;

    let mut params = exchange(&subject.access_token, ACCESS_TOKEN_TYPE);
    params[1] = ("client_id", "web");
    params[2] = ("client_secret", "web-secret");
    let result = fx.token(&params).await;
    assert!(matches!(result, Err(OAuthError::UnauthorizedClient(_))));
    Ok(())
}
