mod common;

use anyhow::Result;
use common::Fixture;
use sso_core::services::oauth::{DeviceAuthorizationResponse, OAuthError, TokenResponse};
use sso_core::tickets::{AccessToken, DeviceToken, DeviceUserCode};

async fn authorize(fx: &Fixture) -> Result<DeviceAuthorizationResponse> {
    let response = fx
        .request(&[("response_type", "device_code"), ("client_id", "tv")])
        .await?;
    match response {
        TokenResponse::DeviceAuthorization(device) => Ok(device),
        other => panic!("expected a device authorization response, got {other:?}"),
    }
}

async fn poll(fx: &Fixture, device_code: &str) -> Result<TokenResponse, OAuthError> {
    fx.request(&[
        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
        ("client_id", "tv"),
        ("device_code", device_code),
    ])
    .await
}

#[tokio::test]
async fn device_authorization_issues_linked_codes() -> Result<()> {
    let fx = Fixture::new();
    let device = authorize(&fx).await?;

    assert!(device.device_code.starts_with("ODT-"));
    assert_eq!(device.user_code.len(), 9);
    assert_eq!(device.expires_in, 300);
    assert_eq!(device.interval, 15);
    assert_eq!(device.verification_uri, fx.oauth.verification_uri);

    let stored = fx
        .registry
        .get_typed::<DeviceToken>(&device.device_code)
        .await?
        .expect("device code");
    let user_code = fx
        .registry
        .get_typed::<DeviceUserCode>(&stored.user_code)
        .await?
        .expect("user code");
    assert_eq!(user_code.device_code, device.device_code);
    assert_eq!(user_code.user_code(), device.user_code);
    assert!(!user_code.approved);
    Ok(())
}

#[tokio::test]
async fn polling_walks_pending_slow_down_and_success() -> Result<()> {
    let fx = Fixture::new();
    let device = authorize(&fx).await?;

    // First poll only records the attempt.
    let first = poll(&fx, &device.device_code).await;
    assert!(matches!(first, Err(OAuthError::UnapprovedDeviceUserCode(_))));

    fx.advance(5);
    let eager = poll(&fx, &device.device_code).await;
    assert!(matches!(eager, Err(OAuthError::ThrottledDeviceUserCodeApproval(_))));

    fx.advance(15);
    let patient = poll(&fx, &device.device_code).await;
    assert!(matches!(patient, Err(OAuthError::UnapprovedDeviceUserCode(_))));

    // Users may type the code loosely.
    let typed = device.user_code.to_lowercase().replace('-', " ");
    fx.tokens.approve_device_user_code(&typed, fx.authentication()).await?;

    let issued = match poll(&fx, &device.device_code).await? {
        TokenResponse::AccessToken(tokens) => tokens,
        other => panic!("expected tokens, got {other:?}"),
    };
    assert!(issued.refresh_token.is_some());
    let token = fx
        .registry
        .get_typed::<AccessToken>(&issued.access_token)
        .await?
        .expect("access token");
    let authn = token.state.authentication.expect("authentication");
    assert_eq!(authn.principal.id(), "casuser");

    // Both codes are spent.
    let again = poll(&fx, &device.device_code).await;
    assert!(matches!(again, Err(OAuthError::InvalidDeviceToken(_))));
    assert!(
        fx.registry
            .get_ticket(&DeviceUserCode::id_for(&device.user_code))
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn expired_device_code_is_reported_as_such() -> Result<()> {
    let fx = Fixture::new();
    let device = authorize(&fx).await?;
    fx.advance(301);

    let result = poll(&fx, &device.device_code).await;
    assert!(matches!(result, Err(OAuthError::InvalidDeviceToken(_))));
    assert_eq!(result.unwrap_err().error_code(), "expired_token");
    Ok(())
}

#[tokio::test]
async fn unknown_device_code_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let result = poll(&fx, "ODT-does-not-exist").await;
    assert!(matches!(result, Err(OAuthError::InvalidDeviceToken(_))));
    Ok(())
}

#[tokio::test]
async fn user_code_is_approved_once() -> Result<()> {
    let fx = Fixture::new();
    let device = authorize(&fx).await?;

    let unknown = fx
        .tokens
        .approve_device_user_code("ZZZZ-ZZZZ", fx.authentication())
        .await;
    assert!(matches!(unknown, Err(OAuthError::InvalidDeviceToken(_))));

    let approved = fx
        .tokens
        .approve_device_user_code(&device.user_code, fx.authentication())
        .await?;
    assert!(approved.approved);

    let twice = fx
        .tokens
        .approve_device_user_code(&device.user_code, fx.authentication())
        .await;
    assert!(matches!(twice, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn device_code_of_another_client_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let device = authorize(&fx).await?;

    let result = fx
        .request(&[
            ("grant_type", "device_code"),
            ("client_id", "spa"),
            ("device_code", device.device_code.as_str()),
        ])
        .await;
    // spa may not use the device grant at all.
    assert!(matches!(result, Err(OAuthError::UnauthorizedClient(_))));
    Ok(())
}

#[tokio::test]
async fn polling_without_device_code_is_invalid_request() -> Result<()> {
    let fx = Fixture::new();
    for params in [
        vec![("grant_type", "device_code"), ("client_id", "tv")],
        vec![("grant_type", "device_code"), ("client_id", "tv"), ("device_code", " ")],
    ] {
        let result = fx.request(&params).await;
        assert!(matches!(result, Err(OAuthError::InvalidRequest(_))), "{result:?}");
    }
    Ok(())
}
