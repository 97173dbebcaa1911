//! Static user store backing the password grant and device approval.
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sso_core::principal::{AttributeMap, Principal};
use sso_core::services::oauth::OAuthError;
use sso_core::services::oauth::context::CredentialAuthenticator;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Clone, Deserialize)]
struct StaticUser {
    username: String,
    /// Hex SHA-256 of the password.
    password_sha256: String,
    #[serde(default)]
    attributes: AttributeMap,
}

#[derive(Clone, Default)]
pub struct StaticUsersAuthenticator {
    users: HashMap<String, StaticUser>,
}

impl fmt::Debug for StaticUsersAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticUsersAuthenticator")
            .field("users", &self.users.len())
            .finish()
    }
}

impl StaticUsersAuthenticator {
    /// `raw` is a JSON array of `{username, password_sha256, attributes}`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let users: Vec<StaticUser> = serde_json::from_str(raw)?;
        Ok(Self {
            users: users
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialAuthenticator for StaticUsersAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>, OAuthError> {
        let Some(user) = self.users.get(username) else {
            debug!("unknown user");
            return Ok(None);
        };
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        if !digest.eq_ignore_ascii_case(&user.password_sha256) {
            debug!("password mismatch");
            return Ok(None);
        }
        let principal = Principal::new(user.username.clone(), user.attributes.clone()).map_err(|e| {
            warn!(error = %e, "static user has an unusable id");
            OAuthError::Internal
        })?;
        Ok(Some(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("secret")
    const USERS: &str = r#"[
        {
            "username": "casuser",
            "password_sha256": "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b",
            "attributes": { "email": ["casuser@example.org"] }
        }
    ]"#;

    #[tokio::test]
    async fn matching_digest_resolves_principal() {
        let users = StaticUsersAuthenticator::from_json(USERS).unwrap();
        let principal = users.authenticate("casuser", "secret").await.unwrap().unwrap();
        assert_eq!(principal.id(), "casuser");
        assert_eq!(principal.attributes().first_str("email"), Some("casuser@example.org"));
    }

    #[tokio::test]
    async fn wrong_password_or_user_is_none() {
        let users = StaticUsersAuthenticator::from_json(USERS).unwrap();
        assert!(users.authenticate("casuser", "nope").await.unwrap().is_none());
        assert!(users.authenticate("someone", "secret").await.unwrap().is_none());
    }
}
