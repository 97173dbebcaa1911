//! The client application a ticket is issued for.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(String);

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Service id without query string or fragment, used for session tracking.
    pub fn normalized(&self) -> &str {
        let end = self.0.find(['?', '#']).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Whether `other` identifies the same application.
    pub fn matches(&self, other: &Service) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Service {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_drops_query_and_fragment() {
        let s = Service::new("https://app.example.org/login?ticket=ST-1#top");
        assert_eq!(s.normalized(), "https://app.example.org/login");
        assert!(s.matches(&Service::new("https://app.example.org/login")));
        assert!(!s.matches(&Service::new("https://app.example.org/other")));
    }
}
