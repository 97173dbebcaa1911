//! Principal value object and attribute map.
//!
//! - Attribute names compare ASCII case-insensitively; the first spelling
//!   inserted is the one kept.
//! - [`NULL_PRINCIPAL`] stands for "no principal resolved".
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod election;
pub mod factory;
pub mod resolver;

pub use election::{
    ChainingPrincipalElectionStrategy, ConflictResolver, DefaultPrincipalElectionStrategy,
    ElectionError, PrincipalElectionStrategy,
};
pub use factory::{DefaultPrincipalFactory, PrincipalFactory};
pub use resolver::{
    AttributeMerger, ChainingPrincipalResolver, EchoingPrincipalResolver, PrincipalResolver,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("principal id must not be blank")]
    BlankId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeName(String);

impl AttributeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AttributeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AttributeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq for AttributeName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for AttributeName {}

impl PartialOrd for AttributeName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeName {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.0.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

/// Multi-valued attributes keyed by case-insensitive name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<AttributeName, Vec<Value>>);

impl AttributeMap {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.0.get(&AttributeName::from(name)).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&AttributeName::from(name))
    }

    /// Replace all values under `name`.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Value>) -> Option<Vec<Value>> {
        self.0.insert(AttributeName::from(name.into()), values)
    }

    pub fn insert_single(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name, vec![value.into()]);
    }

    /// Append values under `name`, skipping ones already present.
    pub fn add_values(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        let entry = self.0.entry(AttributeName::from(name.into())).or_default();
        for v in values {
            if !entry.contains(&v) {
                entry.push(v);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<Value>> {
        self.0.remove(&AttributeName::from(name))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|k, _| keep(k.as_str()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|v| v.first())
    }

    pub fn first_str(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(Value::as_str)
    }

    /// Reads a flag stored either as a JSON boolean or as the string "true".
    pub fn first_bool(&self, name: &str) -> Option<bool> {
        match self.first(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
            _ => None,
        }
    }

    /// All string values under `name`, in stored order.
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|vs| {
                vs.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<Value>)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, Vec<Value>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Resolved identity. Immutable once built; use [`Principal::with_attributes`]
/// to derive a copy with a different attribute set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: Cow<'static, str>,
    #[serde(default)]
    attributes: AttributeMap,
}

pub const NULL_PRINCIPAL: Principal = Principal {
    id: Cow::Borrowed("nobody"),
    attributes: AttributeMap::new(),
};

impl Principal {
    pub fn new(id: impl Into<String>, attributes: AttributeMap) -> Result<Self, PrincipalError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PrincipalError::BlankId);
        }
        Ok(Self {
            id: Cow::Owned(id),
            attributes,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn with_attributes(&self, attributes: AttributeMap) -> Self {
        Self {
            id: self.id.clone(),
            attributes,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_PRINCIPAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_names_are_case_insensitive() {
        let mut attrs = AttributeMap::new();
        attrs.insert_single("Email", "casuser@example.org");

        assert!(attrs.contains("email"));
        assert!(attrs.contains("EMAIL"));
        assert_eq!(attrs.first_str("eMaIl"), Some("casuser@example.org"));

        attrs.insert_single("EMAIL", "other@example.org");
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.first_str("email"), Some("other@example.org"));
    }

    #[test]
    fn add_values_skips_duplicates() {
        let mut attrs = AttributeMap::new();
        attrs.add_values("groups", [json!("staff"), json!("admin")]);
        attrs.add_values("GROUPS", [json!("admin"), json!("ops")]);
        assert_eq!(attrs.strings("groups"), vec!["staff", "admin", "ops"]);
    }

    #[test]
    fn blank_principal_id_is_rejected() {
        assert_eq!(
            Principal::new("  ", AttributeMap::new()),
            Err(PrincipalError::BlankId)
        );
    }

    #[test]
    fn with_attributes_keeps_id_and_leaves_original_untouched() {
        let p = Principal::new("casuser", AttributeMap::new()).unwrap();
        let mut attrs = AttributeMap::new();
        attrs.insert_single("cn", "CAS");
        let q = p.with_attributes(attrs);
        assert_eq!(q.id(), "casuser");
        assert!(p.attributes().is_empty());
        assert_eq!(q.attributes().first_str("cn"), Some("CAS"));
    }

    #[test]
    fn null_principal_is_recognised_after_deserialization() {
        let raw = serde_json::to_string(&NULL_PRINCIPAL).unwrap();
        let back: Principal = serde_json::from_str(&raw).unwrap();
        assert!(back.is_null());
        assert_eq!(back.id(), "nobody");
    }
}
