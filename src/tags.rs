//! Tag sets and the algebra used to group, join and de-duplicate results.
//!
//! A [`TagSet`] identifies one series or number inside a result set. Its
//! canonical string (`dc=x,host=a`) is order independent and is used for
//! equality, duplicate detection and cache keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or mutating tag sets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TagError {
    #[error("empty tag key")]
    EmptyKey,

    #[error("empty value for tag key {0}")]
    EmptyValue(String),

    #[error("invalid character in tag {0:?}")]
    InvalidChar(String),

    #[error("malformed tag pair {0:?}, expected key=value")]
    Malformed(String),

    #[error("duplicate tag key {0}")]
    DuplicateKey(String),
}

/// Characters that would break the canonical `k=v,k=v` form.
fn is_forbidden(c: char) -> bool {
    matches!(c, '=' | ',' | '{' | '}') || c.is_whitespace()
}

fn validate(key: &str, value: &str) -> Result<(), TagError> {
    if key.is_empty() {
        return Err(TagError::EmptyKey);
    }
    if value.is_empty() {
        return Err(TagError::EmptyValue(key.to_string()));
    }
    if key.chars().any(is_forbidden) {
        return Err(TagError::InvalidChar(key.to_string()));
    }
    if value.chars().any(is_forbidden) {
        return Err(TagError::InvalidChar(value.to_string()));
    }
    Ok(())
}

/// Mapping of tag key to tag value with unique, validated keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// The empty group.
    pub fn new() -> Self {
        TagSet(BTreeMap::new())
    }

    /// Builds a tag set from pairs, rejecting invalid or repeated keys.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, TagError>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let (k, v) = (k.into(), v.into());
            validate(&k, &v)?;
            if map.contains_key(&k) {
                return Err(TagError::DuplicateKey(k));
            }
            map.insert(k, v);
        }
        Ok(TagSet(map))
    }

    /// Parses `k=v,k2=v2`. The empty string is the empty set.
    pub fn parse(s: &str) -> Result<Self, TagError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(TagSet::new());
        }
        let mut pairs = Vec::new();
        for part in s.split(',') {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| TagError::Malformed(part.to_string()))?;
            pairs.push((k.trim().to_string(), v.trim().to_string()));
        }
        TagSet::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> TagKeys {
        self.0.keys().cloned().collect()
    }

    /// Sorted `k=v` pairs joined by commas.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    pub fn equal(&self, other: &TagSet) -> bool {
        self.0 == other.0
    }

    /// Every key of `self` is present in `other` with the same value.
    pub fn subset(&self, other: &TagSet) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    /// Keys present in both sets carry equal values.
    pub fn overlaps(&self, other: &TagSet) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_none_or(|ov| ov == v))
    }

    /// Union of both sets; values from `other` win on shared keys.
    pub fn merge(&self, other: &TagSet) -> TagSet {
        let mut map = self.0.clone();
        for (k, v) in &other.0 {
            map.insert(k.clone(), v.clone());
        }
        TagSet(map)
    }

    /// Adds `key=value`, failing when the key is already present.
    pub fn with(&self, key: &str, value: &str) -> Result<TagSet, TagError> {
        validate(key, value)?;
        if self.0.contains_key(key) {
            return Err(TagError::DuplicateKey(key.to_string()));
        }
        let mut map = self.0.clone();
        map.insert(key.to_string(), value.to_string());
        Ok(TagSet(map))
    }

    pub fn remove(&self, key: &str) -> TagSet {
        let mut map = self.0.clone();
        map.remove(key);
        TagSet(map)
    }

    /// Restricts the set to the given keys.
    pub fn project(&self, keys: &TagKeys) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| keys.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.canonical())
    }
}

impl TryFrom<BTreeMap<String, String>> for TagSet {
    type Error = TagError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        TagSet::from_pairs(map)
    }
}

impl From<TagSet> for BTreeMap<String, String> {
    fn from(tags: TagSet) -> Self {
        tags.0
    }
}

/// Set of tag keys known statically for a node, used for parse-time checks.
pub type TagKeys = BTreeSet<String>;

/// Parses a comma separated key list; blank entries are skipped.
pub fn parse_keys(s: &str) -> TagKeys {
    s.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
