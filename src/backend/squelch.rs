use regex::Regex;

use super::BackendError;
use crate::tags::TagSet;

/// Suppresses series whose tags match a rule.
///
/// A rule is a set of `key=regex` pairs; a tag set matches when every key is
/// present and its value fully matches the pattern. Any matching rule squelches.
#[derive(Debug, Clone, Default)]
pub struct Squelch {
    rules: Vec<Vec<(String, Regex)>>,
}

impl Squelch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule written as `key=regex,key=regex`.
    pub fn add_rule(&mut self, rule: &str) -> Result<(), BackendError> {
        let mut pairs = Vec::new();
        for part in rule.split(',').filter(|p| !p.trim().is_empty()) {
            let (k, pattern) = part
                .split_once('=')
                .ok_or_else(|| BackendError::Squelch(rule.to_string()))?;
            let re = Regex::new(&format!("^(?:{})$", pattern.trim()))
                .map_err(|_| BackendError::Squelch(rule.to_string()))?;
            pairs.push((k.trim().to_string(), re));
        }
        if pairs.is_empty() {
            return Err(BackendError::Squelch(rule.to_string()));
        }
        self.rules.push(pairs);
        Ok(())
    }

    pub fn with_rule(mut self, rule: &str) -> Result<Self, BackendError> {
        self.add_rule(rule)?;
        Ok(self)
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        self.rules.iter().any(|rule| {
            rule.iter()
                .all(|(k, re)| tags.get(k).is_some_and(|v| re.is_match(v)))
        })
    }
}

#[test]
fn test_rule_requires_every_key() {
    let squelch = Squelch::new().with_rule("host=db.*,env=dev").unwrap();
    let tags = |s| TagSet::parse(s).unwrap();
    assert!(squelch.matches(&tags("host=db1,env=dev")));
    assert!(!squelch.matches(&tags("host=db1,env=prod")));
    assert!(!squelch.matches(&tags("host=db1")));
    assert!(!squelch.matches(&tags("host=xdb1,env=dev")));
}

#[test]
fn test_rejects_bad_rules() {
    assert!(Squelch::new().with_rule("host").is_err());
    assert!(Squelch::new().with_rule("host=(").is_err());
    assert!(Squelch::new().with_rule("").is_err());
}
