//! Equality-based label selectors

use crate::error::ClientError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single selector term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{}={}", key, value),
            Requirement::NotEquals(key, value) => write!(f, "{}!={}", key, value),
            Requirement::Exists(key) => write!(f, "{}", key),
            Requirement::NotExists(key) => write!(f, "!{}", key),
        }
    }
}

/// Conjunction of requirements; the empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = ClientError;

    /// Parses `k=v`, `k==v`, `k!=v`, `k` and `!k` terms separated by commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut requirements = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(valid_key(key, s)?, value.trim().to_string())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(valid_key(key, s)?, value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(valid_key(key, s)?, value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::NotExists(valid_key(key, s)?)
            } else {
                Requirement::Exists(valid_key(term, s)?)
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }
}

fn valid_key(key: &str, selector: &str) -> Result<String, ClientError> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains('!') {
        return Err(ClientError::InvalidSelector(selector.to_string()));
    }
    Ok(key.to_string())
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", terms.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector: LabelSelector = "".parse().unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_parse_all_operators() {
        let selector: LabelSelector = "app=web, tier==frontend,env!=prod,managed,!legacy"
            .parse()
            .unwrap();

        assert!(selector.matches(&labels(&[
            ("app", "web"),
            ("tier", "frontend"),
            ("env", "dev"),
            ("managed", ""),
        ])));
        assert!(!selector.matches(&labels(&[
            ("app", "web"),
            ("tier", "frontend"),
            ("env", "prod"),
            ("managed", ""),
        ])));
        assert!(!selector.matches(&labels(&[
            ("app", "web"),
            ("tier", "frontend"),
            ("managed", ""),
            ("legacy", "yes"),
        ])));
    }

    #[test]
    fn test_not_equals_matches_missing_key() {
        let selector: LabelSelector = "env!=prod".parse().unwrap();
        assert!(selector.matches(&labels(&[])));
    }

    #[test]
    fn test_invalid_selector() {
        assert!("=value".parse::<LabelSelector>().is_err());
        assert!("bad key=value".parse::<LabelSelector>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let selector = LabelSelector::everything().eq("app", "web").exists("managed");
        assert_eq!(selector.to_string(), "app=web,managed");
        assert_eq!(selector.to_string().parse::<LabelSelector>().unwrap(), selector);
    }
}
