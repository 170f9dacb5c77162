//! Key patterns for targeted invalidation
//!
//! `truck-1` matches exactly, `quote-*` matches every key starting with
//! `quote-`, and a lone `*` matches everything.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    All,
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            KeyPattern::All
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            KeyPattern::Prefix(prefix.to_string())
        } else {
            KeyPattern::Exact(pattern.to_string())
        }
    }

    pub fn exact(key: impl Into<String>) -> Self {
        KeyPattern::Exact(key.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::All => true,
        }
    }

    /// Parse a list of pattern strings
    pub fn parse_all<I, S>(patterns: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns.into_iter().map(|p| KeyPattern::parse(p.as_ref())).collect()
    }
}

impl From<&str> for KeyPattern {
    fn from(s: &str) -> Self {
        KeyPattern::parse(s)
    }
}

impl From<String> for KeyPattern {
    fn from(s: String) -> Self {
        KeyPattern::parse(&s)
    }
}

impl From<KeyPattern> for String {
    fn from(p: KeyPattern) -> Self {
        p.to_string()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => f.write_str(key),
            KeyPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            KeyPattern::All => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(KeyPattern::parse("truck-1"), KeyPattern::Exact("truck-1".to_string()));
        assert_eq!(KeyPattern::parse("quote-*"), KeyPattern::Prefix("quote-".to_string()));
        assert_eq!(KeyPattern::parse("*"), KeyPattern::All);
    }

    #[test]
    fn test_matches() {
        assert!(KeyPattern::parse("truck-1").matches("truck-1"));
        assert!(!KeyPattern::parse("truck-1").matches("truck-10"));
        assert!(KeyPattern::parse("truck-*").matches("truck-10"));
        assert!(!KeyPattern::parse("truck-*").matches("quote-1"));
        assert!(KeyPattern::All.matches("anything"));
    }

    #[test]
    fn test_yaml_round_trip_as_strings() {
        let patterns = KeyPattern::parse_all(["fleet*", "quote-Q1", "*"]);
        let yaml = serde_yaml::to_string(&patterns).unwrap();
        assert!(yaml.contains("fleet*"));
        let back: Vec<KeyPattern> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, patterns);
    }
}
