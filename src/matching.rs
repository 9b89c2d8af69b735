use std::collections::HashMap;

use regex::Regex;

/// A declarative token classifier: a set of literal synonyms plus ordered
/// anchored regex patterns, each mapping to one value of a closed
/// enumeration. Lookup resolves zero-or-one category per token.
pub struct MatchTable<T: Copy> {
    exact: HashMap<&'static str, T>,
    patterns: Vec<(Regex, T)>,
}

impl<T: Copy> MatchTable<T> {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    pub fn literals(mut self, synonyms: &[&'static str], value: T) -> Self {
        for synonym in synonyms {
            self.exact.insert(synonym, value);
        }
        self
    }

    /// Pattern matching is case-sensitive and anchored to the whole token.
    pub fn pattern(mut self, pattern: &str, value: T) -> Self {
        let anchored = format!("^{}$", pattern.trim_start_matches('^').trim_end_matches('$'));
        let regex = Regex::new(&anchored).expect("invalid match pattern");
        self.patterns.push((regex, value));
        self
    }

    pub fn resolve(&self, token: &str) -> Option<T> {
        let token = token.trim();
        if let Some(value) = self.exact.get(token) {
            return Some(*value);
        }
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(token))
            .map(|(_, value)| *value)
    }
}

impl<T: Copy> Default for MatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Alpha,
        Beta,
    }

    fn table() -> MatchTable<Kind> {
        MatchTable::new()
            .literals(&["ALPHA", "A"], Kind::Alpha)
            .pattern("BETA[123]", Kind::Beta)
    }

    #[test]
    fn resolves_literals_and_trims() {
        let table = table();
        assert_eq!(table.resolve("ALPHA"), Some(Kind::Alpha));
        assert_eq!(table.resolve("  A "), Some(Kind::Alpha));
        assert_eq!(table.resolve("alpha"), None);
    }

    #[test]
    fn resolves_anchored_patterns() {
        let table = table();
        assert_eq!(table.resolve("BETA2"), Some(Kind::Beta));
        assert_eq!(table.resolve("BETA22"), None);
        assert_eq!(table.resolve("XBETA2"), None);
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        assert_eq!(table().resolve("GAMMA"), None);
    }
}
