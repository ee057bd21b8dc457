//! Simple-pattern matcher for `filter` / `permit_*` options.
//!
//! An expression is a space-separated list of glob patterns (`*`, `?`,
//! `[...]`); `*` also matches `/`.
//! A pattern prefixed with `!` is negative. Patterns are tried in order
//! and the first one that matches decides; if none matches, the value is
//! rejected. A whole expression prefixed with `~ ` is a regular
//! expression and `= ` an exact string. An empty expression yields no
//! matcher at all, which callers treat as "accept everything".

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use thiserror::Error;

/// Matcher construction errors.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// Regex pattern failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Glob pattern failed to parse.
    #[error("invalid glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

#[derive(Debug, Clone)]
struct Pattern {
    glob: GlobMatcher,
    negative: bool,
}

#[derive(Debug, Clone)]
enum Kind {
    Simple(Vec<Pattern>),
    Regex(Regex),
    Exact(String),
}

/// Compiled matcher expression.
#[derive(Debug, Clone)]
pub struct Matcher {
    expr: String,
    kind: Kind,
}

impl Matcher {
    /// Compile an expression. Returns `Ok(None)` for an empty expression.
    pub fn parse(expr: &str) -> Result<Option<Self>, MatcherError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let kind = if let Some(re) = trimmed.strip_prefix("~ ") {
            Kind::Regex(compile(re)?)
        } else if let Some(exact) = trimmed.strip_prefix("= ") {
            Kind::Exact(exact.to_string())
        } else {
            let patterns = trimmed
                .split_whitespace()
                .map(|word| {
                    let (negative, glob) = match word.strip_prefix('!') {
                        Some(rest) => (true, rest),
                        None => (false, word),
                    };
                    Ok(Pattern {
                        glob: compile_glob(glob)?,
                        negative,
                    })
                })
                .collect::<Result<Vec<_>, MatcherError>>()?;
            Kind::Simple(patterns)
        };

        Ok(Some(Self {
            expr: trimmed.to_string(),
            kind,
        }))
    }

    /// The source expression.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.kind {
            Kind::Regex(re) => re.is_match(value),
            Kind::Exact(s) => s == value,
            Kind::Simple(patterns) => patterns
                .iter()
                .find(|p| p.glob.is_match(value))
                .is_some_and(|p| !p.negative),
        }
    }
}

/// Match against an optional matcher, where `None` accepts everything.
pub fn matches_opt(matcher: Option<&Matcher>, value: &str) -> bool {
    matcher.is_none_or(|m| m.matches(value))
}

fn compile(pattern: &str) -> Result<Regex, MatcherError> {
    Regex::new(pattern).map_err(|source| MatcherError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_glob(glob: &str) -> Result<GlobMatcher, MatcherError> {
    GlobBuilder::new(glob)
        .literal_separator(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|source| MatcherError::InvalidGlob {
            pattern: glob.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_expression_yields_none() {
        assert!(Matcher::parse("").unwrap().is_none());
        assert!(Matcher::parse("   ").unwrap().is_none());
        assert!(matches_opt(None, "anything"));
    }

    #[test]
    fn test_literal_words() {
        let m = Matcher::parse("internal external").unwrap().unwrap();
        assert!(m.matches("internal"));
        assert!(m.matches("external"));
        assert!(!m.matches("_bind"));
        assert!(!m.matches("internals"));
    }

    #[test]
    fn test_globs() {
        let m = Matcher::parse("*.example.com").unwrap().unwrap();
        assert!(m.matches("www.example.com"));
        assert!(!m.matches("example.com"));

        let m = Matcher::parse("eth? lo").unwrap().unwrap();
        assert!(m.matches("eth0"));
        assert!(!m.matches("eth10"));
        assert!(m.matches("lo"));
    }

    #[test]
    fn test_negation_first_match_wins() {
        let m = Matcher::parse("!_bind *").unwrap().unwrap();
        assert!(!m.matches("_bind"));
        assert!(m.matches("_default"));

        let m = Matcher::parse("* !_bind").unwrap().unwrap();
        assert!(m.matches("_bind"));
        assert!(m.matches("internal"));
    }

    #[test]
    fn test_leading_catch_all_is_a_pattern() {
        let m = Matcher::parse("* !kmalloc-*").unwrap().unwrap();
        assert!(m.matches("kmalloc-64"));
        assert!(m.matches("dentry"));

        let m = Matcher::parse("!kmalloc-* *").unwrap().unwrap();
        assert!(!m.matches("kmalloc-64"));
        assert!(m.matches("dentry"));
    }

    #[test]
    fn test_star_crosses_slashes() {
        let m = Matcher::parse("/var/*").unwrap().unwrap();
        assert!(m.matches("/var/lib/bind"));
        assert!(!m.matches("/etc/bind"));
    }

    #[test]
    fn test_invalid_glob() {
        let err = Matcher::parse("ok [unclosed").unwrap_err();
        assert!(matches!(err, MatcherError::InvalidGlob { ref pattern, .. } if pattern == "[unclosed"));
    }

    #[test]
    fn test_regex_and_exact() {
        let m = Matcher::parse("~ ^int.*al$").unwrap().unwrap();
        assert!(m.matches("internal"));
        assert!(!m.matches("external"));

        let m = Matcher::parse("= a*b").unwrap().unwrap();
        assert!(m.matches("a*b"));
        assert!(!m.matches("aXb"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = Matcher::parse("~ (unclosed").unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn test_special_chars_escaped() {
        let m = Matcher::parse("a.b").unwrap().unwrap();
        assert!(m.matches("a.b"));
        assert!(!m.matches("axb"));
    }
}
