// src/version/mod.rs

//! Version ordering and constraint checks for recipe versions
//!
//! Recipe versions are "semver-like" strings. They are compared segment by
//! segment after splitting on `.` and `-`: numeric segments compare as
//! integers, other segments compare lexicographically. When a numeric and a
//! textual segment meet at the same position the numeric one sorts lower, so
//! `1.0.0-rc1` < `1.0.0-1` never panics or depends on input order.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// One dot/dash separated piece of a version string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Numeric(u64),
    Text(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Numeric(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed recipe version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipeVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl RecipeVersion {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → [1, 2, 3]
    /// - "2.0.0-rc1" → [2, 0, 0, "rc1"]
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::ParseError("Empty version string".to_string()));
        }

        Ok(Self::from_str_lossy(trimmed))
    }

    /// Build a version without rejecting empty input
    ///
    /// Used for ordering catalog keys, which are never rejected.
    pub fn from_str_lossy(s: &str) -> Self {
        let segments = s
            .split(['.', '-'])
            .map(|part| match part.parse::<u64>() {
                Ok(n) if part.chars().all(|c| c.is_ascii_digit()) => Segment::Numeric(n),
                _ => Segment::Text(part.to_string()),
            })
            .collect();

        Self {
            raw: s.to_string(),
            segments,
        }
    }

    /// The original version string
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for RecipeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Vec ordering is lexicographic with shorter prefixes sorting first
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for RecipeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecipeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Compare two version strings with the recipe ordering
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    RecipeVersion::from_str_lossy(a).cmp(&RecipeVersion::from_str_lossy(b))
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(RecipeVersion),
    /// Greater than
    GreaterThan(RecipeVersion),
    /// Greater than or equal
    GreaterOrEqual(RecipeVersion),
    /// Less than
    LessThan(RecipeVersion),
    /// Less than or equal
    LessOrEqual(RecipeVersion),
    /// Not equal
    NotEqual(RecipeVersion),
    /// Both constraints must be satisfied (for ranges like ">= 1.0, < 2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">=8.0" → GreaterOrEqual(8.0)
    /// - "< 2.0.0" → LessThan(2.0.0)
    /// - "1.5.0" → Exact(1.5.0)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some((left, right)) = s.split_once(',') {
            let left = Self::parse(left)?;
            let right = Self::parse(right)?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("==") {
            Ok(VersionConstraint::Exact(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(RecipeVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(RecipeVersion::parse(rest)?))
        } else {
            // No operator means exact match
            Ok(VersionConstraint::Exact(RecipeVersion::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &RecipeVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments_compare_as_integers() {
        let v1 = RecipeVersion::parse("1.10.0").unwrap();
        let v2 = RecipeVersion::parse("1.9.9").unwrap();
        assert!(v1 > v2);
    }

    #[test]
    fn test_latest_of_three() {
        let mut versions = vec!["1.0.0", "2.0.0", "1.9.9"];
        versions.sort_by(|a, b| compare_versions(b, a));
        assert_eq!(versions, vec!["2.0.0", "1.9.9", "1.0.0"]);
    }

    #[test]
    fn test_text_segments_compare_lexicographically() {
        assert_eq!(compare_versions("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
    }

    #[test]
    fn test_mixed_segments_do_not_panic() {
        assert_eq!(compare_versions("1.0.0-1", "1.0.0-rc1"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0-1"), Ordering::Greater);
    }

    #[test]
    fn test_shorter_prefix_sorts_first() {
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_empty_version_rejected() {
        assert!(RecipeVersion::parse("  ").is_err());
    }

    #[test]
    fn test_version_constraint_greater_or_equal_without_space() {
        let c = VersionConstraint::parse(">=8.0").unwrap();
        assert!(c.satisfies(&RecipeVersion::parse("8.0").unwrap()));
        assert!(c.satisfies(&RecipeVersion::parse("8.0.36").unwrap()));
        assert!(!c.satisfies(&RecipeVersion::parse("5.7.44").unwrap()));
    }

    #[test]
    fn test_version_constraint_and() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert!(c.satisfies(&RecipeVersion::parse("1.5.0").unwrap()));
        assert!(!c.satisfies(&RecipeVersion::parse("2.0.0").unwrap()));
        assert!(!c.satisfies(&RecipeVersion::parse("0.9.0").unwrap()));
    }

    #[test]
    fn test_version_constraint_any() {
        let c = VersionConstraint::parse("*").unwrap();
        assert!(c.satisfies(&RecipeVersion::parse("99.99.99").unwrap()));
    }

    #[test]
    fn test_version_constraint_display() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert_eq!(c.to_string(), ">= 1.0.0, < 2.0.0");
    }
}
