//! Permission paths
//!
//! A permission path is a dot-separated list of segments such as
//! `shop.buy` or `whisker.cfg.weather.city`. Stored paths are literal;
//! query and grant paths may use `*` (exactly one segment) or a terminal
//! `**` (any remaining depth, including none).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::application::errors::RbacError;

/// Segment separator
pub const SEPARATOR: char = '.';

/// Matches exactly one segment
pub const ANY_SEGMENT: &str = "*";

/// Matches any remaining depth; only valid as the last segment
pub const ANY_DEPTH: &str = "**";

/// Which list of a role or principal a path goes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    White,
    Black,
}

impl PermissionMode {
    pub fn as_str(&self) -> &str {
        match self {
            PermissionMode::White => "white",
            PermissionMode::Black => "black",
        }
    }

    /// The list that contradicts this one
    pub fn opposite(&self) -> Self {
        match self {
            PermissionMode::White => PermissionMode::Black,
            PermissionMode::Black => PermissionMode::White,
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed permission path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionPath {
    segments: Vec<String>,
}

impl PermissionPath {
    /// Parse a path, keeping the case of every segment
    pub fn parse(raw: &str) -> Result<Self, RbacError> {
        if raw.is_empty() {
            return Err(RbacError::invalid_path(raw, "path is empty"));
        }

        let mut segments = Vec::new();
        for segment in raw.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(RbacError::invalid_path(raw, "empty segment"));
            }
            let wildcard = segment == ANY_SEGMENT || segment == ANY_DEPTH;
            if !wildcard
                && !segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            {
                return Err(RbacError::invalid_path(
                    raw,
                    format!("segment '{}' must be alphanumeric, '_' or '-'", segment),
                ));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// Parse a path, folding it to lower case unless `case_sensitive`
    pub fn normalized(raw: &str, case_sensitive: bool) -> Result<Self, RbacError> {
        if case_sensitive {
            Self::parse(raw)
        } else {
            Self::parse(&raw.to_lowercase())
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment is `*` or `**`
    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s == ANY_SEGMENT || s == ANY_DEPTH)
    }

    /// Whether this path, read as a pattern, grants `target`
    ///
    /// A literal pattern covers only an equal path. `**` anywhere but last
    /// never matches.
    pub fn covers(&self, target: &PermissionPath) -> bool {
        covers_from(&self.segments, &target.segments)
    }
}

fn covers_from(pattern: &[String], target: &[String]) -> bool {
    match pattern.split_first() {
        None => target.is_empty(),
        Some((head, rest)) if head == ANY_DEPTH => rest.is_empty(),
        Some((head, rest)) => match target.split_first() {
            Some((segment, remaining)) if head == ANY_SEGMENT || head == segment => {
                covers_from(rest, remaining)
            }
            _ => false,
        },
    }
}

impl fmt::Display for PermissionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for PermissionPath {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> PermissionPath {
        PermissionPath::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(PermissionPath::parse("").is_err());
        assert!(PermissionPath::parse("a..b").is_err());
        assert!(PermissionPath::parse("a.b.").is_err());
        assert!(PermissionPath::parse("a.b c").is_err());
        assert_eq!(path("shop.buy").segments(), &["shop", "buy"]);
    }

    #[test]
    fn test_normalized_folds_case() {
        let p = PermissionPath::normalized("Shop.Buy", false).unwrap();
        assert_eq!(p.to_string(), "shop.buy");
        let p = PermissionPath::normalized("Shop.Buy", true).unwrap();
        assert_eq!(p.to_string(), "Shop.Buy");
    }

    #[test]
    fn test_single_segment_wildcard() {
        assert!(path("a.*.c").covers(&path("a.x.c")));
        assert!(!path("a.*.c").covers(&path("a.x.y.c")));
        assert!(!path("a.*").covers(&path("a")));
    }

    #[test]
    fn test_any_depth_wildcard() {
        assert!(path("**").covers(&path("anything.at.all")));
        assert!(path("a.**").covers(&path("a")));
        assert!(path("a.**").covers(&path("a.b.c")));
        assert!(!path("a.**").covers(&path("b.c")));
        assert!(!path("a.**.c").covers(&path("a.b.c")));
    }

    #[test]
    fn test_literal_covers_only_itself() {
        assert!(path("shop.buy").covers(&path("shop.buy")));
        assert!(!path("shop").covers(&path("shop.buy")));
        assert!(!path("shop.buy").covers(&path("shop")));
    }
}
