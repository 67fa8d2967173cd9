//! [`NodePath`]: the canonical hierarchical key type for the node tree.
//!
//! A path is a slash-separated sequence of non-empty name segments, always
//! absolute (a single leading slash), never trailing-slashed except for the
//! root `"/"` itself.

use dsa_error::{Error, ErrorKind};
use std::fmt;

const ILLEGAL_CHARS: &[char] = &['/', '\\', '?', '*', ':', '|', '"', '<', '>'];

/// A canonical, absolute node path such as `/sys/links/dataflow`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodePath(String);

impl NodePath {
    /// The root path, `"/"`.
    pub fn root() -> Self {
        NodePath("/".to_owned())
    }

    /// Parses a path string, normalizing duplicate internal separators and
    /// a missing leading slash. Does not validate individual segment
    /// characters — use [`validate_name`] when building segments from user
    /// input that must reject illegal characters.
    pub fn parse(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref();
        let mut segments = Vec::new();
        for part in raw.split('/') {
            if !part.is_empty() {
                segments.push(part);
            }
        }
        if segments.is_empty() {
            return NodePath::root();
        }
        NodePath(format!("/{}", segments.join("/")))
    }

    /// The path as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Concatenates `self` with `rhs`, collapsing duplicate separators and
    /// never producing a trailing slash.
    pub fn join(&self, rhs: impl AsRef<str>) -> NodePath {
        if self.is_root() {
            return NodePath::parse(rhs.as_ref());
        }
        NodePath::parse(format!("{}/{}", self.0, rhs.as_ref()))
    }

    /// Returns the suffix of `self` relative to `base`: the remainder if
    /// `base` is a proper prefix, `"/"` if the paths are identical, or an
    /// empty path on mismatch.
    pub fn rebase(&self, base: &NodePath) -> NodePath {
        if self == base {
            return NodePath::root();
        }
        let prefix = if base.is_root() {
            "/".to_owned()
        } else {
            format!("{}/", base.0)
        };
        if let Some(rest) = self.0.strip_prefix(&prefix) {
            NodePath::parse(rest)
        } else {
            NodePath(String::new())
        }
    }

    /// Whether `rebase` would yield a non-empty result (i.e. `base` is a
    /// prefix of, or equal to, `self`).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The parent path: this path without its last segment. The parent of
    /// the root is the root.
    pub fn parent(&self) -> NodePath {
        if self.is_root() {
            return NodePath::root();
        }
        match self.0.rfind('/') {
            Some(0) => NodePath::root(),
            Some(idx) => NodePath(self.0[..idx].to_owned()),
            None => NodePath::root(),
        }
    }

    /// The last segment of the path; empty string for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "";
        }
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Splits the first segment off the path, returning it alongside the
    /// remaining path.
    pub fn split_first(&self) -> (String, NodePath) {
        let trimmed = self.0.trim_start_matches('/');
        match trimmed.find('/') {
            Some(idx) => (
                trimmed[..idx].to_owned(),
                NodePath::parse(&trimmed[idx..]),
            ),
            None => (trimmed.to_owned(), NodePath(String::new())),
        }
    }

    /// Iterates the path's segments in order, root excluded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (0 for the root).
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Whether `self` is an ancestor of, or equal to, `other`.
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        !other.rebase(self).0.is_empty() || other == self
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodePath {
    fn from(s: &str) -> Self {
        NodePath::parse(s)
    }
}

impl From<String> for NodePath {
    fn from(s: String) -> Self {
        NodePath::parse(s)
    }
}

/// Validates a single path segment name against the builder's naming rules.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::EmptyNameSpecified));
    }
    if name.chars().any(|c| ILLEGAL_CHARS.contains(&c)) {
        return Err(Error::with_detail(
            ErrorKind::InvalidNameCharacters,
            format!("name {name:?} contains an illegal character"),
        ));
    }
    Ok(())
}

/// A slash-separated glob pattern over node names, where `*` matches one
/// segment exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern(Vec<PatternSegment>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PatternSegment {
    Literal(String),
    Wildcard,
}

impl PathPattern {
    pub fn parse(pattern: impl AsRef<str>) -> Self {
        let segments = pattern
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(s.to_owned())
                }
            })
            .collect();
        PathPattern(segments)
    }

    /// Whether this pattern matches only the root path, in which case
    /// registering a creation callback for it has no effect.
    pub fn matches_only_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `path` matches this pattern segment-for-segment.
    pub fn matches(&self, path: &NodePath) -> bool {
        let segments: Vec<&str> = path.segments().collect();
        if segments.len() != self.0.len() {
            return false;
        }
        self.0.iter().zip(segments).all(|(pat, seg)| match pat {
            PatternSegment::Wildcard => true,
            PatternSegment::Literal(lit) => lit == seg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_name_round_trip() {
        let p = NodePath::parse("/sys/links/dataflow");
        assert_eq!(p.parent().as_str(), "/sys/links");
        assert_eq!(p.name(), "dataflow");
        assert_eq!(p.parent().join(p.name()), p);
    }

    #[test]
    fn rebase_strips_common_prefix() {
        let p = NodePath::parse("/downstream/link/a");
        assert_eq!(
            p.rebase(&NodePath::parse("/downstream/link")).as_str(),
            "/a"
        );
        assert!(p.rebase(&NodePath::parse("/other")).is_empty());
        assert_eq!(p.rebase(&p).as_str(), "/");
    }

    #[test]
    fn join_collapses_separators() {
        let base = NodePath::parse("/a/b/");
        assert_eq!(base.join("/c").as_str(), "/a/b/c");
        assert_eq!(NodePath::root().join("x").as_str(), "/x");
    }

    #[test]
    fn validate_name_rejects_illegal_chars() {
        assert!(validate_name("ok-name_1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad/name").is_err());
        assert!(validate_name("bad*name").is_err());
    }

    #[test]
    fn pattern_matches_wildcard_segment() {
        let pattern = PathPattern::parse("/devices/*/status");
        assert!(pattern.matches(&NodePath::parse("/devices/1/status")));
        assert!(!pattern.matches(&NodePath::parse("/devices/1/2/status")));
        assert!(!pattern.matches(&NodePath::parse("/devices/status")));
    }

    #[test]
    fn pattern_matching_only_root_is_detected() {
        let pattern = PathPattern::parse("/");
        assert!(pattern.matches_only_root());
    }

    #[test]
    fn depth_and_segments() {
        let p = NodePath::parse("/a/b/c");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.segments().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(NodePath::root().depth(), 0);
    }
}
