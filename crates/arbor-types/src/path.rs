//! Paths locate nodes from a workspace root as a sequence of name +
//! same-name-sibling-index segments.
//!
//! # Invariants
//!
//! - The root path is the empty segment sequence.
//! - SNS indexes are 1-based; index 1 is the default and is omitted from the
//!   display form (`/a/b[2]/c` has an explicit index only on `b`).
//! - Paths are immutable; all "mutating" operations return new paths sharing
//!   the underlying segment storage where possible.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::name::Name;

/// The default same-name-sibling index.
pub const DEFAULT_SNS_INDEX: u32 = 1;

/// One step of a [`Path`]: a [`Name`] plus a 1-based same-name-sibling index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    name: Name,
    index: u32,
}

impl Segment {
    /// Create a segment with an explicit SNS index (must be 1 or greater).
    pub fn with_index(name: Name, index: u32) -> Result<Self, TypeError> {
        if index == 0 {
            return Err(TypeError::InvalidSnsIndex(index));
        }
        Ok(Self { name, index })
    }

    /// Create a segment with the default index of 1.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            index: DEFAULT_SNS_INDEX,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The 1-based same-name-sibling index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns `true` if the index is the default (1).
    pub fn has_default_index(&self) -> bool {
        self.index == DEFAULT_SNS_INDEX
    }

    /// Parse from the display form: `name` or `name[3]`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if let Some((name_part, rest)) = s.split_once('[') {
            let Some(index_part) = rest.strip_suffix(']') else {
                return Err(TypeError::InvalidPath(format!(
                    "unterminated index in segment {s:?}"
                )));
            };
            let index: u32 = index_part
                .parse()
                .map_err(|_| TypeError::InvalidPath(format!("bad index in segment {s:?}")))?;
            Self::with_index(Name::parse(name_part)?, index)
        } else {
            Ok(Self::new(Name::parse(s)?))
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_default_index() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({self})")
    }
}

/// An absolute path from the workspace root to a node.
///
/// Paths are immutable value objects with structural equality: two paths are
/// equal iff their segment sequences (names *and* SNS indexes) are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    segments: Arc<[Segment]>,
}

impl Path {
    /// The root path (empty segment sequence).
    pub fn root() -> Self {
        Self {
            segments: Arc::from([]),
        }
    }

    /// Build a path from a segment sequence.
    pub fn from_segments(segments: impl Into<Vec<Segment>>) -> Self {
        Self {
            segments: segments.into().into(),
        }
    }

    /// Parse from the display form, e.g. `/`, `/a/b[2]/c`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(TypeError::InvalidPath(format!("path {s:?} is not absolute")));
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let segments = rest
            .split('/')
            .map(Segment::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_segments(segments))
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments; 0 for the root.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The final segment, or `None` for the root.
    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Self::from_segments(
            self.segments[..self.segments.len() - 1].to_vec(),
        ))
    }

    /// The path formed by the first `n` segments.
    ///
    /// `n` greater than `len()` is truncated to `len()`.
    pub fn subpath(&self, n: usize) -> Path {
        let n = n.min(self.segments.len());
        Self::from_segments(self.segments[..n].to_vec())
    }

    /// Extend this path by one segment.
    pub fn join(&self, segment: Segment) -> Path {
        let mut segments = self.segments.to_vec();
        segments.push(segment);
        Self::from_segments(segments)
    }

    /// Returns `true` if `self` is a proper ancestor of `other`.
    ///
    /// The root is an ancestor of every non-root path; no path is its own
    /// ancestor.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Returns `true` if `self` is `other` or an ancestor of it.
    pub fn is_at_or_above(&self, other: &Path) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

// Display is the canonical form consumed by Path::parse; keep them in sync.
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in self.segments.iter() {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seg(name: &str) -> Segment {
        Segment::new(Name::local(name).unwrap())
    }

    fn seg_at(name: &str, index: u32) -> Segment {
        Segment::with_index(Name::local(name).unwrap(), index).unwrap()
    }

    // -----------------------------------------------------------------------
    // Construction and structure
    // -----------------------------------------------------------------------

    #[test]
    fn root_is_empty() {
        let root = Path::root();
        assert!(root.is_root());
        assert_eq!(root.len(), 0);
        assert!(root.last_segment().is_none());
        assert!(root.parent().is_none());
    }

    #[test]
    fn parent_drops_last_segment() {
        let path = Path::from_segments(vec![seg("a"), seg("b"), seg("c")]);
        let parent = path.parent().unwrap();
        assert_eq!(parent, Path::from_segments(vec![seg("a"), seg("b")]));
    }

    #[test]
    fn join_appends() {
        let path = Path::root().join(seg("a")).join(seg_at("b", 2));
        assert_eq!(path.to_string(), "/a/b[2]");
    }

    #[test]
    fn subpath_truncates() {
        let path = Path::parse("/a/b/c").unwrap();
        assert_eq!(path.subpath(0), Path::root());
        assert_eq!(path.subpath(2), Path::parse("/a/b").unwrap());
        assert_eq!(path.subpath(99), path);
    }

    #[test]
    fn sns_index_zero_is_rejected() {
        let err = Segment::with_index(Name::local("a").unwrap(), 0);
        assert_eq!(err, Err(TypeError::InvalidSnsIndex(0)));
    }

    // -----------------------------------------------------------------------
    // Equality
    // -----------------------------------------------------------------------

    #[test]
    fn equality_includes_sns_index() {
        let first = Path::from_segments(vec![seg("a"), seg_at("b", 1)]);
        let second = Path::from_segments(vec![seg("a"), seg_at("b", 2)]);
        assert_ne!(first, second);
        // ... and an explicit index of 1 equals the default.
        assert_eq!(first, Path::from_segments(vec![seg("a"), seg("b")]));
    }

    // -----------------------------------------------------------------------
    // Ancestry
    // -----------------------------------------------------------------------

    #[test]
    fn root_is_ancestor_of_everything_but_itself() {
        let root = Path::root();
        let path = Path::parse("/a").unwrap();
        assert!(root.is_ancestor_of(&path));
        assert!(!root.is_ancestor_of(&Path::root()));
        assert!(root.is_at_or_above(&Path::root()));
    }

    #[test]
    fn ancestor_requires_matching_indexes() {
        let b1 = Path::parse("/a/b").unwrap();
        let b2_child = Path::parse("/a/b[2]/c").unwrap();
        assert!(!b1.is_ancestor_of(&b2_child));
        assert!(Path::parse("/a/b[2]").unwrap().is_ancestor_of(&b2_child));
    }

    #[test]
    fn descendant_is_not_ancestor() {
        let parent = Path::parse("/a").unwrap();
        let child = Path::parse("/a/b").unwrap();
        assert!(!child.is_ancestor_of(&parent));
    }

    // -----------------------------------------------------------------------
    // Parse / display
    // -----------------------------------------------------------------------

    #[test]
    fn root_displays_as_slash() {
        assert_eq!(Path::root().to_string(), "/");
        assert_eq!(Path::parse("/").unwrap(), Path::root());
    }

    #[test]
    fn display_hides_default_index() {
        let path = Path::from_segments(vec![seg("a"), seg_at("b", 2), seg("c")]);
        assert_eq!(path.to_string(), "/a/b[2]/c");
    }

    #[test]
    fn parse_rejects_relative_paths() {
        assert!(Path::parse("a/b").is_err());
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn parse_rejects_malformed_index() {
        assert!(Path::parse("/a/b[0]").is_err());
        assert!(Path::parse("/a/b[x]").is_err());
        assert!(Path::parse("/a/b[2").is_err());
    }

    proptest! {
        #[test]
        fn parse_display_roundtrip(
            names in prop::collection::vec("[a-z][a-z0-9]{0,8}", 0..6),
            indexes in prop::collection::vec(1u32..5, 0..6),
        ) {
            let segments: Vec<Segment> = names
                .iter()
                .zip(indexes.iter().chain(std::iter::repeat(&1)))
                .map(|(n, i)| seg_at(n, *i))
                .collect();
            let path = Path::from_segments(segments);
            let reparsed = Path::parse(&path.to_string()).unwrap();
            prop_assert_eq!(path, reparsed);
        }
    }
}
