//! Namespace paths.
//!
//! A path is a dot-separated list of identifiers (`"a.b.c"`) naming a slot in
//! nested global tables. Valid characters are `[A-Za-z0-9_.]` and no segment
//! may be empty. [`path!`](crate::path) checks a literal at compile time;
//! [`NamePath::parse`] checks at runtime.

use std::fmt;

use crate::error::{AccessError, Result};

/// A validated dotted name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamePath {
    full: String,
}

impl NamePath {
    /// Validate and wrap a path.
    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let full = path.into();
        if is_valid(&full) {
            Ok(Self { full })
        } else {
            Err(AccessError::InvalidName { name: full }.into())
        }
    }

    /// Wrap a path that has already been validated by [`is_valid`].
    #[doc(hidden)]
    pub fn from_validated(path: &str) -> Self {
        debug_assert!(is_valid(path));
        Self { full: path.to_owned() }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.full.split('.')
    }

    pub fn is_nested(&self) -> bool {
        self.full.contains('.')
    }

    /// Split off the final segment: `"a.b.c"` becomes `(Some("a.b"), "c")`.
    pub fn split_last(&self) -> (Option<&str>, &str) {
        match self.full.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, &self.full),
        }
    }

    /// Append a segment, validating it.
    pub fn join(&self, segment: &str) -> Result<Self> {
        Self::parse(format!("{}.{}", self.full, segment))
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl TryFrom<&str> for NamePath {
    type Error = crate::Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for NamePath {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&NamePath> for NamePath {
    type Error = crate::Error;

    fn try_from(value: &NamePath) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Anything a host operation accepts as a path.
pub trait IntoPath {
    fn into_path(self) -> Result<NamePath>;
}

impl IntoPath for NamePath {
    fn into_path(self) -> Result<NamePath> {
        Ok(self)
    }
}

impl IntoPath for &NamePath {
    fn into_path(self) -> Result<NamePath> {
        Ok(self.clone())
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Result<NamePath> {
        NamePath::parse(self)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<NamePath> {
        NamePath::parse(self)
    }
}

/// Check a path in a `const` context.
pub const fn is_valid(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let mut i = 0;
    let mut segment_len = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'.' {
            if segment_len == 0 {
                return false;
            }
            segment_len = 0;
        } else if b.is_ascii_alphanumeric() || b == b'_' {
            segment_len += 1;
        } else {
            return false;
        }
        i += 1;
    }
    segment_len > 0
}

/// Build a [`NamePath`] from a literal checked at compile time.
///
/// ```
/// let path = luabind_core::path!("physics.vec3.new");
/// assert_eq!(path.as_str(), "physics.vec3.new");
/// ```
///
/// ```compile_fail
/// let path = luabind_core::path!("bad..name");
/// ```
#[macro_export]
macro_rules! path {
    ($lit:literal) => {{
        const _: () = assert!($crate::name::is_valid($lit), "invalid namespace path");
        $crate::NamePath::from_validated($lit)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_identifiers_and_dots() {
        assert!(is_valid("glob"));
        assert!(is_valid("a.b.c"));
        assert!(is_valid("vec3.__index"));
        assert!(is_valid("_1.x_2"));
    }

    #[test]
    fn rejects_empty_segments_and_symbols() {
        assert!(!is_valid(""));
        assert!(!is_valid(".a"));
        assert!(!is_valid("a."));
        assert!(!is_valid("a..b"));
        assert!(!is_valid("a-b"));
        assert!(!is_valid("a b"));
        assert!(!is_valid("ä"));
    }

    #[test]
    fn parse_reports_invalid_name() {
        let err = NamePath::parse("x.").unwrap_err();
        assert!(err.is_access());
    }

    #[test]
    fn split_and_join() {
        let path = NamePath::parse("a.b.c").unwrap();
        assert_eq!(path.split_last(), (Some("a.b"), "c"));
        assert_eq!(path.segments().collect::<Vec<_>>(), ["a", "b", "c"]);

        let root = NamePath::parse("glob").unwrap();
        assert_eq!(root.split_last(), (None, "glob"));
        assert!(!root.is_nested());
        assert_eq!(root.join("x").unwrap().as_str(), "glob.x");
        assert!(root.join("").is_err());
    }

    #[test]
    fn macro_builds_paths() {
        let path = crate::path!("a.d");
        assert_eq!(path.as_str(), "a.d");
    }
}
