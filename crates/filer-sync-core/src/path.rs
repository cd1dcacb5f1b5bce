//! Absolute paths in the filer namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// An absolute, normalized path such as `/buckets/photos/cat.jpg`.
///
/// The root is `/`. Every other path starts with `/` and carries no
/// trailing slash.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FullPath(String);

impl FullPath {
    /// The namespace root.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Join a directory and an entry name.
    pub fn new(dir: &str, name: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        if name.is_empty() {
            return Self::normalize(dir);
        }
        Self(format!("{}/{}", dir, name))
    }

    /// Parse and normalize an absolute path.
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(CoreError::InvalidPath(s.to_string()));
        }
        Ok(Self::normalize(s))
    }

    fn normalize(s: &str) -> Self {
        let trimmed = s.trim_end_matches('/');
        if trimmed.is_empty() {
            Self::root()
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Get the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is the root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Split into parent directory and final name.
    ///
    /// The root splits into `("/", "")`.
    pub fn dir_and_name(&self) -> (&str, &str) {
        if self.is_root() {
            return ("/", "");
        }
        match self.0.rfind('/') {
            Some(0) => ("/", &self.0[1..]),
            Some(idx) => (&self.0[..idx], &self.0[idx + 1..]),
            None => ("/", self.0.as_str()),
        }
    }

    /// The final path component.
    pub fn name(&self) -> &str {
        self.dir_and_name().1
    }

    /// The parent directory.
    pub fn parent(&self) -> FullPath {
        FullPath(self.dir_and_name().0.to_string())
    }

    /// A child of this directory.
    pub fn child(&self, name: &str) -> FullPath {
        FullPath::new(&self.0, name)
    }

    /// Check if this path is `prefix` itself or lies underneath it.
    pub fn is_under(&self, prefix: &FullPath) -> bool {
        if prefix.is_root() || self.0 == prefix.0 {
            return true;
        }
        self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/')
    }
}

impl fmt::Debug for FullPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullPath({})", self.0)
    }
}

impl fmt::Display for FullPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FullPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for FullPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(FullPath::new("/", "a").as_str(), "/a");
        assert_eq!(FullPath::new("/a/", "b").as_str(), "/a/b");
        assert_eq!(FullPath::new("/a", "b").as_str(), "/a/b");
        assert_eq!(FullPath::new("/a", "").as_str(), "/a");
    }

    #[test]
    fn test_dir_and_name() {
        let p = FullPath::parse("/buckets/photos/cat.jpg").unwrap();
        assert_eq!(p.dir_and_name(), ("/buckets/photos", "cat.jpg"));
        assert_eq!(FullPath::parse("/top").unwrap().dir_and_name(), ("/", "top"));
        assert_eq!(FullPath::root().dir_and_name(), ("/", ""));
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(FullPath::parse("/a/b/").unwrap().as_str(), "/a/b");
        assert!(FullPath::parse("///").unwrap().is_root());
        assert!(matches!(
            FullPath::parse("relative/path"),
            Err(CoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_is_under() {
        let dir = FullPath::parse("/a/b").unwrap();
        assert!(FullPath::parse("/a/b").unwrap().is_under(&dir));
        assert!(FullPath::parse("/a/b/c").unwrap().is_under(&dir));
        assert!(!FullPath::parse("/a/bc").unwrap().is_under(&dir));
        assert!(!FullPath::parse("/a").unwrap().is_under(&dir));
        assert!(FullPath::parse("/x").unwrap().is_under(&FullPath::root()));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn child_then_split_recovers_parts(
                parts in prop::collection::vec("[a-z0-9._-]{1,8}", 0..4),
                name in "[a-z0-9._-]{1,8}",
            ) {
                let dir = parts.iter().fold(FullPath::root(), |d, p| d.child(p));
                let path = dir.child(&name);

                prop_assert_eq!(path.parent(), dir.clone());
                prop_assert_eq!(path.name(), name.as_str());
                prop_assert!(path.is_under(&dir));
                prop_assert_eq!(FullPath::parse(path.as_str()).unwrap(), path);
            }
        }
    }
}
