//! Validated namespace paths
//!
//! A path is absolute and `/`-separated. Components may not be empty, `.`
//! or `..`, and may not contain whitespace or control characters. A single
//! trailing `/` is tolerated and dropped.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path separator
pub const SEPARATOR: char = '/';

/// An absolute, normalized namespace path
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath {
    components: Vec<String>,
}

impl FsPath {
    /// The root path `/`
    #[must_use]
    pub const fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse and validate a path string
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::invalid_path("path is empty"));
        }
        let Some(rest) = path.strip_prefix(SEPARATOR) else {
            return Err(Error::invalid_path(format!("path is not absolute: {path}")));
        };
        let rest = rest.strip_suffix(SEPARATOR).unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let components = rest
            .split(SEPARATOR)
            .map(|c| validate_component(c, path).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { components })
    }

    /// Check if this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Path components from the root down
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components (0 for the root)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Last component, `None` for the root
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Parent path, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Append a single validated component
    pub fn join(&self, name: &str) -> Result<Self> {
        let name = validate_component(name, name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Check if `self` equals `prefix` or lies beneath it
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.components.starts_with(&prefix.components)
    }
}

fn validate_component<'a>(component: &'a str, path: &str) -> Result<&'a str> {
    if component.is_empty() {
        return Err(Error::invalid_path(format!("empty component in {path}")));
    }
    if component == "." || component == ".." {
        return Err(Error::invalid_path(format!(
            "relative component '{component}' in {path}"
        )));
    }
    if component.contains(SEPARATOR) {
        return Err(Error::invalid_path(format!("separator in name '{component}'")));
    }
    if component
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::invalid_path(format!(
            "whitespace or control character in {path}"
        )));
    }
    Ok(component)
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "{SEPARATOR}");
        }
        for component in &self.components {
            write!(f, "{SEPARATOR}{component}")?;
        }
        Ok(())
    }
}

impl FromStr for FsPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FsPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FsPath> for String {
    fn from(path: FsPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let root = FsPath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
        assert!(root.parent().is_none());
        assert!(root.name().is_none());
    }

    #[test]
    fn test_parse_nested() {
        let path = FsPath::parse("/a/bb/c").unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.name(), Some("c"));
        assert_eq!(path.parent().unwrap().to_string(), "/a/bb");
        assert_eq!(path.to_string(), "/a/bb/c");
    }

    #[test]
    fn test_trailing_separator() {
        assert_eq!(FsPath::parse("/a/b/").unwrap().to_string(), "/a/b");
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["", "a/b", "//a", "/a//b", "/a/../b", "/./a", "/a b", "/a\tb"] {
            let err = FsPath::parse(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn test_join_and_prefix() {
        let dir = FsPath::parse("/i1").unwrap();
        let child = dir.join("j2").unwrap();
        assert_eq!(child.to_string(), "/i1/j2");
        assert!(child.starts_with(&dir));
        assert!(child.starts_with(&FsPath::root()));
        assert!(!dir.starts_with(&child));
        assert!(!FsPath::parse("/i10").unwrap().starts_with(&dir));
        assert!(dir.join("x/y").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let path = FsPath::parse("/x/y").unwrap();
        let as_string: String = path.clone().into();
        assert_eq!(as_string, "/x/y");
        assert_eq!(FsPath::try_from(as_string).unwrap(), path);
    }
}
