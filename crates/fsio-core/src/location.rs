use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::FsError;

/// Path of a file inside a backend, kept as segments rather than a joined
/// string so that segment names may contain `/`.
///
/// A location always has at least one segment and no segment is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(Vec<String>);

impl Location {
    pub fn new<I, S>(segments: I) -> Result<Self, FsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(FsError::InvalidLocation("location has no segments".to_string()));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FsError::InvalidLocation(format!(
                "empty segment in {:?}",
                segments
            )));
        }
        Ok(Self(segments))
    }

    /// Split a `/`-delimited key into a location, ignoring empty parts.
    pub fn parse(key: &str) -> Result<Self, FsError> {
        Self::new(key.split('/').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment.
    pub fn file_name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Segments joined with `/`, as used for object keys.
    pub fn key(&self) -> String {
        self.0.join("/")
    }

    /// New location with `prefix` segments in front of this one.
    pub fn prefixed<I, S>(&self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segments: Vec<String> = prefix.into_iter().map(Into::into).collect();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    /// Drop the first `n` segments; `None` when nothing would remain.
    pub fn strip_prefix(&self, n: usize) -> Option<Self> {
        if n >= self.0.len() {
            return None;
        }
        Some(Self(self.0[n..].to_vec()))
    }

    /// Location with one more trailing segment.
    pub fn child(&self, name: impl Into<String>) -> Result<Self, FsError> {
        let name = name.into();
        if name.is_empty() {
            return Err(FsError::InvalidLocation("empty child segment".to_string()));
        }
        let mut segments = self.0.clone();
        segments.push(name);
        Ok(Self(segments))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A file found while enumerating a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub location: Location,
    pub mod_time: DateTime<Utc>,
}

impl Entry {
    pub fn new(location: Location, mod_time: DateTime<Utc>) -> Self {
        Self { location, mod_time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty() {
        assert!(Location::new(Vec::<String>::new()).is_err());
        assert!(Location::new(["a", ""]).is_err());
        assert!(Location::parse("").is_err());
        assert!(Location::parse("///").is_err());
    }

    #[test]
    fn test_segments_are_opaque() {
        let a = Location::new(["reports", "q1/q2.pdf"]).unwrap();
        let b = Location::new(["reports", "q1", "q2.pdf"]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.file_name(), "q1/q2.pdf");
    }

    #[test]
    fn test_prefix_round_trip() {
        let location = Location::parse("a/b.txt").unwrap();
        let prefixed = location.prefixed(["personal", "files"]);
        assert_eq!(prefixed.key(), "personal/files/a/b.txt");
        assert_eq!(prefixed.strip_prefix(2), Some(location));
        assert_eq!(prefixed.strip_prefix(4), None);
    }

    #[test]
    fn test_child() {
        let dir = Location::parse("docs").unwrap();
        assert_eq!(dir.child("x").unwrap().to_string(), "docs/x");
        assert!(dir.child("").is_err());
    }
}
