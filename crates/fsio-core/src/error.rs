use thiserror::Error;

use crate::location::Location;

/// Errors produced by fsio backends and the sync engine.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{location}: {source}")]
    At {
        location: Location,
        #[source]
        source: Box<FsError>,
    },
}

impl FsError {
    /// Wrap this error with the location it happened at. Errors already
    /// wrapped with the same location are returned unchanged.
    pub fn at(self, location: &Location) -> Self {
        if let FsError::At { location: existing, .. } = &self {
            if existing == location {
                return self;
            }
        }
        FsError::At {
            location: location.clone(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping location wrappers.
    pub fn root(&self) -> &FsError {
        match self {
            FsError::At { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for cancellation and deadline errors, which end every engine mode.
    pub fn is_context(&self) -> bool {
        matches!(self.root(), FsError::Cancelled | FsError::DeadlineExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), FsError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), FsError::Unsupported(_))
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(err.to_string()),
            _ => FsError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_looks_through_wrappers() {
        let location = Location::parse("a/b").unwrap();
        let err = FsError::DeadlineExceeded.at(&location).at(&location);
        assert!(err.is_context());
        assert!(!err.is_not_found());

        let err = FsError::NotFound("x".into()).at(&location);
        assert!(err.is_not_found());
        assert!(!err.is_context());
        assert_eq!(err.to_string(), "a/b: not found: x");
        assert_eq!(err.at(&location).to_string(), "a/b: not found: x");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(FsError::from(io).is_not_found());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(FsError::from(io), FsError::Io(_)));
    }
}
