//! Common error types for framepipe.

use thiserror::Error;

/// Result type alias using framepipe's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for framepipe operations.
///
/// Only misuse is reported here. An empty queue or an exhausted pool is a
/// routine condition and is signalled with `Option::None` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A capacity, size, offset or length was out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create an invalid argument error from any displayable type.
    pub fn invalid_argument(msg: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// True for [`Error::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::invalid_argument("capacity must be > 0");
        assert_eq!(err.to_string(), "invalid argument: capacity must be > 0");
        assert!(err.is_invalid_argument());
    }
}
