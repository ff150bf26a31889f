//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No transport-level response from the display within the retry budget.
    #[error("Display unreachable: {0}")]
    Unreachable(String),

    /// The display answered, but a command or its reply failed.
    #[error("Display communication error: {0}")]
    Comm(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn comm(msg: impl Into<String>) -> Self {
        Self::Comm(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the error means the display could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<mdc_codec::MdcError> for Error {
    fn from(err: mdc_codec::MdcError) -> Self {
        Self::Comm(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdc_error_maps_to_comm() {
        let err: Error = mdc_codec::MdcError::InvalidAck(0x00).into();
        assert!(matches!(err, Error::Comm(_)));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_unreachable_predicate() {
        assert!(Error::unreachable("timed out").is_unreachable());
        assert!(!Error::config("bad time").is_unreachable());
    }
}
