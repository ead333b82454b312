//! Error types for Kino Analytics

use thiserror::Error;

/// Result type alias for tracker and delivery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tracker error types
#[derive(Error, Debug)]
pub enum Error {
    // Event errors
    #[error("Event name is missing in track event data")]
    MissingEventName,

    #[error("Invalid event name passed in track event data: {0}")]
    UnknownEvent(String),

    #[error("Event timestamp is missing in track event data")]
    MissingTimestamp,

    #[error("Invalid {kind}: {reason}")]
    InvalidDescriptor { kind: &'static str, reason: String },

    #[error("{0}")]
    RuleRejected(String),

    // Delivery errors
    #[error("Invalid collection URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Collection server responded with status {status}")]
    HttpStatus { status: u16 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a descriptor validation error
    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidDescriptor {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if a delivery attempt failing with this error may succeed later
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::HttpStatus { status } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MissingEventName => "MISSING_EVENT_NAME",
            Error::UnknownEvent(_) => "UNKNOWN_EVENT",
            Error::MissingTimestamp => "MISSING_TIMESTAMP",
            Error::InvalidDescriptor { .. } => "INVALID_DESCRIPTOR",
            Error::RuleRejected(_) => "RULE_REJECTED",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Network(_) => "NETWORK",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MissingTimestamp.error_code(), "MISSING_TIMESTAMP");
        assert_eq!(
            Error::invalid("AdInfo", "position must be greater than zero").error_code(),
            "INVALID_DESCRIPTOR"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::HttpStatus { status: 503 }.is_recoverable());
        assert!(!Error::HttpStatus { status: 404 }.is_recoverable());
        assert!(!Error::RuleRejected("nope".into()).is_recoverable());
    }

    #[test]
    fn test_descriptor_message() {
        let err = Error::invalid("StateInfo", "state name cannot be empty");
        assert_eq!(err.to_string(), "Invalid StateInfo: state name cannot be empty");
    }
}
