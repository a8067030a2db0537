//! Error types for dhcpswarm

use thiserror::Error;

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dhcpswarm
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame that could not be decoded into a DHCP message
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// No matching reply arrived within the retry window
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Send or receive failure at the raw socket layer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The raw channel could not be opened without elevated privileges
    #[error("Insufficient privileges: {0}")]
    InsufficientPrivileges(String),

    /// Interface not found
    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    /// Invalid parameter error
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Operation interrupted by the shutdown signal
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Create a malformed-packet error with a custom message
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedPacket(msg.into())
    }

    /// Create a timeout error naming what was being awaited
    pub fn timeout<S: Into<String>>(what: S) -> Self {
        Error::Timeout(what.into())
    }

    /// Create a transport error with a custom message
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Error::Transport(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that abort the whole process rather than one session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InsufficientPrivileges(_) | Error::InterfaceNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors() {
        let err = Error::malformed("short buffer");
        assert!(matches!(err, Error::MalformedPacket(_)));
        assert_eq!(err.to_string(), "Malformed packet: short buffer");

        let err = Error::invalid_parameter("clients", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'clients': must be at least 1"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InsufficientPrivileges("raw socket".into()).is_fatal());
        assert!(Error::InterfaceNotFound("eth9".into()).is_fatal());
        assert!(!Error::timeout("OFFER").is_fatal());
        assert!(!Error::transport("send failed").is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
