//! Error types for the serving simulation

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing or serving a work unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Routing Errors
    // =========================================================================
    /// Every routing candidate is marked down or over its health threshold
    #[error("No healthy server available")]
    NoHealthyServer,

    /// Soft admission rejection from a saturated node
    #[error("Server {server} is overloaded")]
    Overloaded { server: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Write issued against a non-primary instance
    #[error("Write not allowed on non-primary database {server}")]
    WriteNotAllowed { server: String },

    /// The database set has no primary instance
    #[error("No primary database configured")]
    NoPrimary,

    /// The database set is empty
    #[error("No database instance available")]
    NoDatabase,

    /// Best-effort replication of a key did not reach a replica
    #[error("Replication of key {key} to {replica} failed")]
    ReplicationFailed { replica: String, key: String },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable short label used for metric names and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoHealthyServer => "no_healthy_server",
            Error::Overloaded { .. } => "overloaded",
            Error::WriteNotAllowed { .. } => "write_not_allowed",
            Error::NoPrimary => "no_primary",
            Error::NoDatabase => "no_database",
            Error::ReplicationFailed { .. } => "replication_failed",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Overloaded {
            server: "web-1".to_string(),
        };
        assert_eq!(err.to_string(), "Server web-1 is overloaded");
        assert_eq!(Error::NoHealthyServer.to_string(), "No healthy server available");
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::NoHealthyServer.kind(), "no_healthy_server");
        assert_eq!(
            Error::WriteNotAllowed {
                server: "db-replica-1".into()
            }
            .kind(),
            "write_not_allowed"
        );
        assert_eq!(Error::Config("bad".into()).kind(), "config");
    }
}
