//! Error and Result types.

use std::io;

use crate::config::ConfigError;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways the dispatcher can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid environment configuration. Fatal at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A failure reported by the database client: connection lost, protocol
    /// error, or an error returned for a statement. Fatal for the owning
    /// session; the supervisor treats it as fatal for the process.
    #[error("driver error: {0}")]
    Driver(Box<str>),

    /// A channel name that is not a plain identifier. `LISTEN` does not
    /// accept bind parameters, so anything outside the whitelist is refused
    /// before any SQL is built.
    #[error("{0:?} is not a valid notification channel name")]
    InvalidChannel(Box<str>),

    /// An operation was attempted on a session that has already been closed.
    #[error("session is closed")]
    SessionClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn driver(message: impl Into<String>) -> Self {
        Error::Driver(message.into().into_boxed_str())
    }

    /// Process exit code mandated for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Error::Config(ConfigError::Missing("PG_URI")).exit_code(), 1);
        assert_eq!(Error::driver("connection reset").exit_code(), 2);
        assert_eq!(Error::SessionClosed.exit_code(), 2);
    }
}
