//! Probe error type.

use std::fmt;

use thiserror::Error;

/// Failure class of a probe operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeErrorKind {
    /// Transport failure reaching the target.
    Network,
    /// Target reachable but the response is malformed.
    Protocol,
    /// Malformed or impossible client configuration.
    Config,
    /// Deadline exceeded.
    Timeout,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Error returned by probe clients.
///
/// Displays as the bare message so collectors can surface it verbatim.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProbeError {
    kind: ProbeErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Result alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Protocol, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Config, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Timeout, message)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ProbeErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ProbeErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_is_bare_message() {
        let err = ProbeError::config("url not set");
        assert_eq!(err.to_string(), "url not set");
        assert_eq!(err.kind(), ProbeErrorKind::Config);
    }

    #[test]
    fn test_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ProbeError::network("connect failed").with_source(io);
        assert!(err.source().is_some());
        assert_eq!(err.kind().to_string(), "network");
    }
}
