use std::time::Duration;

/// Errors that can occur in worker operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fabriq_transport::TransportError),

    /// Envelope-level error.
    #[error("envelope error: {0}")]
    Envelope(#[from] fabriq_envelope::EnvelopeError),

    /// Identity material could not be loaded or generated.
    #[error("identity error: {0}")]
    Identity(#[from] fabriq_transport::IdentityError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A received message does not follow the protocol.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error outside the transport layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
