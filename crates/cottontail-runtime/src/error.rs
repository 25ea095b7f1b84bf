//! Consumer-level error types.

use cottontail_core::{ConsumeError, TransportError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::hooks::Phase;

/// Errors surfaced by consumer construction and lifecycle operations.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// `start` was called on a consumer without a connector.
    #[error("No transport configured for this consumer")]
    MissingTransport,

    /// The session could not connect or its setup failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A delivery failed and the consumer was stopped.
    #[error(transparent)]
    Consume(#[from] ConsumeError),

    /// An initialize hook failed while building the consumer.
    #[error("{phase} initialize hook failed: {error:#}")]
    Initialize {
        /// Whether a before or after hook failed.
        phase: Phase,
        /// The hook's error.
        error: anyhow::Error,
    },

    /// Signal handlers could not be installed.
    #[error("Failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;
