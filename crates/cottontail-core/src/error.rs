//! Error types shared by the routing engine, dispatcher and transports.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::delivery::Signature;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised at the transport boundary.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// The endpoint that was dialled.
        endpoint: String,
        /// Reason for failure.
        reason: String,
    },

    /// The connection was closed while an operation needed it.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The named queue does not exist on the broker.
    #[error("queue '{queue}' not found")]
    QueueNotFound {
        /// The missing queue.
        queue: String,
    },

    /// A message was published to a queue nobody consumes.
    #[error("queue '{queue}' has no consumers")]
    NoConsumers {
        /// The queue without subscriptions.
        queue: String,
    },

    /// The broker refused the subscription.
    #[error("subscribe to '{queue}' failed: {reason}")]
    SubscribeFailed {
        /// The queue being subscribed.
        queue: String,
        /// Reason for failure.
        reason: String,
    },
}

// =============================================================================
// Consume Errors
// =============================================================================

/// Where in the consume pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// A hook registered to run before the handler.
    BeforeConsume,
    /// The resolved route handler.
    Handler,
    /// A hook registered to run after the handler.
    AfterConsume,
}

impl FailurePoint {
    /// Returns a short, log-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeConsume => "before consume hook",
            Self::Handler => "handler",
            Self::AfterConsume => "after consume hook",
        }
    }
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised while consuming one delivery.
///
/// The error is cheap to clone: the same value is handed to error handlers,
/// kept as the consumer's failure and returned to the transport.
#[derive(Debug, Clone, Error)]
pub enum ConsumeError {
    /// A hook or handler returned an error.
    #[error("{point} failed for {signature}: {error:#}")]
    Failed {
        /// Pipeline stage that failed.
        point: FailurePoint,
        /// The delivery being consumed.
        signature: Signature,
        /// The error returned by user code.
        error: Arc<anyhow::Error>,
    },

    /// A hook or handler panicked.
    #[error("{point} panicked for {signature}: {message}")]
    Panicked {
        /// Pipeline stage that panicked.
        point: FailurePoint,
        /// The delivery being consumed.
        signature: Signature,
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl ConsumeError {
    /// Wraps an error returned by user code.
    pub fn failed(point: FailurePoint, signature: Signature, error: anyhow::Error) -> Self {
        Self::Failed {
            point,
            signature,
            error: Arc::new(error),
        }
    }

    /// Records a panic raised by user code.
    pub fn panicked(point: FailurePoint, signature: Signature, message: impl Into<String>) -> Self {
        Self::Panicked {
            point,
            signature,
            message: message.into(),
        }
    }

    /// Returns the pipeline stage that failed.
    pub fn point(&self) -> FailurePoint {
        match self {
            Self::Failed { point, .. } | Self::Panicked { point, .. } => *point,
        }
    }

    /// Returns the signature of the delivery that failed.
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Failed { signature, .. } | Self::Panicked { signature, .. } => signature,
        }
    }

    /// Returns the user error, if the failure was not a panic.
    pub fn user_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Panicked { .. } => None,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for consuming a delivery.
pub type ConsumeResult<T> = Result<T, ConsumeError>;
