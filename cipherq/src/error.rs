//! Error types for cipherq.

use std::fmt;

use crate::algo::CipherAlg;
use crate::request::CipherRequest;

/// Errors reported by pool, session, and dispatch operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid pool table, scheduler rejection, or an algorithm/mode
    /// pairing the pool cannot serve.
    ConfigurationError(String),
    /// Resource exhaustion while allocating a session or an engine queue.
    AllocationError(String),
    /// Key length outside the accepted set for the algorithm.
    InvalidKeyLength { alg: CipherAlg, got: usize },
    /// Malformed request buffers or an unknown handle.
    InvalidArgument(String),
    /// Context is retired or saturated. Retriable on the sync path.
    DeviceBusy,
    /// Submission queue is at depth. Retriable after draining completions.
    QueueFull,
    /// Engine reported a fatal error. The context involved is retired.
    HardwareFault(String),
    /// No configured context matches the request's mode and direction.
    ContextExhausted,
}

impl Error {
    /// Whether the caller may retry the same request unmodified.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::DeviceBusy | Error::QueueFull)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            Error::AllocationError(msg) => write!(f, "allocation failed: {}", msg),
            Error::InvalidKeyLength { alg, got } => {
                write!(f, "invalid key length {} for {}", got, alg)
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::DeviceBusy => write!(f, "device busy"),
            Error::QueueFull => write!(f, "submission queue full"),
            Error::HardwareFault(msg) => write!(f, "hardware fault: {}", msg),
            Error::ContextExhausted => write!(f, "no eligible context"),
        }
    }
}

impl std::error::Error for Error {}

/// Rejection from [`dispatch_async`](crate::CipherCore::dispatch_async)
/// that hands the request back to the caller for retry or inspection.
#[derive(Debug)]
pub struct SubmitError {
    /// The rejected request, returned untouched.
    pub request: CipherRequest,
    /// Why the submission was rejected.
    pub error: Error,
}

impl SubmitError {
    /// Recover the request for retry.
    pub fn into_request(self) -> CipherRequest {
        self.request
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result type for cipherq operations.
pub type Result<T> = std::result::Result<T, Error>;
