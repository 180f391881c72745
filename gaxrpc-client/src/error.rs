//! Errors surfaced by the call runtime.
//!
//! Individual attempt failures are reported by transports as a
//! [`Status`](crate::Status) and retried locally; [`CallError`] is what the
//! caller sees once the runtime gives up, is cancelled, or is misused.

use std::time::Duration;

use gaxrpc_core::{Code, Status};

/// Error returned by executor calls, operation polling and duplex writes.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CallError {
    /// The call failed terminally: the last failure was not retryable, no
    /// retry policy was configured, or the retry budget ran out.
    #[error("rpc failed after {attempts} attempt(s) in {elapsed:?}: {status}")]
    RpcFailed {
        status: Status,
        attempts: u32,
        elapsed: Duration,
    },

    /// The caller's cancellation signal fired.
    #[error("call cancelled")]
    Cancelled,

    /// Polling did not observe a completed operation before the poll deadline.
    #[error("operation {name:?} still running after {polls} poll(s) in {elapsed:?}")]
    OperationTimeout {
        name: String,
        polls: u32,
        elapsed: Duration,
    },

    /// A write was issued after the writer was completed.
    #[error("stream write queue is closed")]
    QueueClosed,

    /// A physical stream write failed; the writer is unusable.
    #[error("stream write failed: {0}")]
    WriteFailed(Status),

    /// A policy could not be constructed or is self-contradictory.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CallError {
    pub(crate) fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        CallError::InvalidConfiguration(message.into())
    }

    /// Get the underlying status, if this error wraps one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            CallError::RpcFailed { status, .. } | CallError::WriteFailed(status) => Some(status),
            _ => None,
        }
    }

    /// Get a status code describing this error.
    ///
    /// Wrapped statuses report their own code; the other variants map to:
    /// - Cancelled: `Canceled`
    /// - OperationTimeout: `DeadlineExceeded`
    /// - QueueClosed: `FailedPrecondition`
    /// - InvalidConfiguration: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            CallError::RpcFailed { status, .. } | CallError::WriteFailed(status) => status.code(),
            CallError::Cancelled => Code::Canceled,
            CallError::OperationTimeout { .. } => Code::DeadlineExceeded,
            CallError::QueueClosed => Code::FailedPrecondition,
            CallError::InvalidConfiguration(_) => Code::InvalidArgument,
        }
    }

    /// Number of transport attempts made, for terminal RPC failures.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            CallError::RpcFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }
}
