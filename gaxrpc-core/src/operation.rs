//! Wire shapes for long-running operations.
//!
//! A long-running operation is a server-tracked job identified by an opaque
//! name. The server reports its state as an [`OperationSnapshot`]; clients
//! fetch fresh snapshots with a [`GetOperationRequest`].

use serde::{Deserialize, Serialize};

use crate::Status;

/// Request for the current state of a named operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOperationRequest {
    pub name: String,
}

impl GetOperationRequest {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

/// Terminal payload of a completed operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome<T> {
    /// The operation succeeded with this response.
    Response(T),
    /// The operation failed. This is data reported by the server, not a
    /// transport fault.
    Error(Status),
}

/// The server-reported state of an operation at one point in time.
///
/// `outcome` is only meaningful when `done` is true.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot<T> {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome<T>>,
    /// Service-specific progress metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl<T> OperationSnapshot<T> {
    /// A snapshot of an operation that is still running.
    pub fn running<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            done: false,
            outcome: None,
            metadata: None,
        }
    }

    /// A snapshot of an operation that completed successfully.
    pub fn succeeded<S: Into<String>>(name: S, response: T) -> Self {
        Self {
            name: name.into(),
            done: true,
            outcome: Some(OperationOutcome::Response(response)),
            metadata: None,
        }
    }

    /// A snapshot of an operation that completed with an error.
    pub fn failed<S: Into<String>>(name: S, status: Status) -> Self {
        Self {
            name: name.into(),
            done: true,
            outcome: Some(OperationOutcome::Error(status)),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
