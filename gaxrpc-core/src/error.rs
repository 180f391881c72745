//! Status codes and the classified failure type.
//!
//! Transports report a failed attempt as a [`Status`]: a canonical [`Code`],
//! an optional human-readable message, and optional structured
//! [`ErrorDetail`]s. The same type describes the failure payload of a
//! long-running operation that completed unsuccessfully.

use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical RPC status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok = 0,
    #[serde(alias = "cancelled")]
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// All codes, in numeric order.
    pub const ALL: [Code; 17] = [
        Code::Ok,
        Code::Canceled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Get the snake_case name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code: {0:?}")]
pub struct ParseCodeError(String);

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "cancelled" {
            return Ok(Code::Canceled);
        }
        Code::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| ParseCodeError(s.to_owned()))
    }
}

/// A self-describing error detail.
///
/// Serialized as `{"type": "<type name>", "value": "<unpadded base64>"}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    type_url: String,
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail with a type URL and encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Get the fully-qualified type name.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Get the encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorDetailBody {
    #[serde(rename = "type")]
    type_name: String,
    value: String,
}

impl Serialize for ErrorDetail {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let type_name = self
            .type_url
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_url);
        ErrorDetailBody {
            type_name: type_name.to_owned(),
            value: base64::engine::general_purpose::STANDARD_NO_PAD.encode(&self.value),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ErrorDetail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let body = ErrorDetailBody::deserialize(deserializer)?;
        // Accept both padded and unpadded input.
        let trimmed = body.value.trim_end_matches('=');
        let value = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(trimmed)
            .map_err(serde::de::Error::custom)?;
        Ok(ErrorDetail::new(body.type_name, value))
    }
}

/// The classified outcome of a failed RPC attempt.
///
/// # Example
///
/// ```
/// use gaxrpc_core::{Code, Status};
///
/// let status = Status::unavailable("backend restarting");
/// assert_eq!(status.code(), Code::Unavailable);
/// assert_eq!(status.to_string(), "unavailable: backend restarting");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: Code,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    details: Vec<ErrorDetail>,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: vec![],
        }
    }

    /// Create a new status with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: vec![],
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Attach an error detail.
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_from_str() {
        assert_eq!("ok".parse(), Ok(Code::Ok));
        assert_eq!("deadline_exceeded".parse(), Ok(Code::DeadlineExceeded));
        assert_eq!("canceled".parse(), Ok(Code::Canceled));
        assert_eq!("cancelled".parse(), Ok(Code::Canceled));
        assert!("bogus".parse::<Code>().is_err());
    }

    #[test]
    fn test_code_round_trips_through_as_str() {
        for code in Code::ALL {
            assert_eq!(code.as_str().parse::<Code>(), Ok(code));
        }
    }

    #[test]
    fn test_error_detail_serialize_strips_prefix() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.RetryInfo", vec![1, 2, 3]);
        let parsed = serde_json::to_value(&detail).unwrap();

        assert_eq!(parsed["type"], "google.rpc.RetryInfo");
        assert_eq!(parsed["value"], "AQID");
    }

    #[test]
    fn test_error_detail_deserialize_accepts_padding() {
        let detail: ErrorDetail =
            serde_json::from_str(r#"{"type":"test.Type","value":"AQI="}"#).unwrap();
        assert_eq!(detail.type_url(), "test.Type");
        assert_eq!(detail.value(), &[1, 2]);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            Status::not_found("resource missing").to_string(),
            "not_found: resource missing"
        );
        assert_eq!(Status::from_code(Code::Internal).to_string(), "internal");
    }

    #[test]
    fn test_status_json() {
        let status = Status::permission_denied("no access")
            .with_detail(ErrorDetail::new("google.rpc.ErrorInfo", vec![7]));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["code"], "permission_denied");
        assert_eq!(json["message"], "no access");
        assert_eq!(json["details"][0]["type"], "google.rpc.ErrorInfo");

        let parsed: Status = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_status_json_minimal() {
        let status: Status = serde_json::from_str(r#"{"code":"cancelled"}"#).unwrap();
        assert_eq!(status.code(), Code::Canceled);
        assert!(status.message().is_none());
        assert!(status.details().is_empty());
    }
}
