//! RPC status codes returned by the pipeline and the services.
//!
//! A [`Status`] carries a short message that is safe to show to the caller.
//! Statuses built from internal failures keep the underlying cause separately;
//! it is logged but never returned.

use std::fmt;

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
    Unknown,
    Cancelled,
}

impl Code {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::InvalidArgument => "invalid_argument",
            Code::Unauthenticated => "unauthenticated",
            Code::PermissionDenied => "permission_denied",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::FailedPrecondition => "failed_precondition",
            Code::ResourceExhausted => "resource_exhausted",
            Code::Unavailable => "unavailable",
            Code::Internal => "internal",
            Code::Unknown => "unknown",
            Code::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}{}", with_cause(.cause))]
pub struct Status {
    code: Code,
    message: String,
    cause: Option<String>,
}

impl Status {
    /// A status whose message is meant for the caller.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(Code::Cancelled, "request cancelled")
    }

    /// Server-side failure. The caller only sees `message`; `cause` goes to the logs.
    #[must_use]
    pub fn internal(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            code: Code::Internal,
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Store or peer failure the core cannot classify.
    #[must_use]
    pub fn unknown(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            code: Code::Unknown,
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

fn with_cause(cause: &Option<String>) -> String {
    cause
        .as_deref()
        .map(|cause| format!(" ({cause})"))
        .unwrap_or_default()
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::UniqueViolation => Status::already_exists("resource already exists"),
            Error::NotFound => Status::not_found("resource not found"),
            Error::Database(e) => Status::unknown("storage failure", e),
            other => Status::internal("internal error", other),
        }
    }
}

/// Attach a caller-facing message to a store result.
pub trait StoreResultExt<T> {
    fn status(self, message: &'static str) -> Result<T, Status>;
}

impl<T> StoreResultExt<T> for crate::error::Result<T> {
    fn status(self, message: &'static str) -> Result<T, Status> {
        self.map_err(|e| match e {
            Error::Database(cause) => Status::unknown(message, cause),
            Error::UniqueViolation => Status::already_exists(message),
            Error::NotFound => Status::not_found(message),
            other => Status::internal(message, other),
        })
    }
}

/// Turn a missing row into a `NotFound` status.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, Status>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, Status> {
        self.ok_or_else(|| Status::not_found(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_status_hides_cause_from_message() {
        let status = Status::internal("failed to load profile", "disk on fire");
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "failed to load profile");
        assert_eq!(status.cause(), Some("disk on fire"));
        assert_eq!(
            status.to_string(),
            "internal: failed to load profile (disk on fire)"
        );
        assert_eq!(
            Status::not_found("profile not found").to_string(),
            "not_found: profile not found"
        );
    }

    #[test]
    fn test_unique_violation_maps_to_already_exists() {
        let status = Status::from(Error::UniqueViolation);
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn test_store_result_ext_keeps_message() {
        let result: crate::error::Result<()> = Err(Error::Internal("boom".into()));
        let status = result.status("failed to list profiles").unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "failed to list profiles");
    }
}
