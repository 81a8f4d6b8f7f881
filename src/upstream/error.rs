//! Errors raised by the wrapped client and their classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code carried by an error whose call was aborted before it settled.
pub const ABORTED_CODE: &str = "ABORT_ERR";

/// Behaviour the middleware needs from a backend error.
///
/// Wrapped calls hand the error back to the caller untouched; these hooks are
/// only read for metrics and error reports.
pub trait UpstreamFailure: std::error::Error + Send + Sync + 'static {
    /// Provider error code (`PGRST116`, `23505`, `invalid_credentials`, ...).
    fn code(&self) -> Option<&str> {
        None
    }

    /// Whether the call was cancelled rather than failed.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

/// Error shape returned by the relational store, its auth service and its
/// object storage.
///
/// Displays as its message alone.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct UpstreamError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::new(message)
        }
    }

    pub fn aborted() -> Self {
        Self::with_code(ABORTED_CODE, "The operation was aborted")
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl UpstreamFailure for UpstreamError {
    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn is_cancelled(&self) -> bool {
        self.code.as_deref() == Some(ABORTED_CODE)
    }
}

/// Coarse error classes used to label error metrics and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Duplicate,
    ForeignKey,
    CheckViolation,
    PermissionDenied,
    Unauthorized,
    InvalidCredentials,
    UndefinedObject,
    Conflict,
    Timeout,
    RateLimited,
    Unavailable,
    Cancelled,
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order.
    pub const ALL: [ErrorCategory; 14] = [
        ErrorCategory::NotFound,
        ErrorCategory::Duplicate,
        ErrorCategory::ForeignKey,
        ErrorCategory::CheckViolation,
        ErrorCategory::PermissionDenied,
        ErrorCategory::Unauthorized,
        ErrorCategory::InvalidCredentials,
        ErrorCategory::UndefinedObject,
        ErrorCategory::Conflict,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimited,
        ErrorCategory::Unavailable,
        ErrorCategory::Cancelled,
        ErrorCategory::Unknown,
    ];

    /// Classify a provider error code. Absent or unrecognised codes are
    /// [`ErrorCategory::Unknown`].
    pub fn from_code(code: Option<&str>) -> Self {
        let Some(code) = code else {
            return Self::Unknown;
        };

        match code {
            // PostgREST
            "PGRST116" => Self::NotFound,
            "PGRST106" | "PGRST200" | "PGRST202" | "PGRST204" | "PGRST205" => {
                Self::UndefinedObject
            }
            "PGRST300" | "PGRST301" | "PGRST302" | "PGRST303" => Self::Unauthorized,
            "PGRST000" | "PGRST001" | "PGRST002" | "PGRST003" => Self::Unavailable,

            // Postgres SQLSTATE
            "23505" => Self::Duplicate,
            "23503" => Self::ForeignKey,
            "23502" | "23514" => Self::CheckViolation,
            "42501" => Self::PermissionDenied,
            "42P01" | "42703" | "42883" => Self::UndefinedObject,
            "40001" | "40P01" => Self::Conflict,
            "57014" => Self::Timeout,
            "53300" | "57P01" | "57P03" | "08006" => Self::Unavailable,

            // Auth service
            "invalid_credentials" => Self::InvalidCredentials,
            "user_already_exists" | "email_exists" => Self::Conflict,
            "bad_jwt" | "no_authorization" | "session_not_found" | "session_expired"
            | "refresh_token_not_found" | "refresh_token_already_used" => Self::Unauthorized,
            "user_not_found" => Self::NotFound,
            "over_request_rate_limit" | "over_email_send_rate_limit" => Self::RateLimited,

            // Storage
            "bucket_not_found" | "object_not_found" => Self::NotFound,
            "resource_already_exists" => Self::Duplicate,

            // HTTP status surfaced as a code
            "401" => Self::Unauthorized,
            "403" => Self::PermissionDenied,
            "404" => Self::NotFound,
            "409" => Self::Conflict,
            "429" => Self::RateLimited,
            "503" => Self::Unavailable,

            ABORTED_CODE => Self::Cancelled,

            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Duplicate => "duplicate",
            Self::ForeignKey => "foreign_key",
            Self::CheckViolation => "check_violation",
            Self::PermissionDenied => "permission_denied",
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredentials => "invalid_credentials",
            Self::UndefinedObject => "undefined_object",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
