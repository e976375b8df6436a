//! Crate-wide error taxonomy (spec §7).
//!
//! Every failure in the system is classified into one of [`ErrorKind`]. The
//! classification drives retry policy (transient vs permanent), HTTP status
//! mapping in the control plane, and whether a `call_failed` notification is
//! emitted. `details` must never carry PII such as raw OTPs (spec §7).

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Stable classification of a failure, shared across the orchestrator,
/// digit capture engine, delivery engine, and control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    IdempotencyConflict,
    RateLimited,
    Suppressed,
    ProviderTransient,
    ProviderPermanent,
    Timeout,
    AdmissionRejected,
    Internal,
}

impl ErrorKind {
    /// Stable code suitable for UI translation tables (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IdempotencyConflict => "idempotency_conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Suppressed => "suppressed",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::ProviderPermanent => "provider_permanent",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AdmissionRejected => "admission_rejected",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status mapping per spec §6.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::IdempotencyConflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Suppressed => 422,
            ErrorKind::ProviderTransient => 503,
            ErrorKind::ProviderPermanent => 422,
            ErrorKind::Timeout => 504,
            ErrorKind::AdmissionRejected => 429,
            ErrorKind::Internal => 500,
        }
    }

    /// Whether an error of this kind should be retried by an internal
    /// worker loop rather than surfaced immediately (spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ProviderTransient | ErrorKind::Timeout)
    }
}

#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn idempotency_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IdempotencyConflict, message)
    }

    pub fn admission_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AdmissionRejected, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn suppressed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Suppressed, message)
    }

    pub fn provider_transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderTransient, message)
    }

    pub fn provider_permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderPermanent, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrchestratorError::new(ErrorKind::NotFound, "row not found"),
            other => OrchestratorError::new(ErrorKind::Internal, other.to_string()),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ErrorKind::ProviderTransient
        } else {
            ErrorKind::ProviderPermanent
        };
        OrchestratorError::new(kind, err.to_string())
    }
}
