use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;

/// Normalized error codes shared by every backend.
///
/// Driver-native errors are mapped onto this closed set so callers can
/// branch on the code without knowing which backend produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionLost,
    AuthenticationFailed,
    Timeout,
    PoolExhausted,
    DuplicateKey,
    ValidationError,
    CollectionNotFound,
    QueryError,
    GuardrailBlocked,
    UnknownOperator,
    SchemaMismatch,
    UnsupportedOperation,
    InternalError,
}

impl ErrorCode {
    /// Whether an operation failing with this code may succeed on retry.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed | Self::ConnectionLost | Self::Timeout | Self::PoolExhausted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::CollectionNotFound => "COLLECTION_NOT_FOUND",
            Self::QueryError => "QUERY_ERROR",
            Self::GuardrailBlocked => "GUARDRAIL_BLOCKED",
            Self::UnknownOperator => "UNKNOWN_OPERATOR",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database operation error.
///
/// Every failure in the layer surfaces as this type: a normalized code, a
/// single-sentence message, and an actionable fix. The driver-native error
/// is kept as the source for diagnostics but never rendered into
/// caller-visible text.
#[derive(Debug, Error)]
#[error("{message} Fix: {fix}")]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
    /// Actionable remediation: an alternate API, an example invocation, a
    /// confirmation token, or an enumeration of valid fields/operators.
    pub fix: String,
    pub backend: Option<BackendKind>,
    pub collection: Option<String>,
    pub operation: Option<String>,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fix: fix.into(),
            backend: None,
            collection: None,
            operation: None,
            retryable: code.is_retryable(),
            timestamp: Utc::now(),
            source: None,
        }
    }

    pub fn connection_failed(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message, fix)
    }

    pub fn connection_lost(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionLost, message, fix)
    }

    pub fn query_error(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryError, message, fix)
    }

    pub fn validation_error(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message, fix)
    }

    pub fn guardrail_blocked(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::GuardrailBlocked, message, fix)
    }

    pub fn unknown_operator(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownOperator, message, fix)
    }

    pub fn unsupported_operation(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedOperation, message, fix)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalError,
            message,
            "This is a bug in the access layer; please report it with the failing operation.",
        )
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_source(mut self, source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }
}
