//! Error types for Waypoint services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode of the query pipeline
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Retrieval errors (4xxx)
    EmptyResult,

    // Rate limiting (6xxx)
    RateLimited,

    // Store errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    StageTimeout,
    AugmentationError,
    GenerationError,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    Cancelled,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            // Retrieval (4xxx)
            ErrorCode::EmptyResult => 4010,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Store (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::StageTimeout => 8003,
            ErrorCode::AugmentationError => 8007,
            ErrorCode::GenerationError => 8008,
            ErrorCode::CacheError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::Cancelled => 9004,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Retrieval taxonomy
    #[error("{service} unreachable: {message}")]
    Connectivity { service: String, message: String },

    #[error("No qualifying rows from {stage}")]
    EmptyResult { stage: String },

    #[error("Stage {stage} timed out after {timeout_ms}ms")]
    StageTimeout { stage: String, timeout_ms: u64 },

    #[error("Stage {stage} cancelled")]
    Cancelled { stage: String },

    #[error("Context augmentation failed: {message}")]
    Augmentation { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database query failed: {message}")]
    DatabaseQuery { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a connectivity failure against a named collaborator
    pub fn connectivity(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Connectivity {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Connectivity { .. } => ErrorCode::ConnectionError,
            AppError::EmptyResult { .. } => ErrorCode::EmptyResult,
            AppError::StageTimeout { .. } => ErrorCode::StageTimeout,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::Augmentation { .. } => ErrorCode::AugmentationError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseQuery { .. } => ErrorCode::DatabaseError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::EmptyResult { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 499-ish, reported as 408 since the client went away
            AppError::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseQuery { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::Augmentation { .. }
            | AppError::Generation { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Connectivity { .. }
            | AppError::CacheError { .. }
            | AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::StageTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether a retrieval stage failing with this error should hand over to
    /// the next stage of the chain instead of surfacing to the caller
    pub fn advances_chain(&self) -> bool {
        matches!(
            self,
            AppError::Connectivity { .. }
                | AppError::EmptyResult { .. }
                | AppError::StageTimeout { .. }
                | AppError::Database(_)
                | AppError::DatabaseQuery { .. }
                | AppError::EmbeddingError { .. }
                | AppError::HttpClient(_)
                | AppError::ServiceUnavailable { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => AppError::connectivity("primary-store", err.to_string()),
            other => AppError::DatabaseQuery {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::EmptyResult {
            stage: "vector-search".into(),
        };
        assert_eq!(err.code(), ErrorCode::EmptyResult);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code().as_code(), 4010);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "query must not be empty".into(),
            field: Some("query".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_chain_advancing_errors() {
        assert!(AppError::connectivity("primary-store", "refused").advances_chain());
        assert!(AppError::StageTimeout {
            stage: "text-search".into(),
            timeout_ms: 300
        }
        .advances_chain());
        assert!(!AppError::Generation {
            message: "bad json".into()
        }
        .advances_chain());
        assert!(!AppError::Cancelled {
            stage: "fallback-search".into()
        }
        .advances_chain());
    }

    #[test]
    fn test_sqlx_pool_timeout_is_connectivity() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), ErrorCode::ConnectionError);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
