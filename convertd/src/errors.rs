use crate::classify::ClassifyError;
use crate::convert::ConvertError;
use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Upload with an unrecognized file extension
    #[error(transparent)]
    Classification(#[from] ClassifyError),

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Upload exceeds the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Temporary store error (unknown id, disk failure)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Conversion error (unsupported target, tool failure, timeout)
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Wire format for failure responses: a machine-readable kind plus a
/// human-readable message.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Classification(_) => StatusCode::BAD_REQUEST,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Store(store_err) => match store_err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Convert(convert_err) => match convert_err {
                ConvertError::UnsupportedTarget { .. } => StatusCode::BAD_REQUEST,
                ConvertError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ConvertError::Failed { .. } => StatusCode::BAD_GATEWAY,
                ConvertError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind, stable across releases
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Classification(_) => "classification_failed",
            Error::BadRequest { .. } => "bad_request",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Store(StoreError::NotFound(_)) => "not_found",
            Error::Store(StoreError::Io(_)) => "storage_error",
            Error::Convert(ConvertError::UnsupportedTarget { .. }) => "unsupported_target",
            Error::Convert(ConvertError::Timeout { .. }) => "conversion_timeout",
            Error::Convert(ConvertError::Failed { .. }) => "conversion_failed",
            Error::Convert(ConvertError::Io(_)) => "conversion_failed",
            Error::Internal { .. } => "internal",
            Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Classification(e) => e.to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::PayloadTooLarge { message } => message.clone(),
            Error::Store(StoreError::NotFound(id)) => format!("Upload {id} not found"),
            Error::Store(StoreError::Io(_)) => "Storage failure".to_string(),
            Error::Convert(ConvertError::Io(_)) => "Conversion failed".to_string(),
            Error::Convert(e) => e.to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Store(StoreError::Io(_)) | Error::Convert(ConvertError::Io(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Convert(ConvertError::Timeout { .. }) | Error::Convert(ConvertError::Failed { .. }) => {
                tracing::warn!("Conversion error: {}", self);
            }
            Error::Classification(_)
            | Error::BadRequest { .. }
            | Error::PayloadTooLarge { .. }
            | Error::Store(StoreError::NotFound(_))
            | Error::Convert(ConvertError::UnsupportedTarget { .. }) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            kind: self.kind().to_string(),
            message: self.user_message(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
