//! Request/response data structures for API communication.

use crate::classify::Category;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response to a successful upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Opaque token referencing the stored upload
    pub file_id: String,
    /// Original filename as sent by the client
    pub filename: String,
    pub category: Category,
    pub mime_type: String,
    /// Target formats this upload can be converted to
    pub suggestions: Vec<String>,
}

/// Request body for `POST /convert`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConvertRequest {
    /// Upload id returned by `POST /upload`
    pub file_id: String,
    /// Original filename, used to derive the download filename
    pub filename: String,
    /// Requested target format, with or without a leading dot
    pub target_format: String,
}
