use crate::AppState;
use crate::api::models::UploadResponse;
use crate::classify;
use crate::errors::{Error, Result};
use axum::{
    Json,
    extract::{Multipart, State},
};
use serde_json::json;

#[utoipa::path(
    get,
    path = "/health",
    tag = "service",
    summary = "Health probe",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

#[utoipa::path(
    post,
    path = "/upload",
    tag = "convert",
    summary = "Upload a file",
    description = "Upload a file for later conversion. The file is classified by extension \
                   and spooled to temporary storage; the response lists the formats it can \
                   be converted to.",
    request_body(content_type = "multipart/form-data", description = "Form with a `file` field"),
    responses(
        (status = 200, description = "File accepted", body = UploadResponse),
        (status = 400, description = "Unrecognized file extension or malformed form", body = crate::errors::ErrorBody),
        (status = 413, description = "File exceeds the configured size limit", body = crate::errors::ErrorBody),
        (status = 500, description = "Storage failure", body = crate::errors::ErrorBody)
    )
)]
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let max_upload_bytes = state.config.limits.max_upload_bytes;
    let mut response: Option<UploadResponse> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let filename = field.file_name().map(|s| s.to_string()).ok_or_else(|| Error::BadRequest {
                    message: "The 'file' field has no filename".to_string(),
                })?;

                // Classify before touching the store: an unrecognized
                // extension must leave no entry behind.
                let classification = classify::classify(&filename)?;

                let mut pending = state
                    .store
                    .begin(&filename, classification.category, &classification.mime_type)
                    .await?;

                tracing::info!(
                    file_id = %pending.id(),
                    filename = %filename,
                    category = %classification.category,
                    "starting upload stream"
                );

                // Stream chunks to the spool, checking the size limit
                // incrementally to fail fast.
                let mut chunk_stream = field;
                while let Some(chunk) = chunk_stream.chunk().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read file chunk: {e}"),
                })? {
                    if pending.size_bytes() + chunk.len() as u64 > max_upload_bytes {
                        tracing::warn!(
                            file_id = %pending.id(),
                            max_upload_bytes,
                            "upload exceeds size limit, aborting"
                        );
                        // Dropping `pending` removes the partial spool file
                        return Err(Error::PayloadTooLarge {
                            message: format!(
                                "File size exceeds maximum allowed size of {} bytes ({} MB)",
                                max_upload_bytes,
                                max_upload_bytes / (1024 * 1024)
                            ),
                        });
                    }
                    pending.write(&chunk).await?;
                }

                if pending.size_bytes() == 0 {
                    return Err(Error::BadRequest {
                        message: "File cannot be empty".to_string(),
                    });
                }

                let record = pending.finish().await?;

                tracing::info!(
                    file_id = %record.id,
                    size_bytes = record.size_bytes,
                    "upload spooled"
                );

                response = Some(UploadResponse {
                    file_id: record.id.to_string(),
                    filename: record.filename,
                    category: record.category,
                    mime_type: record.mime_type,
                    suggestions: classification.suggestions,
                });
            }
            _ => {
                // Ignore unknown fields (forward compatibility)
            }
        }
    }

    let response = response.ok_or_else(|| Error::BadRequest {
        message: "Missing required field: 'file'".to_string(),
    })?;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::api::models::UploadResponse;
    use crate::errors::ErrorBody;
    use crate::test_utils::{create_test_app, create_test_app_with, multipart_file, tiny_png};
    use axum::http::StatusCode;
    use uuid::Uuid;

    #[tokio::test]
    async fn upload_png_classifies_and_spools() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server.post("/upload").multipart(multipart_file("example.png", tiny_png())).await;
        response.assert_status(StatusCode::OK);

        let body: UploadResponse = response.json();
        assert!(Uuid::parse_str(&body.file_id).is_ok());
        assert_eq!(body.filename, "example.png");
        assert_eq!(body.category, crate::classify::Category::Image);
        assert_eq!(body.mime_type, "image/png");
        assert!(body.suggestions.contains(&"jpg".to_string()));
        assert!(!body.suggestions.contains(&"png".to_string()));

        // One spooled file, no leftover .part
        let uploads = dir.path().join("spool").join("uploads");
        let names: Vec<String> = std::fs::read_dir(&uploads)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with(&body.file_id));
        assert!(!names[0].ends_with(".part"));
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected_without_a_store_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server.post("/upload").multipart(multipart_file("data.xyz", b"whatever".to_vec())).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: ErrorBody = response.json();
        assert_eq!(body.kind, "classification_failed");

        let uploads = dir.path().join("spool").join("uploads");
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app_with(dir.path(), |config| {
            config.limits.max_upload_bytes = 64;
        });

        let response = server.post("/upload").multipart(multipart_file("big.png", vec![0u8; 4096])).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);

        let body: ErrorBody = response.json();
        assert_eq!(body.kind, "payload_too_large");

        let uploads = dir.path().join("spool").join("uploads");
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server.post("/upload").multipart(multipart_file("empty.png", Vec::new())).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_file_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server
            .post("/upload")
            .multipart(axum_test::multipart::MultipartForm::new().add_text("purpose", "conversion"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_probe_responds() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server.get("/health").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.json::<serde_json::Value>()["ok"], serde_json::json!(true));
    }
}
