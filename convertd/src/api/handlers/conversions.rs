use crate::AppState;
use crate::api::models::ConvertRequest;
use crate::errors::{Error, Result};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};
use scopeguard::defer;
use std::path::Path;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    summary = "Convert an uploaded file",
    description = "Convert a previously uploaded file to the requested target format and \
                   stream the result back. The upload and all scratch files are removed \
                   when the call completes, whether it succeeds or fails.",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Converted file", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Invalid id or unsupported target format", body = crate::errors::ErrorBody),
        (status = 404, description = "Unknown upload id", body = crate::errors::ErrorBody),
        (status = 502, description = "Conversion tool failed", body = crate::errors::ErrorBody),
        (status = 504, description = "Conversion tool timed out", body = crate::errors::ErrorBody)
    )
)]
pub async fn convert_file(State(state): State<AppState>, Json(request): Json<ConvertRequest>) -> Result<Response> {
    let file_id = Uuid::parse_str(&request.file_id).map_err(|_| Error::BadRequest {
        message: "Invalid file ID format".to_string(),
    })?;

    let record = state.store.get(file_id)?;
    let target = crate::classify::normalize_ext(&request.target_format);
    let work_dir = state.store.work_dir(file_id, &target)?;

    // Input and scratch space are removed on every exit path from here on,
    // including conversion failures and timeouts.
    let store = state.store.clone();
    let work_dir_cleanup = work_dir.clone();
    defer! {
        store.remove(file_id);
        let _ = std::fs::remove_dir_all(&work_dir_cleanup);
    }

    let converted = state.dispatcher.convert(&record, &request.target_format, &work_dir).await?;

    // Open the artifact, then let the deferred cleanup unlink it; the open
    // handle keeps the bytes readable until the stream completes, so a
    // disconnecting client cannot strand files either.
    let file = tokio::fs::File::open(&converted.path).await.map_err(crate::store::StoreError::Io)?;
    let size_bytes = file.metadata().await.map(|m| m.len()).ok();

    let download_name = download_filename(&request.filename, &request.target_format);
    let mime_type = mime_guess::from_path(&download_name).first_or_octet_stream();

    tracing::info!(
        %file_id,
        format = %target,
        size_bytes,
        "conversion complete, streaming result"
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type.as_ref())
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{download_name}\""));
    if let Some(size_bytes) = size_bytes {
        builder = builder.header(header::CONTENT_LENGTH, size_bytes);
    }

    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|_| Error::Internal {
            operation: "build download response".to_string(),
        })
}

/// Derive the download filename from the request's filename stem and the
/// requested target extension, stripped of anything that could escape the
/// Content-Disposition header.
fn download_filename(filename: &str, target_format: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("converted");
    let stem: String = stem.chars().filter(|c| !c.is_control() && !matches!(c, '"' | '\\' | '/')).collect();
    let stem = if stem.is_empty() { "converted".to_string() } else { stem };

    let ext = target_format.trim_start_matches('.').to_ascii_lowercase();
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::download_filename;
    use crate::api::models::{ConvertRequest, UploadResponse};
    use crate::errors::ErrorBody;
    use crate::test_utils::{create_test_app, multipart_file, tiny_png};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;
    use uuid::Uuid;

    async fn upload_png(server: &TestServer) -> UploadResponse {
        let response = server.post("/upload").multipart(multipart_file("example.png", tiny_png())).await;
        response.assert_status(StatusCode::OK);
        response.json()
    }

    fn spool_is_empty(root: &std::path::Path) -> bool {
        let uploads = root.join("spool").join("uploads");
        let work = root.join("spool").join("work");
        std::fs::read_dir(uploads).unwrap().count() == 0 && std::fs::read_dir(work).unwrap().count() == 0
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server
            .post("/convert")
            .json(&json!({
                "file_id": Uuid::new_v4().to_string(),
                "filename": "example.png",
                "target_format": "jpg",
            }))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<ErrorBody>().kind, "not_found");
    }

    #[tokio::test]
    async fn malformed_id_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        let response = server
            .post("/convert")
            .json(&json!({
                "file_id": "not-a-uuid",
                "filename": "example.png",
                "target_format": "jpg",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_target_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());
        let upload = upload_png(&server).await;

        let response = server
            .post("/convert")
            .json(&ConvertRequest {
                file_id: upload.file_id.clone(),
                filename: "example.png".to_string(),
                target_format: "mp3".to_string(),
            })
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorBody>().kind, "unsupported_target");

        // Cleanup runs on failure paths too
        assert!(spool_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn same_format_conversion_returns_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());
        let upload = upload_png(&server).await;

        let response = server
            .post("/convert")
            .json(&ConvertRequest {
                file_id: upload.file_id.clone(),
                filename: "example.png".to_string(),
                target_format: "png".to_string(),
            })
            .await;

        response.assert_status(StatusCode::OK);
        assert_eq!(response.header("content-type"), "image/png");
        assert_eq!(response.header("content-disposition"), "attachment; filename=\"example.png\"");

        let bytes = response.as_bytes().to_vec();
        image::load_from_memory_with_format(&bytes, image::ImageFormat::Png).expect("response should be a valid png");

        assert!(spool_is_empty(dir.path()));
    }

    #[test_log::test(tokio::test)]
    async fn png_to_jpg_roundtrip_reclassifies_as_image() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());
        let upload = upload_png(&server).await;
        assert!(upload.suggestions.contains(&"jpg".to_string()));

        let response = server
            .post("/convert")
            .json(&ConvertRequest {
                file_id: upload.file_id.clone(),
                filename: "example.png".to_string(),
                target_format: "jpg".to_string(),
            })
            .await;

        response.assert_status(StatusCode::OK);
        assert_eq!(response.header("content-type"), "image/jpeg");

        let bytes = response.as_bytes().to_vec();
        image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).expect("response should be a valid jpeg");

        // Re-detecting the produced file's category yields image
        let classification = crate::classify::classify("example.jpg").unwrap();
        assert_eq!(classification.category, crate::classify::Category::Image);

        assert!(spool_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn upload_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());
        let upload = upload_png(&server).await;

        let request = ConvertRequest {
            file_id: upload.file_id.clone(),
            filename: "example.png".to_string(),
            target_format: "png".to_string(),
        };

        server.post("/convert").json(&request).await.assert_status(StatusCode::OK);
        // The record was consumed by the first call
        server.post("/convert").json(&request).await.assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn failed_conversion_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _bg) = create_test_app(dir.path());

        // A text file is a valid document upload, but converting it to pdf
        // requires LibreOffice at a bogus path, so the tool invocation fails.
        let response = server.post("/upload").multipart(multipart_file("notes.txt", b"hello".to_vec())).await;
        response.assert_status(StatusCode::OK);
        let upload: UploadResponse = response.json();

        let response = server
            .post("/convert")
            .json(&ConvertRequest {
                file_id: upload.file_id,
                filename: "notes.txt".to_string(),
                target_format: "pdf".to_string(),
            })
            .await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        assert_eq!(response.json::<ErrorBody>().kind, "conversion_failed");
        assert!(spool_is_empty(dir.path()));
    }

    #[test]
    fn download_filename_is_sanitized() {
        assert_eq!(download_filename("report.docx", "pdf"), "report.pdf");
        assert_eq!(download_filename("report.docx", ".PDF"), "report.pdf");
        assert_eq!(download_filename("../../etc/passwd.png", "jpg"), "passwd.jpg");
        assert_eq!(download_filename("we\"ird\".png", "jpg"), "weird.jpg");
        assert_eq!(download_filename("", "jpg"), "converted.jpg");
    }
}
