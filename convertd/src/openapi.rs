//! OpenAPI documentation configuration.
//!
//! The rendered documentation is served at `/docs`, with the raw schema at
//! `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "convertd",
        description = "A self-hostable file conversion service: upload a file, download it in another format."
    ),
    paths(
        crate::api::handlers::uploads::health,
        crate::api::handlers::uploads::upload_file,
        crate::api::handlers::conversions::convert_file,
    ),
    components(schemas(
        crate::api::models::UploadResponse,
        crate::api::models::ConvertRequest,
        crate::classify::Category,
        crate::errors::ErrorBody,
    )),
    tags(
        (name = "convert", description = "Upload and conversion endpoints"),
        (name = "service", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_schema_includes_both_operations() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().expect("schema should serialize");
        assert!(json.contains("/upload"));
        assert!(json.contains("/convert"));
    }
}
