//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for upload, convert, health, and
//!   the embedded frontend
//! - **[`models`]**: Request/response data structures for API communication
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`;
//! the rendered documentation is served at `/docs`.

pub mod handlers;
pub mod models;
