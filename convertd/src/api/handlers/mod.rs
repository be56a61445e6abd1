//! HTTP request handlers.
//!
//! - [`uploads`]: multipart upload intake and the health probe
//! - [`conversions`]: the convert-and-download endpoint
//! - [`static_assets`]: embedded frontend serving
//!
//! Handlers return [`crate::errors::Error`], which converts to a JSON
//! `{kind, message}` body with the appropriate HTTP status code.

pub mod conversions;
pub mod static_assets;
pub mod uploads;
