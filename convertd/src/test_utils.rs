//! Test utilities for handler and application tests.

use crate::config::Config;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use std::path::Path;
use std::time::Duration;

/// Config rooted in a test-owned directory, with external tool binaries
/// pointed nowhere so tests never invoke whatever happens to be installed
/// on the host. In-process conversions (image, spreadsheet) still work.
pub fn create_test_config(root: &Path) -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Config::default()
    };
    config.store.root = root.join("spool");
    config.store.retention = Duration::from_secs(3600);
    config.store.sweep_interval = Duration::from_secs(3600);
    config.convert.ffmpeg_bin = "/nonexistent/ffmpeg".to_string();
    config.convert.libreoffice_bin = "/nonexistent/libreoffice".to_string();
    config.convert.pdftoppm_bin = "/nonexistent/pdftoppm".to_string();
    config.convert.pdftotext_bin = "/nonexistent/pdftotext".to_string();
    config
}

pub fn create_test_app(root: &Path) -> (TestServer, crate::BackgroundServices) {
    create_test_app_with(root, |_| {})
}

pub fn create_test_app_with(root: &Path, customize: impl FnOnce(&mut Config)) -> (TestServer, crate::BackgroundServices) {
    let mut config = create_test_config(root);
    customize(&mut config);
    let app = crate::Application::new(config).expect("Failed to create application");
    app.into_test_server()
}

/// A small but real PNG, generated in memory.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 60, 60, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).expect("png encode");
    buf.into_inner()
}

/// Multipart form with a single `file` field.
pub fn multipart_file(filename: &str, bytes: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(bytes).file_name(filename.to_string()).mime_type("application/octet-stream"),
    )
}
