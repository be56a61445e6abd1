//! Configuration for the convertd service.
//!
//! Configuration is loaded from a YAML file and environment variables using
//! figment. Environment variables use the `CONVERTD_` prefix and `__` as the
//! nesting separator:
//!
//! ```bash
//! CONVERTD_PORT=9000
//! CONVERTD_LIMITS__MAX_UPLOAD_BYTES=1048576
//! CONVERTD_STORE__RETENTION="30m"
//! CONVERTD_CORS__ORIGIN_REGEX='^https://.*\.example\.com$'
//! ```
//!
//! All fields have defaults, so an empty config file is a valid config file.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CONVERTD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment
/// variables. All fields have sensible defaults defined in the `Default`
/// implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// Temporary store configuration (spool location, retention)
    pub store: StoreConfig,
    /// Conversion tool configuration (binaries, timeouts)
    pub convert: ConvertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors: CorsConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreConfig::default(),
            convert: ConvertConfig::default(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Regex matched against the request origin, in addition to the exact list
    pub origin_regex: Option<String>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                CorsOrigin::Url(Url::parse("http://localhost:8000").unwrap()),
                CorsOrigin::Url(Url::parse("http://127.0.0.1:8000").unwrap()),
                CorsOrigin::Url(Url::parse("http://localhost:5173").unwrap()),
                CorsOrigin::Url(Url::parse("http://127.0.0.1:5173").unwrap()),
            ],
            origin_regex: Some(r"^https://.*\.github\.io$".to_string()),
            allow_credentials: false,
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted upload size in bytes. Checked incrementally while the
    /// multipart body streams in, so oversized uploads are rejected early.
    pub max_upload_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 256 * 1024 * 1024, // 256 MiB
        }
    }
}

/// Temporary store configuration.
///
/// Uploaded files and conversion scratch space live under `root` for the
/// lifetime of the process. Every convert call removes its own files; the
/// retention sweep is the backstop for uploads that are never converted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Spool directory for uploads and conversion scratch space
    pub root: PathBuf,
    /// How long an unconverted upload is kept before the sweep removes it
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Interval between orphan sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("spool"),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Conversion tool configuration.
///
/// Binaries are resolved through `PATH` unless given as absolute paths.
/// Timeouts bound every tool invocation; a tool that exceeds its limit is
/// killed and the request fails with a timeout error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// ffmpeg binary for audio/video transcoding
    pub ffmpeg_bin: String,
    /// LibreOffice binary for document/presentation/spreadsheet rendering
    pub libreoffice_bin: String,
    /// poppler pdftoppm binary for PDF rasterization
    pub pdftoppm_bin: String,
    /// poppler pdftotext binary for PDF text extraction
    pub pdftotext_bin: String,
    /// Timeout for ffmpeg invocations
    #[serde(with = "humantime_serde")]
    pub media_timeout: Duration,
    /// Timeout for LibreOffice invocations
    #[serde(with = "humantime_serde")]
    pub office_timeout: Duration,
    /// Timeout for poppler invocations
    #[serde(with = "humantime_serde")]
    pub poppler_timeout: Duration,
    /// Timeout for in-process conversions (raster images, spreadsheets)
    #[serde(with = "humantime_serde")]
    pub library_timeout: Duration,
    /// Render resolution for PDF page rasterization
    pub pdf_render_dpi: u32,
    /// JPEG encoding quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            libreoffice_bin: "libreoffice".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            pdftotext_bin: "pdftotext".to_string(),
            media_timeout: Duration::from_secs(300),
            office_timeout: Duration::from_secs(120),
            poppler_timeout: Duration::from_secs(60),
            library_timeout: Duration::from_secs(60),
            pdf_render_dpi: 150,
            jpeg_quality: 95,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Build the figment for this config (YAML file overridden by env vars)
    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("CONVERTD_").split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.max_upload_bytes == 0 {
            anyhow::bail!("limits.max_upload_bytes must be greater than zero");
        }

        if self.store.retention.is_zero() {
            anyhow::bail!("store.retention must be greater than zero");
        }

        if self.store.sweep_interval.is_zero() {
            anyhow::bail!("store.sweep_interval must be greater than zero");
        }

        if let Some(pattern) = &self.cors.origin_regex {
            Regex::new(pattern).map_err(|e| anyhow::anyhow!("cors.origin_regex is not a valid regex: {e}"))?;
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if self.cors.allow_credentials && has_wildcard {
            anyhow::bail!("cors.allow_credentials cannot be combined with a wildcard origin");
        }

        if self.convert.jpeg_quality == 0 || self.convert.jpeg_quality > 100 {
            anyhow::bail!("convert.jpeg_quality must be between 1 and 100");
        }

        Ok(())
    }
}
