//! Conversion dispatch.
//!
//! One tool adapter per category family: the `image` crate for raster
//! images, ffmpeg for audio/video, LibreOffice for documents and
//! presentations, calamine/csv (with LibreOffice delegation) for
//! spreadsheets, and poppler for PDFs. The dispatcher validates the target
//! against the category's format table before any tool runs, short-circuits
//! same-format requests to a plain copy, and verifies the adapter actually
//! produced output.
//!
//! Every subprocess goes through [`run_tool`], which bounds the invocation
//! with a timeout and kills the child if it is exceeded, and every
//! in-process codec goes through [`run_blocking`] so decoding never runs on
//! the request path.

mod image;
mod media;
mod office;
mod pdf;
mod sheet;

use crate::classify::{Category, normalize_ext, targets_for};
use crate::config::ConvertConfig;
use crate::store::UploadRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

pub use image::ImageTool;
pub use media::MediaTool;
pub use office::OfficeTool;
pub use pdf::PdfTool;
pub use sheet::SheetTool;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("target format .{target} is not supported for {category}")]
    UnsupportedTarget { category: Category, target: String },

    #[error("{tool} did not complete within {}", humantime::format_duration(*.limit))]
    Timeout { tool: &'static str, limit: Duration },

    #[error("{tool} failed: {detail}")]
    Failed { tool: &'static str, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One conversion attempt: an input file, its (normalized) source format,
/// the (normalized) target format, and a scratch directory owned by this
/// attempt alone.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub source_ext: String,
    pub target: String,
    pub work_dir: PathBuf,
}

impl Job {
    /// Canonical output location inside the scratch directory.
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(format!("out.{}", self.target))
    }
}

/// A tool family capable of converting files of one category.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Convert `job.input` into `job.target` format, returning the produced
    /// file path (normally [`Job::output_path`]).
    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError>;
}

/// Successful conversion artifact.
#[derive(Debug)]
pub struct Converted {
    pub path: PathBuf,
}

/// Routes conversion jobs to the adapter owning the upload's category.
pub struct Dispatcher {
    image: ImageTool,
    media: MediaTool,
    office: OfficeTool,
    sheet: SheetTool,
    pdf: PdfTool,
}

impl Dispatcher {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            image: ImageTool::new(config.clone()),
            media: MediaTool::new(config.clone()),
            office: OfficeTool::new(config.clone()),
            sheet: SheetTool::new(config.clone()),
            pdf: PdfTool::new(config),
        }
    }

    fn adapter_for(&self, category: Category) -> &dyn ToolAdapter {
        match category {
            Category::Image => &self.image,
            Category::Audio | Category::Video => &self.media,
            Category::Document | Category::Presentation => &self.office,
            Category::Spreadsheet => &self.sheet,
            Category::Pdf => &self.pdf,
        }
    }

    /// Convert a stored upload into `requested_target` format, writing the
    /// artifact into `work_dir`.
    #[instrument(skip(self, record), fields(id = %record.id, category = %record.category))]
    pub async fn convert(&self, record: &UploadRecord, requested_target: &str, work_dir: &Path) -> Result<Converted, ConvertError> {
        let target = normalize_ext(requested_target);
        let source = normalize_ext(&crate::classify::file_extension(&record.filename));

        let allowed = targets_for(record.category);
        if !allowed.iter().any(|candidate| normalize_ext(candidate) == target) {
            return Err(ConvertError::UnsupportedTarget {
                category: record.category,
                target,
            });
        }

        let job = Job {
            input: record.path.clone(),
            source_ext: source.clone(),
            target: target.clone(),
            work_dir: work_dir.to_path_buf(),
        };

        // Same-format conversion is a well-defined no-op copy.
        if target == source {
            let output = job.output_path();
            tokio::fs::copy(&job.input, &output).await?;
            debug!(format = %target, "same-format request, copied input");
            return Ok(Converted { path: output });
        }

        let adapter = self.adapter_for(record.category);
        let output = adapter.run(&job).await?;

        let metadata = tokio::fs::metadata(&output).await.map_err(|_| ConvertError::Failed {
            tool: adapter.name(),
            detail: "produced no output file".to_string(),
        })?;
        if metadata.len() == 0 {
            return Err(ConvertError::Failed {
                tool: adapter.name(),
                detail: "produced an empty output file".to_string(),
            });
        }

        Ok(Converted { path: output })
    }
}

/// Run an external tool bounded by a timeout.
///
/// The child is spawned with `kill_on_drop`, so exceeding the limit (or the
/// caller going away) reaps the process rather than leaking it. Non-zero
/// exits surface a sanitized stderr tail.
pub(crate) async fn run_tool(tool: &'static str, mut command: Command, limit: Duration) -> Result<(), ConvertError> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    debug!(tool, ?limit, "spawning");
    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvertError::Failed {
                tool,
                detail: format!("{tool} is not installed (executable not found)"),
            }
        } else {
            ConvertError::Failed { tool, detail: e.to_string() }
        }
    })?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Err(_) => return Err(ConvertError::Timeout { tool, limit }),
        Ok(result) => result.map_err(|e| ConvertError::Failed { tool, detail: e.to_string() })?,
    };

    if !output.status.success() {
        return Err(ConvertError::Failed {
            tool,
            detail: sanitize_diagnostics(&output.stderr),
        });
    }

    Ok(())
}

/// Run an in-process conversion on the blocking pool, bounded by a timeout.
pub(crate) async fn run_blocking<F>(tool: &'static str, limit: Duration, work: F) -> Result<(), ConvertError>
where
    F: FnOnce() -> Result<(), ConvertError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, handle).await {
        Err(_) => Err(ConvertError::Timeout { tool, limit }),
        Ok(joined) => joined.map_err(|e| ConvertError::Failed { tool, detail: e.to_string() })?,
    }
}

const MAX_DIAGNOSTIC_BYTES: usize = 500;

/// Keep a bounded tail of tool stderr and redact absolute paths, so
/// diagnostics can be returned to clients without leaking spool locations.
fn sanitize_diagnostics(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();

    let mut tail = trimmed;
    if trimmed.len() > MAX_DIAGNOSTIC_BYTES {
        let cut = trimmed.len() - MAX_DIAGNOSTIC_BYTES;
        let start = trimmed
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= cut)
            .unwrap_or(0);
        tail = &trimmed[start..];
    }

    let redacted: Vec<&str> = tail
        .split_whitespace()
        .map(|token| {
            if token.starts_with('/') || token.starts_with("'/") || token.starts_with("\"/") {
                "<path>"
            } else {
                token
            }
        })
        .collect();

    if redacted.is_empty() {
        "no diagnostic output".to_string()
    } else {
        redacted.join(" ")
    }
}
