//! PDF conversions via poppler utilities.
//!
//! `pdftoppm -singlefile` rasterizes the first page to png or jpeg, and
//! `pdftotext` extracts text. The webp target renders to png first and
//! re-encodes with the image crate, since poppler has no webp output.
//! Depending on the poppler version the jpeg output lands as `.jpg` or
//! `.jpeg`, so both candidates are checked.

use super::{ConvertError, Job, ToolAdapter, run_blocking, run_tool};
use crate::config::ConvertConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub struct PdfTool {
    config: ConvertConfig,
}

impl PdfTool {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Rasterize the first page into `work_dir`, returning the produced file.
    async fn rasterize(&self, input: &Path, work_dir: &Path, format: &str) -> Result<PathBuf, ConvertError> {
        let poppler_format = if format == "jpg" { "jpeg" } else { format };
        let prefix = work_dir.join("page");

        let mut command = Command::new(&self.config.pdftoppm_bin);
        command
            .arg("-r")
            .arg(self.config.pdf_render_dpi.to_string())
            .arg("-singlefile")
            .arg(format!("-{poppler_format}"))
            .arg(input)
            .arg(&prefix);

        run_tool("pdftoppm", command, self.config.poppler_timeout).await?;

        let mut candidates = vec![work_dir.join(format!("page.{format}"))];
        if format == "jpg" {
            candidates.push(work_dir.join("page.jpeg"));
        }
        candidates
            .into_iter()
            .find(|candidate| candidate.exists())
            .ok_or_else(|| ConvertError::Failed {
                tool: "pdftoppm",
                detail: format!("produced no {format} output"),
            })
    }
}

#[async_trait]
impl ToolAdapter for PdfTool {
    fn name(&self) -> &'static str {
        "poppler"
    }

    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let output = job.output_path();

        match job.target.as_str() {
            "png" | "jpg" => {
                let produced = self.rasterize(&job.input, &job.work_dir, &job.target).await?;
                if produced != output {
                    tokio::fs::rename(&produced, &output).await?;
                }
            }
            "webp" => {
                let png = self.rasterize(&job.input, &job.work_dir, "png").await?;
                let out = output.clone();
                run_blocking("image", self.config.library_timeout, move || reencode_webp(&png, &out)).await?;
            }
            "txt" => {
                let mut command = Command::new(&self.config.pdftotext_bin);
                command.arg(&job.input).arg(&output);
                run_tool("pdftotext", command, self.config.poppler_timeout).await?;
            }
            other => {
                return Err(ConvertError::Failed {
                    tool: "poppler",
                    detail: format!("unexpected pdf target {other}"),
                });
            }
        }

        Ok(output)
    }
}

fn reencode_webp(png: &Path, output: &Path) -> Result<(), ConvertError> {
    let img = image::ImageReader::open(png)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ConvertError::Failed {
            tool: "image",
            detail: format!("could not decode rendered page: {e}"),
        })?;

    image::DynamicImage::ImageRgba8(img.to_rgba8())
        .save_with_format(output, image::ImageFormat::WebP)
        .map_err(|e| ConvertError::Failed {
            tool: "image",
            detail: format!("could not encode webp: {e}"),
        })
}
