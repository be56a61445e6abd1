//! Document and presentation rendering via headless LibreOffice.
//!
//! LibreOffice names its output after the input stem and refuses to share a
//! user profile between concurrent instances, so each invocation gets a
//! private `UserInstallation` inside the job's scratch directory and the
//! produced file is relocated to the canonical output path afterwards.

use super::{ConvertError, Job, ToolAdapter, run_tool};
use crate::config::ConvertConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub struct OfficeTool {
    config: ConvertConfig,
}

impl OfficeTool {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolAdapter for OfficeTool {
    fn name(&self) -> &'static str {
        "libreoffice"
    }

    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let produced = soffice_convert(&self.config, &job.input, &job.work_dir, &job.target).await?;

        let output = job.output_path();
        if produced != output {
            tokio::fs::rename(&produced, &output).await?;
        }
        Ok(output)
    }
}

/// Run `libreoffice --headless --convert-to <format>` with an isolated
/// profile, returning the path of the produced file. Shared with the image
/// and spreadsheet adapters, which delegate some targets to LibreOffice.
pub(crate) async fn soffice_convert(
    config: &ConvertConfig,
    input: &Path,
    work_dir: &Path,
    format: &str,
) -> Result<PathBuf, ConvertError> {
    let profile = work_dir.join(".soffice-profile");
    tokio::fs::create_dir_all(&profile).await?;

    let mut command = Command::new(&config.libreoffice_bin);
    command
        .arg("--headless")
        .arg(format!("-env:UserInstallation=file://{}", profile.display()))
        .arg("--convert-to")
        .arg(format)
        .arg("--outdir")
        .arg(work_dir)
        .arg(input);

    run_tool("libreoffice", command, config.office_timeout).await?;

    // LibreOffice names output after the input stem
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ConvertError::Failed {
            tool: "libreoffice",
            detail: "input file has no usable name".to_string(),
        })?;
    let expected = work_dir.join(format!("{stem}.{format}"));

    if !expected.exists() {
        return Err(ConvertError::Failed {
            tool: "libreoffice",
            detail: format!("produced no {format} output"),
        });
    }

    Ok(expected)
}
