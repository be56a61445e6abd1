//! Spreadsheet conversions.
//!
//! Excel workbooks are read with calamine and written out as CSV in-process
//! (first worksheet only, matching how a dataframe round-trip flattens a
//! workbook). Targets that need a real spreadsheet or page renderer
//! (xlsx, xls, pdf) are delegated to LibreOffice.

use super::office::soffice_convert;
use super::{ConvertError, Job, ToolAdapter, run_blocking};
use crate::config::ConvertConfig;
use async_trait::async_trait;
use calamine::Reader;
use std::path::{Path, PathBuf};

pub struct SheetTool {
    config: ConvertConfig,
}

impl SheetTool {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolAdapter for SheetTool {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let output = job.output_path();

        match job.target.as_str() {
            "csv" => {
                let input = job.input.clone();
                let out = output.clone();
                run_blocking("spreadsheet", self.config.library_timeout, move || workbook_to_csv(&input, &out)).await?;
            }
            "xlsx" | "xls" | "pdf" => {
                let produced = soffice_convert(&self.config, &job.input, &job.work_dir, &job.target).await?;
                if produced != output {
                    tokio::fs::rename(&produced, &output).await?;
                }
            }
            other => {
                return Err(ConvertError::Failed {
                    tool: "spreadsheet",
                    detail: format!("unexpected spreadsheet target {other}"),
                });
            }
        }

        Ok(output)
    }
}

fn workbook_to_csv(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let sheet_err = |detail: String| ConvertError::Failed {
        tool: "spreadsheet",
        detail,
    };

    let mut workbook = calamine::open_workbook_auto(input).map_err(|e| sheet_err(format!("could not open workbook: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| sheet_err("workbook has no worksheets".to_string()))?
        .map_err(|e| sheet_err(format!("could not read worksheet: {e}")))?;

    let mut writer = csv::Writer::from_path(output).map_err(|e| sheet_err(format!("could not create csv output: {e}")))?;
    for row in range.rows() {
        writer
            .write_record(row.iter().map(|cell| cell.to_string()))
            .map_err(|e| sheet_err(format!("could not write csv row: {e}")))?;
    }
    writer.flush()?;

    Ok(())
}
