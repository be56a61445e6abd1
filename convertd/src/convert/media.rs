//! Audio and video transcoding via ffmpeg.
//!
//! ffmpeg infers both codecs from the file extensions, so the invocation is
//! a single `-i input output`. Container/codec selection, bitrates, and
//! everything else stay at ffmpeg's defaults.

use super::{ConvertError, Job, ToolAdapter, run_tool};
use crate::config::ConvertConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

pub struct MediaTool {
    config: ConvertConfig,
}

impl MediaTool {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolAdapter for MediaTool {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let output = job.output_path();

        let mut command = Command::new(&self.config.ffmpeg_bin);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-i")
            .arg(&job.input)
            .arg(&output);

        run_tool("ffmpeg", command, self.config.media_timeout).await?;
        Ok(output)
    }
}
