//! Raster image conversions via the `image` crate.
//!
//! Everything except the pdf target is handled in-process. JPEG output
//! flattens alpha first (the encoder only takes RGB), and ICO output is
//! downscaled to the format's 256px ceiling. Image-to-pdf is delegated to
//! LibreOffice, which renders single images onto a page the same way it
//! renders documents.

use super::office::soffice_convert;
use super::{ConvertError, Job, ToolAdapter, run_blocking};
use crate::config::ConvertConfig;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::{Path, PathBuf};

pub struct ImageTool {
    config: ConvertConfig,
}

impl ImageTool {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolAdapter for ImageTool {
    fn name(&self) -> &'static str {
        "image"
    }

    async fn run(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let output = job.output_path();

        if job.target == "pdf" {
            let produced = soffice_convert(&self.config, &job.input, &job.work_dir, "pdf").await?;
            if produced != output {
                tokio::fs::rename(&produced, &output).await?;
            }
            return Ok(output);
        }

        let input = job.input.clone();
        let target = job.target.clone();
        let quality = self.config.jpeg_quality;
        let out = output.clone();

        run_blocking("image", self.config.library_timeout, move || {
            convert_raster(&input, &out, &target, quality)
        })
        .await?;

        Ok(output)
    }
}

fn decode(input: &Path) -> Result<DynamicImage, ConvertError> {
    ImageReader::open(input)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ConvertError::Failed {
            tool: "image",
            detail: format!("could not decode input image: {e}"),
        })
}

fn convert_raster(input: &Path, output: &Path, target: &str, quality: u8) -> Result<(), ConvertError> {
    let img = decode(input)?;

    let encode_err = |e: image::ImageError| ConvertError::Failed {
        tool: "image",
        detail: format!("could not encode {target}: {e}"),
    };

    match target {
        "jpg" => {
            let mut file = std::fs::File::create(output)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, quality);
            encoder.encode_image(&img.to_rgb8()).map_err(encode_err)?;
        }
        "png" => img.save_with_format(output, ImageFormat::Png).map_err(encode_err)?,
        "tiff" => img.save_with_format(output, ImageFormat::Tiff).map_err(encode_err)?,
        "webp" => {
            // The webp encoder only accepts 8-bit RGB/RGBA
            DynamicImage::ImageRgba8(img.to_rgba8())
                .save_with_format(output, ImageFormat::WebP)
                .map_err(encode_err)?;
        }
        "gif" => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .save_with_format(output, ImageFormat::Gif)
                .map_err(encode_err)?;
        }
        "bmp" => {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .save_with_format(output, ImageFormat::Bmp)
                .map_err(encode_err)?;
        }
        "ico" => {
            // ICO entries max out at 256x256
            let icon = if img.width() > 256 || img.height() > 256 {
                img.thumbnail(256, 256)
            } else {
                img
            };
            DynamicImage::ImageRgba8(icon.to_rgba8())
                .save_with_format(output, ImageFormat::Ico)
                .map_err(encode_err)?;
        }
        other => {
            return Err(ConvertError::Failed {
                tool: "image",
                detail: format!("unexpected raster target {other}"),
            });
        }
    }

    Ok(())
}
