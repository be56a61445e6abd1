//! Format classification.
//!
//! Maps an uploaded filename to a conversion category and the set of target
//! formats that category supports. The extension tables are pure static
//! lookups: the same extension always yields the same category, and an
//! extension outside the tables is a classification failure, never a guess.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use utoipa::ToSchema;

/// Conversion category, determining which tool adapter handles the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Audio,
    Video,
    Spreadsheet,
    Document,
    Presentation,
    Pdf,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Spreadsheet => "spreadsheet",
            Category::Document => "document",
            Category::Presentation => "presentation",
            Category::Pdf => "pdf",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized file extension.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized file extension {extension:?}")]
pub struct ClassifyError {
    pub extension: String,
}

/// Result of classifying an uploaded filename.
#[derive(Debug, Clone)]
pub struct Classification {
    pub category: Category,
    pub mime_type: String,
    /// Valid target formats, excluding the source's own format
    pub suggestions: Vec<String>,
}

/// Source extension to category. Pure static lookup.
pub fn category_for_ext(ext: &str) -> Option<Category> {
    let category = match ext {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "tiff" | "tif" | "bmp" => Category::Image,
        "mp3" | "wav" | "ogg" | "flac" | "aac" | "m4a" | "wma" => Category::Audio,
        "mp4" | "webm" | "avi" | "mov" | "mkv" | "wmv" | "flv" => Category::Video,
        "csv" | "xlsx" | "xls" => Category::Spreadsheet,
        "docx" | "doc" | "txt" | "odt" => Category::Document,
        "pptx" | "ppt" | "odp" => Category::Presentation,
        "pdf" => Category::Pdf,
        _ => return None,
    };
    Some(category)
}

/// Valid target formats per category. Aliases (`jpeg`, `tif`) are accepted on
/// input via [`normalize_ext`] and do not appear in the tables themselves.
pub fn targets_for(category: Category) -> &'static [&'static str] {
    match category {
        Category::Image => &["png", "jpg", "webp", "pdf", "tiff", "bmp", "gif", "ico"],
        Category::Audio => &["mp3", "wav", "ogg", "flac", "aac", "m4a"],
        Category::Video => &["mp4", "webm", "gif", "avi", "mov", "mkv"],
        Category::Spreadsheet => &["csv", "xlsx", "xls", "pdf"],
        Category::Document => &["pdf", "txt", "odt", "docx", "html", "rtf"],
        Category::Presentation => &["pdf", "pptx", "odp"],
        Category::Pdf => &["png", "jpg", "webp", "txt"],
    }
}

/// Lowercase, strip a leading dot, and fold extension aliases.
pub fn normalize_ext(ext: &str) -> String {
    let clean = ext.trim_start_matches('.').to_ascii_lowercase();
    match clean.as_str() {
        "jpeg" => "jpg".to_string(),
        "tif" => "tiff".to_string(),
        _ => clean,
    }
}

/// Extract the (lowercased, un-normalized) extension from a filename.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Classify a filename into a category, MIME type, and suggested targets.
pub fn classify(filename: &str) -> Result<Classification, ClassifyError> {
    let ext = file_extension(filename);
    let Some(category) = category_for_ext(&ext) else {
        return Err(ClassifyError { extension: ext });
    };

    let source = normalize_ext(&ext);
    let suggestions = targets_for(category)
        .iter()
        .filter(|target| normalize_ext(target) != source)
        .map(|target| target.to_string())
        .collect();

    let mime_type = mime_guess::from_path(filename).first_or_octet_stream().essence_str().to_string();

    Ok(Classification {
        category,
        mime_type,
        suggestions,
    })
}
