//! Sender-side checks run before a job is submitted.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use printlink_protocol::FileMetadata;

use crate::TransferError;

/// Maximum size of a single file: 25 MiB.
pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Maximum size of all files of one job: 100 MiB.
pub const MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum number of files per job.
pub const MAX_FILES: usize = 10;

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png", "webp", "bmp", "doc", "docx"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// Accepted MIME types: `(mime, canonical extension, display name)`.
const ALLOWED_MIME_TYPES: &[(&str, &str, &str)] = &[
    ("application/pdf", "pdf", "PDF Document"),
    ("image/jpeg", "jpg", "JPEG Image"),
    ("image/jpg", "jpg", "JPEG Image"),
    ("image/png", "png", "PNG Image"),
    ("image/webp", "webp", "WebP Image"),
    ("image/bmp", "bmp", "BMP Image"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
        "Word Document",
    ),
    ("application/msword", "doc", "Word Document (Legacy)"),
];

/// Broad kind of a document, used to pick a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Image,
    Document,
    Unknown,
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileCategory::Pdf => "pdf",
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn mime_entry(mime: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    ALLOWED_MIME_TYPES.iter().find(|(m, _, _)| *m == mime)
}

/// Classifies a file by MIME type, falling back to its extension.
pub fn file_category(name: &str, mime_type: Option<&str>) -> FileCategory {
    let mime = mime_type.unwrap_or_default().to_ascii_lowercase();
    let ext = extension(name);

    if mime == "application/pdf" || ext == "pdf" {
        FileCategory::Pdf
    } else if mime.starts_with("image/") || IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileCategory::Image
    } else if mime.contains("wordprocessingml")
        || mime == "application/msword"
        || ext == "doc"
        || ext == "docx"
    {
        FileCategory::Document
    } else {
        FileCategory::Unknown
    }
}

/// Human-readable type name.
pub fn file_type_name(name: &str, mime_type: Option<&str>) -> &'static str {
    let mime = mime_type.unwrap_or_default().to_ascii_lowercase();
    if let Some((_, _, display)) = mime_entry(&mime) {
        return *display;
    }
    match file_category(name, mime_type) {
        FileCategory::Pdf => "PDF Document",
        FileCategory::Image => "Image",
        FileCategory::Document => "Word Document",
        FileCategory::Unknown => "Unknown",
    }
}

/// Formats a byte count as `"1.5 MB"`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

/// Outcome of checking one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValidation {
    pub category: FileCategory,
    pub errors: Vec<String>,
}

impl FileValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks size, type, and that the extension agrees with the MIME type.
pub fn validate_file(file: &FileMetadata) -> FileValidation {
    let mut errors = Vec::new();
    let name = &file.name;

    if file.size > MAX_FILE_SIZE {
        errors.push(format!(
            "File \"{name}\" exceeds maximum size of {}MB",
            MAX_FILE_SIZE / (1024 * 1024)
        ));
    }

    if let Err(e) = validate_staging_path(name) {
        errors.push(e.to_string());
    }

    let mime = file.mime_type.as_deref().unwrap_or_default().to_ascii_lowercase();
    let ext = extension(name);
    match mime_entry(&mime) {
        None if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {
            errors.push(format!(
                "File \"{name}\" has unsupported format. Allowed: PDF, DOCX, Images (JPG, PNG, WebP, BMP)"
            ));
        }
        None => {}
        Some((_, expected, _)) => {
            let jpeg_alias = *expected == "jpg" && ext == "jpeg";
            let any_image = mime.starts_with("image/") && IMAGE_EXTENSIONS.contains(&ext.as_str());
            if ext != *expected && !jpeg_alias && !any_image {
                errors.push(format!("File \"{name}\" extension doesn't match its type"));
            }
        }
    }

    FileValidation {
        category: file_category(name, file.mime_type.as_deref()),
        errors,
    }
}

/// Outcome of checking all files of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesValidation {
    pub errors: Vec<String>,
    pub total_size: u64,
    pub valid_files: usize,
}

impl FilesValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the total size, or every problem found.
    pub fn into_result(self) -> Result<u64, TransferError> {
        if self.errors.is_empty() {
            Ok(self.total_size)
        } else {
            Err(TransferError::Rejected(self.errors))
        }
    }
}

/// Checks every file plus the per-job count and total size limits.
pub fn validate_files(files: &[FileMetadata]) -> FilesValidation {
    if files.is_empty() {
        return FilesValidation {
            errors: vec!["No files selected".to_string()],
            total_size: 0,
            valid_files: 0,
        };
    }

    let mut errors = Vec::new();
    let mut total_size = 0u64;
    let mut valid_files = 0;

    if files.len() > MAX_FILES {
        errors.push(format!("At most {MAX_FILES} files can be sent in one job"));
    }

    for file in files {
        total_size += file.size;
        let result = validate_file(file);
        if result.is_valid() {
            valid_files += 1;
        } else {
            errors.extend(result.errors);
        }
    }

    if total_size > MAX_TOTAL_SIZE {
        errors.push(format!(
            "Total file size exceeds {}MB limit",
            MAX_TOTAL_SIZE / (1024 * 1024)
        ));
    }

    FilesValidation {
        errors,
        total_size,
        valid_files,
    }
}

/// Validates that a file name can be used under a job's staging prefix.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_staging_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_protocol::PrintSpec;

    fn file(name: &str, size: u64, mime: Option<&str>) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            size,
            mime_type: mime.map(String::from),
            checksum: None,
            specs: PrintSpec::default(),
        }
    }

    #[test]
    fn accepts_pdf() {
        let r = validate_file(&file("report.pdf", 1024, Some("application/pdf")));
        assert!(r.is_valid());
        assert_eq!(r.category, FileCategory::Pdf);
    }

    #[test]
    fn accepts_jpeg_alias_and_image_mismatch() {
        assert!(validate_file(&file("photo.jpeg", 10, Some("image/jpeg"))).is_valid());
        assert!(validate_file(&file("photo.png", 10, Some("image/jpeg"))).is_valid());
    }

    #[test]
    fn falls_back_to_extension_for_generic_mime() {
        let r = validate_file(&file("letter.docx", 10, Some("application/octet-stream")));
        assert!(r.is_valid());
        assert_eq!(r.category, FileCategory::Document);
        assert!(validate_file(&file("letter.docx", 10, None)).is_valid());
    }

    #[test]
    fn rejects_unsupported_and_mismatched() {
        let r = validate_file(&file("notes.txt", 10, Some("text/plain")));
        assert!(!r.is_valid());
        assert_eq!(r.category, FileCategory::Unknown);

        let r = validate_file(&file("report.docx", 10, Some("application/pdf")));
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].contains("doesn't match"));
    }

    #[test]
    fn rejects_oversized_file() {
        let r = validate_file(&file("big.pdf", MAX_FILE_SIZE + 1, Some("application/pdf")));
        assert!(r.errors[0].contains("25MB"));
    }

    #[test]
    fn job_limits() {
        assert!(!validate_files(&[]).is_valid());

        let many: Vec<_> = (0..11).map(|i| file(&format!("{i}.pdf"), 1, None)).collect();
        let r = validate_files(&many);
        assert!(!r.is_valid());
        assert_eq!(r.valid_files, 11);

        let heavy: Vec<_> = (0..5)
            .map(|i| file(&format!("{i}.pdf"), 24 * 1024 * 1024, None))
            .collect();
        let r = validate_files(&heavy);
        assert!(r.errors.iter().any(|e| e.contains("100MB")));
        assert!(matches!(r.into_result(), Err(TransferError::Rejected(_))));

        let ok = validate_files(&[file("a.pdf", 3, None), file("b.png", 4, None)]);
        assert_eq!(ok.into_result().unwrap(), 7);
    }

    #[test]
    fn file_sizes_are_human_readable() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(25 * 1024 * 1024), "25 MB");
    }

    #[test]
    fn type_names() {
        assert_eq!(file_type_name("a.doc", Some("application/msword")), "Word Document (Legacy)");
        assert_eq!(file_type_name("a.webp", None), "Image");
    }

    #[test]
    fn staging_paths() {
        assert!(validate_staging_path("").is_err());
        assert!(validate_staging_path("../../../etc/passwd").is_err());
        assert!(validate_staging_path("sub/../../escape").is_err());
        assert!(validate_staging_path("/tmp/malicious").is_err());
        assert!(validate_staging_path("..").is_err());
        assert!(validate_staging_path("report.pdf").is_ok());
        assert!(validate_staging_path("./scan.png").is_ok());
        assert!(validate_file(&file("../x.pdf", 1, None)).errors.len() == 1);
    }
}
