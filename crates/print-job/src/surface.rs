//! Where received documents end up.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use printlink_protocol::{FileMetadata, PageRangeError};
use printlink_transfer::{FileCategory, file_category, validate_staging_path};
use tracing::info;

/// Failure to produce output. Independent of whether the transfer worked.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    #[error(transparent)]
    PageRange(#[from] PageRangeError),

    #[error("invalid document name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RenderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RenderError>> + Send + 'a>>;

/// Accepts a document plus its print settings and produces output.
pub trait PrintSurface: Send + Sync {
    /// Prints one document and returns where the output went.
    fn print<'a>(&'a self, document: &'a [u8], file: &'a FileMetadata) -> RenderFuture<'a, PathBuf>;
}

/// Writes documents into a spool directory, each next to a JSON file
/// holding its print settings.
#[derive(Debug)]
pub struct SpoolSurface {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolSurface {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PrintSurface for SpoolSurface {
    fn print<'a>(&'a self, document: &'a [u8], file: &'a FileMetadata) -> RenderFuture<'a, PathBuf> {
        Box::pin(async move {
            if file_category(&file.name, file.mime_type.as_deref()) == FileCategory::Unknown {
                return Err(RenderError::UnsupportedContent(file.name.clone()));
            }
            validate_staging_path(&file.name).map_err(|e| RenderError::InvalidName(e.to_string()))?;
            file.specs.page_ranges()?;

            let base = Path::new(&file.name)
                .file_name()
                .ok_or_else(|| RenderError::InvalidName(file.name.clone()))?
                .to_string_lossy()
                .into_owned();
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let output = self.dir.join(format!("{seq:04}-{base}"));
            let sidecar = self.dir.join(format!("{seq:04}-{base}.json"));

            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&output, document).await?;
            tokio::fs::write(&sidecar, serde_json::to_vec_pretty(&file.specs)?).await?;

            info!(
                file = %file.name,
                output = %output.display(),
                copies = file.specs.effective_copies(),
                "document spooled"
            );
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use printlink_protocol::{ColorMode, PrintSpec};

    use super::*;

    fn meta(name: &str, mime: Option<&str>) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            size: 3,
            mime_type: mime.map(str::to_string),
            checksum: None,
            specs: PrintSpec {
                copies: 2,
                color: ColorMode::Color,
                ..PrintSpec::default()
            },
        }
    }

    #[tokio::test]
    async fn spools_document_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SpoolSurface::new(dir.path().join("spool"));
        let file = meta("report.pdf", Some("application/pdf"));

        let output = surface.print(b"abc", &file).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"abc");
        assert!(output.file_name().unwrap().to_string_lossy().ends_with("report.pdf"));

        let sidecar = output.with_file_name(format!(
            "{}.json",
            output.file_name().unwrap().to_string_lossy()
        ));
        let specs: PrintSpec =
            serde_json::from_slice(&std::fs::read(sidecar).unwrap()).unwrap();
        assert_eq!(specs, file.specs);
    }

    #[tokio::test]
    async fn same_name_twice_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SpoolSurface::new(dir.path());
        let file = meta("photo.png", Some("image/png"));
        let a = surface.print(b"1", &file).await.unwrap();
        let b = surface.print(b"2", &file).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unknown_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SpoolSurface::new(dir.path());
        let err = surface
            .print(b"x", &meta("archive.zip", Some("application/zip")))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedContent(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn bad_page_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SpoolSurface::new(dir.path());
        let mut file = meta("a.pdf", None);
        file.specs.pages = "4-2".into();
        assert!(matches!(
            surface.print(b"x", &file).await,
            Err(RenderError::PageRange(_))
        ));
    }
}
