//! Input resolution: normalise a user-supplied path or URL to a local file
//! and classify its media type.
//!
//! pdfium and the TIFF decoder both want a file-system path. URLs are
//! downloaded into a `TempDir` that lives as long as [`ResolvedInput`], so
//! cleanup happens even when ingestion fails half-way.

use crate::error::FigChunkError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The two source families the cropper understands (raster split by
/// whether frames can be addressed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Paged vector document; geometry in page units.
    Pdf,
    /// Multi-frame raster; geometry in pixels of the addressed frame.
    Tiff,
    /// Single-frame raster (PNG, JPEG); only frame 0 exists.
    Raster,
}

impl SourceKind {
    /// Classify `path` by extension, falling back to its leading bytes.
    pub fn detect(path: &Path) -> Result<Self, FigChunkError> {
        let guessed = mime_guess::from_path(path).first_or_octet_stream();
        let mime = guessed.essence_str().to_string();
        if let Some(kind) = Self::from_mime(&mime) {
            return Ok(kind);
        }

        let mut magic = [0u8; 8];
        let read = std::fs::File::open(path)
            .and_then(|mut f| f.read(&mut magic))
            .unwrap_or(0);
        if let Some(kind) = Self::from_magic(&magic[..read]) {
            debug!("Detected {:?} from magic bytes of {}", kind, path.display());
            return Ok(kind);
        }

        Err(FigChunkError::UnsupportedFormat {
            path: path.to_path_buf(),
            mime,
        })
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(SourceKind::Pdf),
            "image/tiff" => Some(SourceKind::Tiff),
            "image/png" | "image/jpeg" => Some(SourceKind::Raster),
            _ => None,
        }
    }

    fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(SourceKind::Pdf)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(SourceKind::Tiff)
        } else if bytes.starts_with(b"\x89PNG") || bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceKind::Raster)
        } else {
            None
        }
    }
}

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the document lives in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Document identifier: the file name without extension.
    pub fn doc_name(&self) -> String {
        doc_name(self.path())
    }
}

/// File stem of `path`, or `document` when it has none.
pub fn doc_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local document path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, FigChunkError> {
    if input.trim().is_empty() {
        return Err(FigChunkError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, FigChunkError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(FigChunkError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FigChunkError::PermissionDenied { path });
        }
        Err(_) => return Err(FigChunkError::FileNotFound { path }),
    }

    debug!("Resolved local document: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, FigChunkError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FigChunkError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FigChunkError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FigChunkError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(FigChunkError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| FigChunkError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FigChunkError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| FigChunkError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment when it looks like a file name, else a fixed name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.bin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detect_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for (name, kind) in [
            ("a.pdf", SourceKind::Pdf),
            ("b.tif", SourceKind::Tiff),
            ("c.tiff", SourceKind::Tiff),
            ("d.png", SourceKind::Raster),
            ("e.jpg", SourceKind::Raster),
        ] {
            let p = dir.path().join(name);
            std::fs::write(&p, b"").unwrap();
            assert_eq!(SourceKind::detect(&p).unwrap(), kind, "{name}");
        }
    }

    #[test]
    fn detect_by_magic_when_extension_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("scan.bin");
        std::fs::write(&p, b"II*\0rest-of-header").unwrap();
        assert_eq!(SourceKind::detect(&p).unwrap(), SourceKind::Tiff);
    }

    #[test]
    fn plain_text_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("notes.txt");
        std::fs::write(&p, b"just words").unwrap();
        let err = SourceKind::detect(&p).unwrap_err();
        match err {
            FigChunkError::UnsupportedFormat { mime, .. } => assert_eq!(mime, "text/plain"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn doc_name_strips_extension() {
        assert_eq!(doc_name(Path::new("/data/annual_report.pdf")), "annual_report");
        assert_eq!(doc_name(Path::new("")), "document");
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://host/x/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://host/x/"), "downloaded.bin");
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.err().unwrap();
        assert!(matches!(err, FigChunkError::FileNotFound { .. }));
    }
}
