//! Error types for the edgequake-figchunk library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`FigChunkError`] — **Fatal**: the document cannot be processed at all
//!   (missing input, unsupported media type, unusable analysis, artifact
//!   store not writable). Returned as `Err(FigChunkError)` from the
//!   top-level `ingest*` functions.
//!
//! * [`IngestWarning`] — **Non-fatal**: one figure could not be cropped or
//!   described, or the text and the analysis disagree about figure markers.
//!   Stored in [`crate::output::IngestOutput::warnings`] so the caller sees
//!   every recovered problem without losing the rest of the document.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-figchunk library.
#[derive(Debug, Error)]
pub enum FigChunkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Media type is neither a paged vector document nor a raster image.
    #[error("Unsupported format for '{path}': {mime}\nSupported: PDF, TIFF, PNG, JPEG.")]
    UnsupportedFormat { path: PathBuf, mime: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be opened or decoded.
    #[error("Document '{path}' is corrupt: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A page (or TIFF frame) index exceeds what the document holds.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Rendering or cropping a page failed.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Analysis errors ───────────────────────────────────────────────────
    /// The analyzer output could not be read or parsed.
    #[error("Invalid analysis result: {detail}")]
    InvalidAnalysis { detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a cached artifact failed.
    #[error("Artifact store I/O failed for '{path}': {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the chunk output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal problem recorded in the per-document processing log.
///
/// Figure-level variants leave the figure with an empty description and no
/// image; document-level variants only affect text substitution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum IngestWarning {
    /// Cropping one region of the figure failed.
    #[error("Figure {figure}: crop failed: {detail}")]
    CropFailed { figure: usize, detail: String },

    /// The vision model could not describe the figure.
    #[error("Figure {figure}: description failed: {detail}")]
    DescriptionFailed { figure: usize, detail: String },

    /// The description call did not finish in time.
    #[error("Figure {figure}: description timed out after {secs}s")]
    Timeout { figure: usize, secs: u64 },

    /// A bounding polygon is not an axis-aligned quadrilateral.
    #[error("Figure {figure}: unsupported polygon on page {page}: {detail}")]
    UnsupportedPolygon {
        figure: usize,
        page: u32,
        detail: String,
    },

    /// Marker count in the text differs from the figure record count.
    #[error("Text holds {markers} figure markers but the analysis lists {figures} figures")]
    MarkerMismatch { markers: usize, figures: usize },

    /// No marker was left in the text for this figure; substitution skipped.
    #[error("Figure {figure}: no figure marker found in text")]
    MissingMarker { figure: usize },

    /// A placeholder references a figure without a resolved image.
    #[error("Placeholder figures/{figure} has no resolved image")]
    MissingImage { figure: usize },
}

impl IngestWarning {
    /// Figure index the warning belongs to, if any.
    pub fn figure(&self) -> Option<usize> {
        match self {
            IngestWarning::CropFailed { figure, .. }
            | IngestWarning::DescriptionFailed { figure, .. }
            | IngestWarning::Timeout { figure, .. }
            | IngestWarning::UnsupportedPolygon { figure, .. }
            | IngestWarning::MissingMarker { figure }
            | IngestWarning::MissingImage { figure } => Some(*figure),
            IngestWarning::MarkerMismatch { .. } => None,
        }
    }
}
