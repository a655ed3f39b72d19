//! # edgequake-figchunk
//!
//! Turn a document-analysis result into retrieval-ready chunks in which every
//! figure is replaced by a vision-model description and a stable image
//! reference.
//!
//! ## Why this crate?
//!
//! Layout analyzers return good text but only *locate* figures: the chart
//! itself is a `<figure>` marker plus a polygon. Indexing that text loses
//! everything the chart says. This crate crops each figure out of the source
//! page, asks a VLM to describe it, splices the description back in place of
//! the marker and splits the result on headers and figures, so each chunk
//! carries its header path and, when it holds a figure, the image itself.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document + AnalysisResult
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Resolve    crop (pdfium / TIFF frame) → describe (VLM), per figure, concurrent
//!  ├─ 3. Reconcile  <figure>…</figure> → ![](figures/N) + description
//!  ├─ 4. Split      header sections → figure pieces → chunks
//!  └─ 5. Output     chunks + per-figure results + warnings + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_figchunk::{ingest, AnalysisResult, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let analysis = AnalysisResult::load("report.analysis.json").await?;
//!     let config = IngestConfig::default();
//!     let output = ingest("report.pdf", &analysis, &config).await?;
//!     for record in output.records() {
//!         println!("{}", serde_json::to_string(&record)?);
//!     }
//!     eprintln!("{}/{} figures described",
//!         output.stats.resolved_figures,
//!         output.stats.total_figures);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `figchunk` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-figchunk = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{
    AnalysisResult, BBox, BoundingRegion, Caption, ContentFormat, DocumentAnalyzer, Figure, Span,
    StoredAnalysis,
};
pub use config::{CachePolicy, IngestConfig, IngestConfigBuilder, RegionPolicy};
pub use error::{FigChunkError, IngestWarning};
pub use ingest::{
    ingest, ingest_source, ingest_sync, ingest_to_file, ingest_with_analyzer, write_records,
};
pub use output::{Chunk, ChunkRecord, FigureResult, HeaderPath, ImageRef, IngestOutput, IngestStats};
pub use pipeline::crop::SourceDocument;
pub use pipeline::describe::{ImageDescriber, VlmDescriber};
pub use pipeline::store::{ArtifactStore, FsArtifactStore};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
