//! Progress-callback trait for per-figure ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as figures are cropped and described. Figures resolve
//! concurrently, so events for different figures may interleave.
//!
//! # Example
//!
//! ```rust
//! use edgequake_figchunk::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     described: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_figure_complete(&self, figure: usize, total: usize, description_len: usize) {
//!         self.described.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("figure {}/{} described ({} bytes)", figure + 1, total, description_len);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { described: AtomicUsize::new(0) });
//! let config = IngestConfig::builder()
//!     .progress_callback(cb as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the ingestion pipeline as it resolves each figure.
///
/// All methods default to no-ops. Implementations must be `Send + Sync` and
/// protect shared state themselves.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once per document before any figure is resolved.
    fn on_ingest_start(&self, total_figures: usize) {
        let _ = total_figures;
    }

    /// Called before a figure is cropped. `figure` is the 0-based index.
    fn on_figure_start(&self, figure: usize, total_figures: usize) {
        let _ = (figure, total_figures);
    }

    /// Called when a figure has a description and an image.
    fn on_figure_complete(&self, figure: usize, total_figures: usize, description_len: usize) {
        let _ = (figure, total_figures, description_len);
    }

    /// Called when a figure could not be resolved.
    fn on_figure_error(&self, figure: usize, total_figures: usize, error: &str) {
        let _ = (figure, total_figures, error);
    }

    /// Called once after chunking finished.
    fn on_ingest_complete(&self, total_figures: usize, resolved: usize, chunks: usize) {
        let _ = (total_figures, resolved, chunks);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
