//! Output types: chunks, figure results, and run statistics.
//!
//! In-process types stay strongly typed ([`HeaderPath`] is an ordered map
//! from level to text). The loosely-typed shape expected by the indexing
//! collaborator only appears in [`ChunkRecord`], built at the boundary.

use crate::error::IngestWarning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Stack of structural headers enclosing a chunk, keyed by level (1–8).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPath(BTreeMap<u8, String>);

impl HeaderPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a header: replace the entry at `level` and clear deeper levels.
    pub fn enter(&mut self, level: u8, text: impl Into<String>) {
        self.0.retain(|&l, _| l < level);
        self.0.insert(level, text.into());
    }

    pub fn get(&self, level: u8) -> Option<&str> {
        self.0.get(&level).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.0.iter().map(|(l, t)| (*l, t.as_str()))
    }

    /// Boundary form: `{"Header 1": "...", "Header 2": "..."}`.
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(l, t)| (format!("Header {l}"), t.clone()))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(u8, S)> for HeaderPath {
    fn from_iter<I: IntoIterator<Item = (u8, S)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(l, t)| (l, t.into())).collect())
    }
}

/// Handle to a cropped figure image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Where the crop was persisted.
    pub path: PathBuf,
    /// `data:image/png;base64,…` URL of the same bytes.
    pub data_url: String,
}

/// A terminal, independently indexable unit of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub header_path: HeaderPath,
    /// Document identifier.
    pub source: String,
    /// Figure index of the placeholder this chunk carries, if any.
    pub figure: Option<usize>,
    /// Resolved image for that figure.
    pub image: Option<ImageRef>,
}

/// Record handed to the indexing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub content: String,
    pub header_metadata: BTreeMap<String, String>,
    pub source: String,
    pub image: Option<String>,
}

impl Chunk {
    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            content: self.text.clone(),
            header_metadata: self.header_path.to_metadata(),
            source: self.source.clone(),
            image: self.image.as_ref().map(|i| i.data_url.clone()),
        }
    }
}

/// What happened to one figure during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureResult {
    /// 0-based index in analyzer order.
    pub index: usize,
    /// Text covered by the figure's spans.
    pub marker: String,
    /// Accumulated description (caption annotation + generated text). Empty on failure.
    pub description: String,
    /// Representative image (first successful crop).
    pub image: Option<ImageRef>,
    /// Every crop persisted for this figure, in region order.
    pub crops: Vec<PathBuf>,
    /// Served from the artifact cache without external calls.
    pub cached: bool,
    /// Number of description calls made.
    pub describe_calls: usize,
    pub duration_ms: u64,
}

impl FigureResult {
    pub fn is_resolved(&self) -> bool {
        self.image.is_some()
    }
}

/// Aggregate statistics for one ingested document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub total_figures: usize,
    pub resolved_figures: usize,
    pub failed_figures: usize,
    pub cached_figures: usize,
    pub describe_calls: usize,
    pub substituted_figures: usize,
    pub sections: usize,
    pub chunks: usize,
    pub resolve_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutput {
    /// Document identifier (file stem).
    pub source: String,
    /// Reconciled Markdown.
    pub markdown: String,
    pub chunks: Vec<Chunk>,
    pub figures: Vec<FigureResult>,
    /// Per-document processing log of recovered problems.
    pub warnings: Vec<IngestWarning>,
    pub stats: IngestStats,
}

impl IngestOutput {
    pub fn records(&self) -> Vec<ChunkRecord> {
        self.chunks.iter().map(Chunk::to_record).collect()
    }
}
