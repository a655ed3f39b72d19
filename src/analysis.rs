//! Document-analysis result model and the analyzer collaborator seam.
//!
//! The analyzer (a layout service) is external; this crate only consumes the
//! parts of its output that locate figures: the structured text, each
//! figure's spans into that text, its page-relative polygons, and an optional
//! caption. Field names follow the analyzer's camelCase JSON so a stored
//! response can be deserialised directly.

use crate::error::FigChunkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tolerance used when checking that a polygon is axis-aligned.
///
/// Analyzer coordinates are floats; values that differ by less than this are
/// treated as equal.
pub const AXIS_TOLERANCE: f64 = 1e-2;

/// Immutable output of the document analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Full structured text (Markdown when analysed in Markdown mode).
    pub content: String,
    /// Figures in analyzer order. Position in this list is the figure index.
    #[serde(default)]
    pub figures: Vec<Figure>,
}

/// One detected visual element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Figure {
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub caption: Option<Caption>,
}

/// Offset/length pair into [`AnalysisResult::content`], in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

/// A page-relative quadrilateral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    /// 1-indexed page (or TIFF frame) number.
    pub page_number: u32,
    /// Four corner points, flattened: TL, TR, BR, BL.
    pub polygon: Vec<f64>,
}

/// Caption detected for a figure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub content: String,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
}

/// Axis-aligned box `(x0, y0) – (x1, y1)` in analyzer units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Multiply every coordinate by `factor`.
    pub fn scale(&self, factor: f64) -> BBox {
        BBox {
            x0: self.x0 * factor,
            y0: self.y0 * factor,
            x1: self.x1 * factor,
            y1: self.y1 * factor,
        }
    }
}

impl BoundingRegion {
    /// 0-indexed page, as the cropper expects.
    pub fn page_index(&self) -> usize {
        (self.page_number as usize).saturating_sub(1)
    }

    /// Derive the crop box from the first (top-left) and third (bottom-right)
    /// corners.
    ///
    /// Rotated or skewed quadrilaterals are rejected: cropping their
    /// TL/BR envelope would silently cut the wrong area.
    pub fn bbox(&self) -> Result<BBox, String> {
        let p = &self.polygon;
        if p.len() != 8 {
            return Err(format!("expected 8 coordinates, got {}", p.len()));
        }
        if p.iter().any(|v| !v.is_finite()) {
            return Err("polygon contains non-finite coordinates".to_string());
        }

        let (tl, tr, br, bl) = ((p[0], p[1]), (p[2], p[3]), (p[4], p[5]), (p[6], p[7]));
        let close = |a: f64, b: f64| (a - b).abs() <= AXIS_TOLERANCE;
        let aligned = close(tl.1, tr.1)
            && close(br.1, bl.1)
            && close(tl.0, bl.0)
            && close(tr.0, br.0);
        if !aligned {
            return Err(format!("polygon {:?} is not axis-aligned", p));
        }

        let bbox = BBox {
            x0: tl.0,
            y0: tl.1,
            x1: br.0,
            y1: br.1,
        };
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(format!("polygon {:?} has no positive area in reading order", p));
        }
        Ok(bbox)
    }
}

impl Figure {
    /// Concatenate the text covered by this figure's spans, in span order.
    ///
    /// Offsets count Unicode scalar values; spans running past the end of the
    /// text are clipped.
    pub fn marker_text(&self, content: &str) -> String {
        let mut out = String::new();
        for span in &self.spans {
            out.extend(content.chars().skip(span.offset).take(span.length));
        }
        out
    }

    /// Regions to crop: everything except regions that belong to the caption.
    pub fn crop_regions(&self) -> Vec<&BoundingRegion> {
        match &self.caption {
            Some(caption) => self
                .bounding_regions
                .iter()
                .filter(|r| !caption.bounding_regions.contains(r))
                .collect(),
            None => self.bounding_regions.iter().collect(),
        }
    }

    /// Caption text, if the analyzer found a non-empty one.
    pub fn caption_text(&self) -> Option<&str> {
        self.caption
            .as_ref()
            .map(|c| c.content.trim())
            .filter(|c| !c.is_empty())
    }
}

/// Either the bare result or the `{"analyzeResult": …}` service envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalysisEnvelope {
    Wrapped {
        #[serde(rename = "analyzeResult")]
        analyze_result: AnalysisResult,
    },
    Bare(AnalysisResult),
}

impl AnalysisResult {
    /// Parse analyzer JSON.
    pub fn from_json(json: &str) -> Result<Self, FigChunkError> {
        let envelope: AnalysisEnvelope =
            serde_json::from_str(json).map_err(|e| FigChunkError::InvalidAnalysis {
                detail: e.to_string(),
            })?;
        Ok(match envelope {
            AnalysisEnvelope::Wrapped { analyze_result } => analyze_result,
            AnalysisEnvelope::Bare(result) => result,
        })
    }

    /// Read and parse a stored analyzer response.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FigChunkError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FigChunkError::InvalidAnalysis {
                detail: format!("{}: {}", path.display(), e),
            })?;
        let result = Self::from_json(&json)?;
        debug!(
            "Loaded analysis from {}: {} chars, {} figures",
            path.display(),
            result.content.len(),
            result.figures.len()
        );
        Ok(result)
    }
}

// ── Analyzer collaborator ────────────────────────────────────────────────

/// Output format requested from the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentFormat {
    /// Structured Markdown with `<figure>` markers (default).
    #[default]
    Markdown,
    /// Plain text.
    Text,
}

/// External document-analysis service.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Analyse a document byte stream.
    async fn analyze(
        &self,
        document: &[u8],
        format: ContentFormat,
        model_id: &str,
    ) -> Result<AnalysisResult, FigChunkError>;
}

/// Analyzer backed by a previously stored JSON response.
///
/// Ignores the document bytes; useful for offline reruns and tests.
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    path: PathBuf,
}

impl StoredAnalysis {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentAnalyzer for StoredAnalysis {
    async fn analyze(
        &self,
        _document: &[u8],
        _format: ContentFormat,
        _model_id: &str,
    ) -> Result<AnalysisResult, FigChunkError> {
        AnalysisResult::load(&self.path).await
    }
}
