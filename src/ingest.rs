//! Document-at-a-time ingestion entry points.
//!
//! ## Stage order
//!
//! Figure resolution is the only concurrent stage. Reconciliation needs the
//! complete description map and splitting needs the complete reconciled
//! text, so both run after every figure has settled.
//!
//! ```text
//! resolve input ─▶ persist _init.md ─▶ resolve figures ─▶ reconcile ─▶ persist .md ─▶ split
//! ```

use crate::analysis::{AnalysisResult, ContentFormat, DocumentAnalyzer};
use crate::config::IngestConfig;
use crate::error::FigChunkError;
use crate::output::{IngestOutput, IngestStats};
use crate::pipeline::crop::SourceDocument;
use crate::pipeline::describe::{resolve_describer, ImageDescriber};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::reconcile;
use crate::pipeline::resolve::{self, Resolution};
use crate::pipeline::split;
use crate::pipeline::store::{ArtifactStore, FsArtifactStore, MarkdownStage};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Ingest a document (local path or URL) with a precomputed analysis.
///
/// # Returns
/// `Ok(IngestOutput)` even when some figures failed; check
/// `output.warnings` and `output.stats.failed_figures`.
///
/// # Errors
/// Returns `Err(FigChunkError)` only for fatal errors:
/// - Input not found / not downloadable
/// - Unsupported media type
/// - No vision provider configured while figures need describing
/// - Artifact store not writable
pub async fn ingest(
    document: impl AsRef<str>,
    analysis: &AnalysisResult,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    let document = document.as_ref();
    info!("Starting ingestion: {}", document);

    let resolved = input::resolve_input(document, config.download_timeout_secs).await?;
    ingest_resolved(&resolved, analysis, config).await
}

/// Ingest a document, obtaining its analysis from `analyzer` first.
pub async fn ingest_with_analyzer(
    document: impl AsRef<str>,
    analyzer: &dyn DocumentAnalyzer,
    format: ContentFormat,
    model_id: &str,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    let document = document.as_ref();
    info!("Starting ingestion with analyzer '{}': {}", model_id, document);

    let resolved = input::resolve_input(document, config.download_timeout_secs).await?;
    let bytes = tokio::fs::read(resolved.path())
        .await
        .map_err(|e| FigChunkError::Internal(format!("Failed to read document: {}", e)))?;
    let analysis = analyzer.analyze(&bytes, format, model_id).await?;
    ingest_resolved(&resolved, &analysis, config).await
}

async fn ingest_resolved(
    resolved: &ResolvedInput,
    analysis: &AnalysisResult,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    let doc = SourceDocument::open(resolved.path())?.with_name(resolved.doc_name());
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.output_folder));
    let describer = if analysis.figures.is_empty() {
        None
    } else {
        Some(resolve_describer(config)?)
    };
    ingest_source(&doc, analysis, describer.as_ref(), &store, config).await
}

/// Ingest an already-opened source with injected collaborators.
///
/// `describer` may be `None` only when the analysis lists no figures.
pub async fn ingest_source(
    doc: &SourceDocument,
    analysis: &AnalysisResult,
    describer: Option<&Arc<dyn ImageDescriber>>,
    store: &Arc<dyn ArtifactStore>,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    let total_start = Instant::now();
    let total_figures = analysis.figures.len();
    info!("{}: {} figures, {} chars", doc.name, total_figures, analysis.content.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_ingest_start(total_figures);
    }

    // ── Step 1: Persist analyzer text ────────────────────────────────────
    store
        .save_markdown(&doc.name, MarkdownStage::Initial, &analysis.content)
        .await?;

    // ── Step 2: Resolve figures ──────────────────────────────────────────
    let resolve_start = Instant::now();
    let resolution = match describer {
        Some(describer) => resolve::resolve(doc, analysis, describer, store, config).await?,
        None if total_figures == 0 => Resolution::default(),
        None => {
            return Err(FigChunkError::ProviderNotConfigured {
                provider: "none".to_string(),
                hint: format!("{} figures need a description generator", total_figures),
            })
        }
    };
    let resolve_duration_ms = resolve_start.elapsed().as_millis() as u64;

    // ── Step 3: Reconcile ────────────────────────────────────────────────
    // Failed figures keep their marker so every placeholder has an image.
    let substitutable: BTreeMap<usize, String> = resolution
        .figures
        .iter()
        .filter(|f| f.is_resolved())
        .map(|f| (f.index, f.description.clone()))
        .collect();
    let reconciled = reconcile::reconcile(
        &analysis.content,
        &substitutable,
        total_figures,
        config.keep_figure_tags,
    );
    store
        .save_markdown(&doc.name, MarkdownStage::Final, &reconciled.markdown)
        .await?;

    // ── Step 4: Split ────────────────────────────────────────────────────
    let split = split::split_with_spans(
        &reconciled.markdown,
        &reconciled.figure_spans,
        &doc.name,
        &resolution.images,
        config.max_header_level,
    );

    // ── Step 5: Stats ────────────────────────────────────────────────────
    let resolved_figures = resolution.images.len();
    let stats = IngestStats {
        total_figures,
        resolved_figures,
        failed_figures: total_figures - resolved_figures,
        cached_figures: resolution.figures.iter().filter(|f| f.cached).count(),
        describe_calls: resolution.figures.iter().map(|f| f.describe_calls).sum(),
        substituted_figures: reconciled.substituted.len(),
        sections: split.sections,
        chunks: split.chunks.len(),
        resolve_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    let mut warnings = resolution.warnings;
    warnings.extend(reconciled.warnings);
    warnings.extend(split.warnings);

    info!(
        "Ingestion complete: {}/{} figures, {} chunks, {} warnings, {}ms",
        resolved_figures,
        total_figures,
        stats.chunks,
        warnings.len(),
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_ingest_complete(total_figures, resolved_figures, stats.chunks);
    }

    Ok(IngestOutput {
        source: doc.name.clone(),
        markdown: reconciled.markdown,
        chunks: split.chunks,
        figures: resolution.figures,
        warnings,
        stats,
    })
}

/// Ingest a document and write its chunk records as JSON Lines.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn ingest_to_file(
    document: impl AsRef<str>,
    analysis: &AnalysisResult,
    output_path: impl AsRef<Path>,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    let output = ingest(document, analysis, config).await?;
    write_records(&output, output_path.as_ref()).await?;
    Ok(output)
}

/// Write `output`'s chunk records to `path`, one JSON object per line.
pub async fn write_records(output: &IngestOutput, path: &Path) -> Result<(), FigChunkError> {
    let write_err = |e| FigChunkError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let mut buf = Vec::new();
    for record in output.records() {
        serde_json::to_writer(&mut buf, &record)
            .map_err(|e| FigChunkError::Internal(format!("Failed to serialise chunk: {}", e)))?;
        buf.write_all(b"\n").map_err(write_err)?;
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp_path, &buf).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Wrote {} records to {}", output.chunks.len(), path.display());
    Ok(())
}

/// Synchronous wrapper around [`ingest`].
///
/// Creates a temporary tokio runtime internally.
pub fn ingest_sync(
    document: impl AsRef<str>,
    analysis: &AnalysisResult,
    config: &IngestConfig,
) -> Result<IngestOutput, FigChunkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FigChunkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest(document, analysis, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Chunk, ChunkRecord, HeaderPath};

    #[tokio::test]
    async fn document_without_figures_needs_no_provider() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("notes.png");
        image::RgbImage::new(4, 4).save(&page).unwrap();
        let analysis = AnalysisResult {
            content: "# Notes\nplain text".into(),
            figures: vec![],
        };
        let config = IngestConfig::builder()
            .output_folder(dir.path().join("out"))
            .build()
            .unwrap();

        let output = ingest(page.to_string_lossy(), &analysis, &config).await.unwrap();
        assert_eq!(output.source, "notes");
        assert_eq!(output.markdown, analysis.content);
        assert_eq!(output.chunks.len(), 1);
        assert!(dir.path().join("out/notes_init.md").exists());
        assert!(dir.path().join("out/notes.md").exists());
    }

    #[tokio::test]
    async fn records_are_written_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Chunk {
            text: "body".into(),
            header_path: HeaderPath::new(),
            source: "doc".into(),
            figure: None,
            image: None,
        };
        let output = IngestOutput {
            source: "doc".into(),
            markdown: "body".into(),
            chunks: vec![chunk.clone(), chunk],
            figures: vec![],
            warnings: vec![],
            stats: IngestStats::default(),
        };
        let path = dir.path().join("sub/chunks.jsonl");
        write_records(&output, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<ChunkRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "body");
        assert!(records[0].image.is_none());
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn sync_wrapper_reports_missing_input() {
        let config = IngestConfig::default();
        let err =
            ingest_sync("/no/such/file.pdf", &AnalysisResult::default(), &config).unwrap_err();
        assert!(matches!(err, FigChunkError::FileNotFound { .. }));
    }
}
