//! End-to-end integration tests for edgequake-figchunk.
//!
//! These tests use real documents and stored analyzer responses in
//! `./test_cases/` (`{name}.pdf` next to `{name}.analysis.json`), bind to a
//! real pdfium library and make live VLM API calls. They are gated behind the
//! `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_crop_pdf_figure -- --nocapture

use edgequake_figchunk::pipeline::crop::{crop, CropSettings};
use edgequake_figchunk::{
    ingest, AnalysisResult, CachePolicy, IngestConfig, IngestProgressCallback, NoopProgressCallback,
    SourceDocument,
};
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir(name: &str) -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_cases/output")
        .join(name);
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* a fixture is missing.
macro_rules! e2e_skip_unless_ready {
    ($($path:expr),+) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let paths: Vec<PathBuf> = vec![$($path),+];
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            println!("SKIP — test file not found: {}", missing.display());
            return;
        }
        paths
    }};
}

/// Assert a generated description passes basic quality checks.
fn assert_description_quality(desc: &str, context: &str) {
    assert!(!desc.trim().is_empty(), "[{context}] Description is empty");
    assert!(
        !desc.lines().any(|l| l.trim_start().starts_with('#')),
        "[{context}] Description must not contain headings"
    );
    assert!(
        !desc.contains("![]("),
        "[{context}] Description must not contain image links"
    );
    assert!(
        !desc.contains("<figure>"),
        "[{context}] Description must not contain figure tags"
    );
    println!("[{context}] ✓  {} bytes, quality checks passed", desc.len());
}

// ── Cropping (pdfium, no LLM) ────────────────────────────────────────────────

#[tokio::test]
async fn test_crop_pdf_figure() {
    let paths = e2e_skip_unless_ready!(
        test_cases_dir().join("sample.pdf"),
        test_cases_dir().join("sample.analysis.json")
    );
    let doc = SourceDocument::open(&paths[0]).expect("PDF is supported");
    let analysis = AnalysisResult::load(&paths[1]).await.expect("valid analysis");
    let figure = analysis.figures.first().expect("fixture has a figure");
    let region = figure.crop_regions()[0];
    let bbox = region.bbox().expect("axis-aligned polygon");

    let settings = CropSettings {
        dpi: 300,
        pdf_unit_scale: 72.0,
        password: None,
    };
    let img = crop(&doc, region.page_index(), bbox, &settings)
        .await
        .expect("crop should succeed");

    // Inches at 300 DPI, rounded outward.
    let expected_w = (bbox.x1 * 300.0).ceil() - (bbox.x0 * 300.0).floor();
    let expected_h = (bbox.y1 * 300.0).ceil() - (bbox.y0 * 300.0).floor();
    assert!((img.width() as f64 - expected_w).abs() <= 1.0);
    assert!((img.height() as f64 - expected_h).abs() <= 1.0);

    let out = output_dir("crop").join("figure0.png");
    img.save(&out).ok();
    println!("[crop] {}x{} → {}", img.width(), img.height(), out.display());
}

#[tokio::test]
async fn test_crop_page_out_of_range() {
    let paths = e2e_skip_unless_ready!(test_cases_dir().join("sample.pdf"));
    let doc = SourceDocument::open(&paths[0]).unwrap();
    let bbox = edgequake_figchunk::BBox {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };
    let settings = CropSettings {
        dpi: 150,
        pdf_unit_scale: 72.0,
        password: None,
    };
    let result = crop(&doc, 9_999, bbox, &settings).await;
    assert!(result.is_err(), "page 10000 should not exist");
}

// ── Full ingestion (needs LLM API) ───────────────────────────────────────────

#[tokio::test]
async fn test_ingest_sample_pdf() {
    let paths = e2e_skip_unless_ready!(
        test_cases_dir().join("sample.pdf"),
        test_cases_dir().join("sample.analysis.json")
    );
    let analysis = AnalysisResult::load(&paths[1]).await.unwrap();
    let out = output_dir("sample");

    let config = IngestConfig::builder()
        .output_folder(&out)
        .cache_policy(CachePolicy::Overwrite)
        .max_retries(2)
        .build()
        .expect("valid config");

    let output = ingest(paths[0].to_string_lossy(), &analysis, &config)
        .await
        .expect("ingestion should succeed");

    assert_eq!(output.stats.total_figures, analysis.figures.len());
    assert_eq!(output.stats.failed_figures, 0, "{:?}", output.warnings);
    for figure in &output.figures {
        assert_description_quality(&figure.description, &format!("figure {}", figure.index));
    }

    let image_chunks = output.chunks.iter().filter(|c| c.image.is_some()).count();
    assert_eq!(image_chunks, output.stats.substituted_figures);

    let json = serde_json::to_string_pretty(&output.records()).expect("records serialise");
    std::fs::write(out.join("records.json"), &json).ok();
    println!(
        "[sample] {} chunks, {} description calls, {}ms",
        output.stats.chunks, output.stats.describe_calls, output.stats.total_duration_ms
    );

    // Second run is served from the cache.
    let config = IngestConfig::builder()
        .output_folder(&out)
        .build()
        .unwrap();
    let again = ingest(paths[0].to_string_lossy(), &analysis, &config)
        .await
        .unwrap();
    assert_eq!(again.stats.describe_calls, 0);
    assert_eq!(again.markdown, output.markdown);
}

// ── Callback plumbing ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_callback_send_in_tokio_spawn() {
    struct Counter(std::sync::atomic::AtomicUsize);

    impl IngestProgressCallback for Counter {
        fn on_figure_error(&self, _figure: usize, _total: usize, error: &str) {
            self.0.fetch_add(error.len(), std::sync::atomic::Ordering::SeqCst);
        }
    }

    let cb: Arc<dyn IngestProgressCallback> = Arc::new(Counter(Default::default()));
    let handle = tokio::spawn({
        let cb = Arc::clone(&cb);
        async move { cb.on_figure_error(0, 1, "boom") }
    });
    handle.await.expect("task should not panic");
}

#[test]
fn test_noop_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NoopProgressCallback>();
}
