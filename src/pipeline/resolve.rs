//! Figure resolution: crop every figure and obtain its description.
//!
//! For each figure, in analyzer order:
//!
//! 1. Serve it from the artifact store when cached and the policy allows.
//! 2. Crop every region that does not belong to the caption.
//! 3. Describe the crop(s) per [`RegionPolicy`], with the caption as a hint.
//! 4. Persist the crops before describing, then the annotated description.
//!
//! Figures share nothing but the immutable analysis, so they run
//! concurrently through `buffer_unordered(concurrency)` and are re-sorted by
//! index afterwards. A crop, description or timeout failure only affects its
//! own figure: it is recorded as an [`IngestWarning`] and the figure keeps an
//! empty description and no image. `UnsupportedFormat` and artifact-store I/O
//! errors abort the document.

use crate::analysis::{AnalysisResult, Figure};
use crate::config::{CachePolicy, IngestConfig, RegionPolicy};
use crate::error::{FigChunkError, IngestWarning};
use crate::output::{FigureResult, ImageRef};
use crate::pipeline::crop::{self, CropSettings, SourceDocument};
use crate::pipeline::describe::ImageDescriber;
use crate::pipeline::encode;
use crate::pipeline::postprocess;
use crate::pipeline::store::ArtifactStore;
use crate::prompts;
use futures::stream::{self, StreamExt};
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-figure descriptions and images, keyed by figure index.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// One entry per figure, sorted by index.
    pub figures: Vec<FigureResult>,
    /// Every figure's description (empty for failed figures).
    pub descriptions: BTreeMap<usize, String>,
    /// Images of resolved figures only.
    pub images: BTreeMap<usize, ImageRef>,
    pub warnings: Vec<IngestWarning>,
}

/// Resolve every figure of `analysis` against `doc`.
pub async fn resolve(
    doc: &SourceDocument,
    analysis: &AnalysisResult,
    describer: &Arc<dyn ImageDescriber>,
    store: &Arc<dyn ArtifactStore>,
    config: &IngestConfig,
) -> Result<Resolution, FigChunkError> {
    let total = analysis.figures.len();
    let resolver = FigureResolver {
        doc,
        content: &analysis.content,
        describer,
        store,
        config,
        settings: CropSettings::from(config),
        total,
    };

    let outcomes: Vec<Result<(FigureResult, Vec<IngestWarning>), FigChunkError>> =
        stream::iter(analysis.figures.iter().enumerate().map(|(idx, figure)| {
            let resolver = &resolver;
            async move {
                if let Some(ref cb) = resolver.config.progress_callback {
                    cb.on_figure_start(idx, total);
                }
                let outcome = resolver.resolve_figure(idx, figure).await;
                let callback = &resolver.config.progress_callback;
                if let (Some(cb), Ok((result, warnings))) = (callback, &outcome) {
                    if result.is_resolved() {
                        cb.on_figure_complete(idx, total, result.description.len());
                    } else {
                        let reason = warnings
                            .first()
                            .map(|w| w.to_string())
                            .unwrap_or_else(|| "unresolved".to_string());
                        cb.on_figure_error(idx, total, &reason);
                    }
                }
                outcome
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let mut resolution = Resolution::default();
    let mut figure_warnings: Vec<(usize, Vec<IngestWarning>)> = Vec::with_capacity(total);
    for outcome in outcomes {
        let (result, warnings) = outcome?;
        figure_warnings.push((result.index, warnings));
        resolution.figures.push(result);
    }
    resolution.figures.sort_by_key(|f| f.index);
    figure_warnings.sort_by_key(|(idx, _)| *idx);

    for (_, warnings) in figure_warnings {
        for w in warnings {
            warn!("{}", w);
            resolution.warnings.push(w);
        }
    }
    for figure in &resolution.figures {
        resolution
            .descriptions
            .insert(figure.index, figure.description.clone());
        if let Some(ref image) = figure.image {
            resolution.images.insert(figure.index, image.clone());
        }
    }

    info!(
        "Resolved {}/{} figures of {}",
        resolution.images.len(),
        total,
        doc.name
    );
    Ok(resolution)
}

struct FigureResolver<'a> {
    doc: &'a SourceDocument,
    content: &'a str,
    describer: &'a Arc<dyn ImageDescriber>,
    store: &'a Arc<dyn ArtifactStore>,
    config: &'a IngestConfig,
    settings: CropSettings,
    total: usize,
}

impl FigureResolver<'_> {
    async fn resolve_figure(
        &self,
        idx: usize,
        figure: &Figure,
    ) -> Result<(FigureResult, Vec<IngestWarning>), FigChunkError> {
        let start = Instant::now();
        let marker = figure.marker_text(self.content);
        let mut warnings = Vec::new();
        debug!("Resolving figure {}/{}", idx + 1, self.total);

        if self.config.cache_policy == CachePolicy::Reuse {
            if let Some(cached) = self.store.load_figure(&self.doc.name, idx).await? {
                debug!("Figure {} served from cache", idx);
                let image = cached.crops.first().map(|(path, png)| ImageRef {
                    path: path.clone(),
                    data_url: encode::data_url(png),
                });
                let result = FigureResult {
                    index: idx,
                    marker,
                    description: cached.description,
                    image,
                    crops: cached.crops.into_iter().map(|(path, _)| path).collect(),
                    cached: true,
                    describe_calls: 0,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                return Ok((result, warnings));
            }
        }

        // ── Crop ────────────────────────────────────────────────────────────
        let mut crops: Vec<RgbImage> = Vec::new();
        for region in figure.crop_regions() {
            let bbox = match region.bbox() {
                Ok(bbox) => bbox,
                Err(detail) => {
                    warnings.push(IngestWarning::UnsupportedPolygon {
                        figure: idx,
                        page: region.page_number,
                        detail,
                    });
                    continue;
                }
            };
            match crop::crop(self.doc, region.page_index(), bbox, &self.settings).await {
                Ok(img) => crops.push(img),
                Err(e @ FigChunkError::UnsupportedFormat { .. }) => return Err(e),
                Err(e) => {
                    warnings.push(IngestWarning::CropFailed {
                        figure: idx,
                        detail: e.to_string(),
                    });
                    return Ok((unresolved(idx, marker, 0, start), warnings));
                }
            }
        }
        if crops.is_empty() {
            if warnings.is_empty() {
                warnings.push(IngestWarning::CropFailed {
                    figure: idx,
                    detail: "no bounding region outside the caption".to_string(),
                });
            }
            return Ok((unresolved(idx, marker, 0, start), warnings));
        }

        let pngs = match crops.iter().map(encode::encode_png).collect::<Result<Vec<_>, _>>() {
            Ok(pngs) => pngs,
            Err(e) => {
                warnings.push(IngestWarning::CropFailed {
                    figure: idx,
                    detail: format!("PNG encoding failed: {}", e),
                });
                return Ok((unresolved(idx, marker, 0, start), warnings));
            }
        };

        // ── Persist crops ───────────────────────────────────────────────────
        // Written before describing so a failed description leaves the crop
        // on disk; the description is saved last and completes the entry.
        let paths = self.store.save_crops(&self.doc.name, idx, &pngs).await?;

        // ── Describe ────────────────────────────────────────────────────────
        let inputs = match self.config.region_policy {
            RegionPolicy::Composite if pngs.len() > 1 => {
                match encode::encode_png(&crop::stack_vertically(&crops)) {
                    Ok(png) => vec![png],
                    Err(e) => {
                        warnings.push(IngestWarning::CropFailed {
                            figure: idx,
                            detail: format!("composite encoding failed: {}", e),
                        });
                        let result = unresolved(idx, marker, 0, start);
                        return Ok((FigureResult { crops: paths, ..result }, warnings));
                    }
                }
            }
            _ => pngs.clone(),
        };

        let caption = figure.caption_text();
        let mut calls = 0;
        let parts = match self.describe_all(idx, &inputs, caption, &mut calls).await {
            Ok(parts) => parts,
            Err(w) => {
                warnings.push(w);
                let result = unresolved(idx, marker, calls, start);
                return Ok((FigureResult { crops: paths, ..result }, warnings));
            }
        };

        let mut description = caption.map(prompts::caption_annotation).unwrap_or_default();
        description.push_str(&parts.join("\n"));

        // ── Persist description ─────────────────────────────────────────────
        self.store
            .save_description(&self.doc.name, idx, &description)
            .await?;
        let image = paths.first().zip(pngs.first()).map(|(path, png)| ImageRef {
            path: path.clone(),
            data_url: encode::data_url(png),
        });

        let result = FigureResult {
            index: idx,
            marker,
            description,
            image,
            crops: paths,
            cached: false,
            describe_calls: calls,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok((result, warnings))
    }

    /// Describe every input in region order. The whole step is bounded by
    /// `api_timeout_secs` (0 disables the bound).
    async fn describe_all(
        &self,
        idx: usize,
        inputs: &[Vec<u8>],
        caption: Option<&str>,
        calls: &mut usize,
    ) -> Result<Vec<String>, IngestWarning> {
        let secs = self.config.api_timeout_secs;
        let step = async {
            let mut parts = Vec::with_capacity(inputs.len());
            for png in inputs {
                *calls += 1;
                let text = self.describer.describe(png, caption).await.map_err(|e| {
                    IngestWarning::DescriptionFailed {
                        figure: idx,
                        detail: e.to_string(),
                    }
                })?;
                parts.push(postprocess::clean_description(&text));
            }
            Ok::<_, IngestWarning>(parts)
        };

        if secs == 0 {
            return step.await;
        }
        tokio::time::timeout(Duration::from_secs(secs), step)
            .await
            .unwrap_or(Err(IngestWarning::Timeout { figure: idx, secs }))
    }
}

fn unresolved(index: usize, marker: String, describe_calls: usize, start: Instant) -> FigureResult {
    FigureResult {
        index,
        marker,
        description: String::new(),
        image: None,
        crops: Vec::new(),
        cached: false,
        describe_calls,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::store::FsArtifactStore;
    use async_trait::async_trait;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Describes every image by its pixel size; fails when the caption is "boom".
    #[derive(Default)]
    struct CountingDescriber {
        calls: AtomicUsize,
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl ImageDescriber for CountingDescriber {
        async fn describe(
            &self,
            png: &[u8],
            caption: Option<&str>,
        ) -> Result<String, FigChunkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if caption == Some("boom") {
                return Err(FigChunkError::LlmApiError {
                    message: "model refused".into(),
                });
            }
            let img = image::load_from_memory(png)
                .map_err(|e| FigChunkError::Internal(e.to_string()))?;
            let size = (img.width(), img.height());
            if let Ok(mut sizes) = self.sizes.lock() {
                sizes.push(size);
            }
            Ok(format!("a {}x{} figure", size.0, size.1))
        }
    }

    /// Sleeps for the given duration on every call.
    struct SlowDescriber(Duration);

    #[async_trait]
    impl ImageDescriber for SlowDescriber {
        async fn describe(
            &self,
            _png: &[u8],
            _caption: Option<&str>,
        ) -> Result<String, FigChunkError> {
            tokio::time::sleep(self.0).await;
            Ok("eventually".into())
        }
    }

    fn page(dir: &std::path::Path) -> SourceDocument {
        let path = dir.join("page.png");
        RgbImage::from_pixel(200, 100, Rgb([10, 200, 30])).save(&path).unwrap();
        SourceDocument::open(&path).unwrap()
    }

    fn rect(page: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> String {
        format!(
            r#"{{"pageNumber": {page}, "polygon": [{x0}, {y0}, {x1}, {y0}, {x1}, {y1}, {x0}, {y1}]}}"#
        )
    }

    fn setup(
        describer: Arc<dyn ImageDescriber>,
        out: &std::path::Path,
    ) -> (Arc<dyn ImageDescriber>, Arc<dyn ArtifactStore>, IngestConfig) {
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(out));
        let config = IngestConfig::builder()
            .output_folder(out)
            .concurrency(2)
            .build()
            .unwrap();
        (describer, store, config)
    }

    #[tokio::test]
    async fn caption_region_is_not_cropped() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let body = rect(1, 0.0, 0.0, 50.0, 40.0);
        let cap = rect(1, 0.0, 40.0, 80.0, 60.0);
        let json = format!(
            r#"{{"content": "<figure>Revenue</figure>",
                "figures": [{{"spans": [{{"offset": 0, "length": 24}}],
                              "boundingRegions": [{body}, {cap}],
                              "caption": {{"content": "Revenue", "boundingRegions": [{cap}]}}}}]}}"#
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, config) = setup(counting.clone(), &dir.path().join("out"));
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*counting.sizes.lock().unwrap(), vec![(50, 40)]);
        assert_eq!(res.figures[0].crops.len(), 1);
        assert_eq!(
            res.descriptions[&0],
            "<figcaption>Revenue</figcaption>\na 50x40 figure"
        );
        assert!(res.images[&0].data_url.starts_with("data:image/png;base64,"));
        assert_eq!(res.figures[0].marker, "<figure>Revenue</figure>");
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [
                {{"spans": [], "boundingRegions": [{}]}},
                {{"spans": [], "boundingRegions": [{}]}}]}}"#,
            rect(1, 0.0, 0.0, 10.0, 10.0),
            rect(1, 10.0, 10.0, 30.0, 20.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, config) = setup(counting.clone(), &dir.path().join("out"));
        let first = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);

        let second = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2, "no new external calls");
        assert_eq!(first.descriptions, second.descriptions);
        assert_eq!(first.images, second.images);
        assert!(second.figures.iter().all(|f| f.cached));
    }

    #[tokio::test]
    async fn overwrite_policy_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}]}}]}}"#,
            rect(1, 0.0, 0.0, 10.0, 10.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, mut config) = setup(counting.clone(), &dir.path().join("out"));
        config.cache_policy = CachePolicy::Overwrite;
        resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let r = rect(1, 0.0, 0.0, 10.0, 10.0);
        let skewed = r#"{"pageNumber": 1, "polygon": [0, 0, 10, 3, 10, 10, 0, 10]}"#;
        let json = format!(
            r#"{{"content": "x", "figures": [
                {{"spans": [], "boundingRegions": [{r}]}},
                {{"spans": [], "boundingRegions": [{r}], "caption": {{"content": "boom", "boundingRegions": []}}}},
                {{"spans": [], "boundingRegions": [{}]}},
                {{"spans": [], "boundingRegions": [{skewed}]}}]}}"#,
            rect(4, 0.0, 0.0, 10.0, 10.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, config) = setup(counting, &dir.path().join("out"));
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();

        assert_eq!(res.figures.len(), 4);
        assert_eq!(res.images.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(res.descriptions[&1], "");
        assert!(matches!(res.warnings[0], IngestWarning::DescriptionFailed { figure: 1, .. }));
        assert!(matches!(res.warnings[1], IngestWarning::CropFailed { figure: 2, .. }));
        assert!(matches!(
            res.warnings[2],
            IngestWarning::UnsupportedPolygon { figure: 3, page: 1, .. }
        ));
    }

    #[tokio::test]
    async fn composite_policy_makes_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}, {}]}}]}}"#,
            rect(1, 0.0, 0.0, 20.0, 10.0),
            rect(1, 0.0, 50.0, 30.0, 60.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, mut config) = setup(counting.clone(), &dir.path().join("out"));
        config.region_policy = RegionPolicy::Composite;
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*counting.sizes.lock().unwrap(), vec![(30, 20)]);
        assert_eq!(res.figures[0].crops.len(), 2);
    }

    #[tokio::test]
    async fn concatenate_policy_joins_in_region_order() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}, {}]}}]}}"#,
            rect(1, 0.0, 0.0, 20.0, 10.0),
            rect(1, 0.0, 50.0, 30.0, 60.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let counting = Arc::new(CountingDescriber::default());
        let (describer, store, config) = setup(counting, &dir.path().join("out"));
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(res.descriptions[&0], "a 20x10 figure\na 30x10 figure");
    }

    #[tokio::test]
    async fn timeout_is_a_figure_warning() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}]}}]}}"#,
            rect(1, 0.0, 0.0, 10.0, 10.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let slow = Arc::new(SlowDescriber(Duration::from_secs(30)));
        let (describer, store, mut config) = setup(slow, &dir.path().join("out"));
        config.api_timeout_secs = 1;
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(res.warnings, vec![IngestWarning::Timeout { figure: 0, secs: 1 }]);
        assert!(res.images.is_empty());
    }

    #[tokio::test]
    async fn timeout_bounds_all_region_calls_together() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}, {}]}}]}}"#,
            rect(1, 0.0, 0.0, 20.0, 10.0),
            rect(1, 0.0, 50.0, 30.0, 60.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        // Each call fits the bound on its own; both together do not.
        let slow = Arc::new(SlowDescriber(Duration::from_millis(700)));
        let (describer, store, mut config) = setup(slow, &dir.path().join("out"));
        config.api_timeout_secs = 1;
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();
        assert_eq!(res.warnings, vec![IngestWarning::Timeout { figure: 0, secs: 1 }]);
        assert_eq!(res.figures[0].describe_calls, 2);
        assert!(res.images.is_empty());
    }

    #[tokio::test]
    async fn failed_description_keeps_crop_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let doc = page(dir.path());
        let json = format!(
            r#"{{"content": "x", "figures": [{{"spans": [], "boundingRegions": [{}],
                "caption": {{"content": "boom", "boundingRegions": []}}}}]}}"#,
            rect(1, 0.0, 0.0, 10.0, 10.0)
        );
        let analysis = AnalysisResult::from_json(&json).unwrap();

        let out = dir.path().join("out");
        let (describer, store, config) = setup(Arc::new(CountingDescriber::default()), &out);
        let res = resolve(&doc, &analysis, &describer, &store, &config).await.unwrap();

        let fs = FsArtifactStore::new(&out);
        assert!(matches!(res.warnings[0], IngestWarning::DescriptionFailed { figure: 0, .. }));
        assert_eq!(res.figures[0].crops, vec![fs.crop_path("page", 0, 0)]);
        assert!(fs.crop_path("page", 0, 0).exists());
        assert!(!fs.description_path("page", 0).exists());
        assert!(res.images.is_empty());
    }
}
