//! Configuration types for figure reconciliation and chunking.
//!
//! All ingestion behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config across concurrent figure tasks and to log exactly which
//! settings produced a given chunk set.

use crate::error::FigChunkError;
use crate::pipeline::describe::ImageDescriber;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for ingesting one or more documents.
///
/// # Example
/// ```rust
/// use edgequake_figchunk::{CachePolicy, IngestConfig};
///
/// let config = IngestConfig::builder()
///     .output_folder("ingestion/images")
///     .concurrency(4)
///     .cache_policy(CachePolicy::Reuse)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Folder receiving `{doc}_init.md`, `{doc}.md` and the per-figure crops
    /// and descriptions. Default: `ingestion/images`.
    pub output_folder: PathBuf,

    /// Rendering DPI for PDF pages before clipping a figure. Range: 72–600. Default: 300.
    ///
    /// Analyzer geometry is coarse; rendering at high resolution before the
    /// crop keeps small labels and axis ticks legible for the vision model.
    pub crop_dpi: u32,

    /// Multiplier from analyzer PDF units to PDF points. Default: 72.0.
    ///
    /// The layout service reports PDF polygons in inches; 72 converts them to
    /// points. Set to 1.0 when the analyzer already reports points.
    pub pdf_unit_scale: f32,

    /// Number of figures resolved concurrently. Default: 4.
    ///
    /// Size this to the vision endpoint's rate limit.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "azure", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed description generator. Takes precedence over every
    /// provider setting.
    pub describer: Option<Arc<dyn ImageDescriber>>,

    /// Sampling temperature for descriptions. Default: 0.1.
    pub temperature: f32,

    /// Token budget for one description. Default: 2000.
    pub max_tokens: usize,

    /// Retry attempts on a failed description call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound in seconds for the whole description step of one figure,
    /// retries and every region call included. 0 disables it. Default: 120.
    ///
    /// Expiry is recorded as a figure warning; the document carries on.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom vision system instruction. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Reuse or overwrite cached crops and descriptions. Default: [`CachePolicy::Reuse`].
    pub cache_policy: CachePolicy,

    /// How figures with several body regions are described. Default: [`RegionPolicy::Concatenate`].
    pub region_policy: RegionPolicy,

    /// Keep `<figure>`/`</figure>` around the substituted body. Default: false.
    pub keep_figure_tags: bool,

    /// Deepest header level that starts a section. Range: 1–8. Default: 8.
    pub max_header_level: u8,

    /// Optional per-figure progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::from("ingestion/images"),
            crop_dpi: 300,
            pdf_unit_scale: 72.0,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            describer: None,
            temperature: 0.1,
            max_tokens: 2000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            system_prompt: None,
            cache_policy: CachePolicy::default(),
            region_policy: RegionPolicy::default(),
            keep_figure_tags: false,
            max_header_level: 8,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("output_folder", &self.output_folder)
            .field("crop_dpi", &self.crop_dpi)
            .field("pdf_unit_scale", &self.pdf_unit_scale)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("describer", &self.describer.as_ref().map(|_| "<dyn ImageDescriber>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("cache_policy", &self.cache_policy)
            .field("region_policy", &self.region_policy)
            .field("keep_figure_tags", &self.keep_figure_tags)
            .field("max_header_level", &self.max_header_level)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl fmt::Debug for IngestConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl IngestConfigBuilder {
    pub fn output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.output_folder = folder.into();
        self
    }

    pub fn crop_dpi(mut self, dpi: u32) -> Self {
        self.config.crop_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn pdf_unit_scale(mut self, scale: f32) -> Self {
        self.config.pdf_unit_scale = scale;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn describer(mut self, describer: Arc<dyn ImageDescriber>) -> Self {
        self.config.describer = Some(describer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.cache_policy = policy;
        self
    }

    pub fn region_policy(mut self, policy: RegionPolicy) -> Self {
        self.config.region_policy = policy;
        self
    }

    pub fn keep_figure_tags(mut self, v: bool) -> Self {
        self.config.keep_figure_tags = v;
        self
    }

    pub fn max_header_level(mut self, level: u8) -> Self {
        self.config.max_header_level = level.clamp(1, 8);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, FigChunkError> {
        let c = &self.config;
        if c.crop_dpi < 72 || c.crop_dpi > 600 {
            return Err(FigChunkError::InvalidConfig(format!(
                "Crop DPI must be 72–600, got {}",
                c.crop_dpi
            )));
        }
        if !(c.pdf_unit_scale.is_finite() && c.pdf_unit_scale > 0.0) {
            return Err(FigChunkError::InvalidConfig(format!(
                "PDF unit scale must be positive, got {}",
                c.pdf_unit_scale
            )));
        }
        if c.concurrency == 0 {
            return Err(FigChunkError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.output_folder.as_os_str().is_empty() {
            return Err(FigChunkError::InvalidConfig(
                "Output folder must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What to do when a crop and description already exist on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Serve cached artifacts without calling the vision model. (default)
    #[default]
    Reuse,
    /// Recompute and rewrite every artifact.
    Overwrite,
}

/// How a figure with several non-caption regions is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionPolicy {
    /// One description per region, joined in region order. (default)
    #[default]
    Concatenate,
    /// Stack the region crops vertically and describe the composite once.
    Composite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = IngestConfig::default();
        assert_eq!(c.crop_dpi, 300);
        assert_eq!(c.max_tokens, 2000);
        assert_eq!(c.max_header_level, 8);
        assert_eq!(c.cache_policy, CachePolicy::Reuse);
        assert_eq!(c.region_policy, RegionPolicy::Concatenate);
    }

    #[test]
    fn builder_clamps() {
        let c = IngestConfig::builder()
            .crop_dpi(10_000)
            .concurrency(0)
            .max_header_level(12)
            .build()
            .unwrap();
        assert_eq!(c.crop_dpi, 600);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_header_level, 8);
    }

    #[test]
    fn rejects_bad_unit_scale() {
        let err = IngestConfig::builder().pdf_unit_scale(0.0).build().unwrap_err();
        assert!(matches!(err, FigChunkError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_output_folder() {
        assert!(IngestConfig::builder().output_folder("").build().is_err());
    }
}
