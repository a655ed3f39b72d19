//! Vision description: turn a cropped figure into natural-language text.
//!
//! The vision model is an external collaborator behind [`ImageDescriber`].
//! [`VlmDescriber`] is the production implementation over an edgequake-llm
//! provider; tests and callers with their own model plug in any other
//! implementation through [`crate::config::IngestConfig::describer`].
//!
//! ## Retry Strategy
//!
//! Transient 429/503 errors are common when several figures are described at
//! once. Exponential backoff (`retry_backoff_ms * 2^attempt`) spreads the
//! retries out; the caller's timeout bounds the whole sequence.

use crate::config::IngestConfig;
use crate::error::FigChunkError;
use crate::pipeline::encode;
use crate::prompts::{describe_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// External vision-language model.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe a PNG-encoded image, optionally hinted by its caption.
    async fn describe(&self, png: &[u8], caption: Option<&str>) -> Result<String, FigChunkError>;
}

/// [`ImageDescriber`] backed by an edgequake-llm vision provider.
pub struct VlmDescriber {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl VlmDescriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &IngestConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

#[async_trait]
impl ImageDescriber for VlmDescriber {
    /// ## Message Layout
    ///
    /// 1. **System message** — the description instruction (or override)
    /// 2. **User message** — the caption-aware request text plus the PNG
    async fn describe(&self, png: &[u8], caption: Option<&str>) -> Result<String, FigChunkError> {
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(
                &describe_instruction(caption),
                vec![encode::image_data(png)],
            ),
        ];

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("Description retry {}/{} after {}ms", attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Described image: {} input tokens, {} output tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Description attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(FigChunkError::LlmApiError {
            message: format!(
                "failed after {} retries: {}",
                self.max_retries,
                last_err.unwrap_or_else(|| "Unknown error".to_string())
            ),
        })
    }
}

/// Build `CompletionOptions` from the ingestion config.
fn build_options(config: &IngestConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the description generator, from most-specific to least-specific.
///
/// 1. Pre-built describer (`config.describer`)
/// 2. Pre-built provider (`config.provider`)
/// 3. Named provider + model (`config.provider_name`)
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 5. `OPENAI_API_KEY` present → OpenAI
/// 6. `ProviderFactory::from_env`
pub fn resolve_describer(config: &IngestConfig) -> Result<Arc<dyn ImageDescriber>, FigChunkError> {
    if let Some(ref describer) = config.describer {
        return Ok(Arc::clone(describer));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(VlmDescriber::new(provider, config)))
}

fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, FigChunkError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FigChunkError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FigChunkError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FigChunkError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
