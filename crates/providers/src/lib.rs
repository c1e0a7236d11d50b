//! Model provider implementations for TripMate.
//!
//! All providers implement the `tripmate_core::Provider` trait.
//! `from_config` builds the configured provider.

pub mod openai_compat;

use std::sync::Arc;
use tripmate_config::AppConfig;
use tripmate_core::error::ProviderError;
use tripmate_core::provider::Provider;

pub use openai_compat::OpenAiCompatProvider;

/// Build the provider described by `config`.
///
/// Fails with [`ProviderError::NotConfigured`] when no API key is set, so
/// callers can refuse requests before any stream is opened.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            ProviderError::NotConfigured(
                "no model API key; set AI_GATEWAY_API_KEY or api_key in config.toml".into(),
            )
        })?;

    let provider = OpenAiCompatProvider::new("ai-gateway", &config.base_url, api_key)?;
    Ok(Arc::new(provider))
}
