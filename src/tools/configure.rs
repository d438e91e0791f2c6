use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::{EndpointSettings, ProviderPreset};

/// Partial update of the endpoint settings. Omitted fields keep their value.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ConfigureRequest {
    /// Endpoint preset: "openrouter", "openai" or "custom". Switching preset
    /// resets the base URL and model to the preset's defaults unless given.
    pub provider: Option<ProviderPreset>,
    /// OpenAI-compatible base URL, e.g. https://openrouter.ai/api/v1
    pub base_url: Option<String>,
    /// API key for the endpoint. Never echoed back.
    pub api_key: Option<String>,
    /// Model identifier, e.g. qwen/qwen-2.5-72b-instruct
    pub model_name: Option<String>,
}

impl ConfigureRequest {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.base_url.is_none()
            && self.api_key.is_none()
            && self.model_name.is_none()
    }

    /// Apply to `current`, returning the updated settings.
    pub fn apply(&self, current: &EndpointSettings) -> EndpointSettings {
        let mut next = current.clone();
        if let Some(preset) = self.provider
            && preset != current.provider
        {
            next.provider = preset;
            next.base_url = preset.base_url().unwrap_or_default().to_string();
            next.model_name = preset.models().first().copied().unwrap_or_default().to_string();
        }
        if let Some(url) = &self.base_url {
            next.base_url = url.trim().to_string();
        }
        if let Some(key) = &self.api_key {
            next.api_key = key.trim().to_string();
        }
        if let Some(model) = &self.model_name {
            next.model_name = model.trim().to_string();
        }
        next
    }
}
