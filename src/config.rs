use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dispatch::StreamRequest;
use crate::dispatch::providers::{AppIdentity, ProviderProfile, ProviderTable};
use crate::error::KilnError;

/// Config file read from the working directory when `KILN_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";
/// Model used when neither the settings nor the preset name one.
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_MIN_SUBMIT_INTERVAL_MS: u64 = 1000;
pub const MIN_API_KEY_LEN: usize = 10;

/// Known endpoint presets. `Custom` leaves everything to the user.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreset {
    #[default]
    OpenRouter,
    OpenAi,
    Custom,
}

impl ProviderPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Custom => None,
        }
    }

    /// Suggested models, most preferred first.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenRouter => &[
                "qwen/qwen-2.5-72b-instruct",
                "anthropic/claude-3-opus",
                "anthropic/claude-3-sonnet",
                "openai/gpt-4",
                "openai/gpt-4-turbo",
                "openai/gpt-3.5-turbo",
                "google/gemini-pro",
                "meta-llama/llama-3-70b-instruct",
            ],
            Self::OpenAi => &["gpt-4", "gpt-4-turbo", "gpt-4o", "gpt-3.5-turbo"],
            Self::Custom => &[],
        }
    }
}

/// The resolved endpoint triple plus the preset it came from.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointSettings {
    pub provider: ProviderPreset,
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
}

impl std::fmt::Debug for EndpointSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSettings")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl EndpointSettings {
    /// Fill an empty base URL and model from the preset, then `DEFAULT_MODEL`.
    pub fn resolved(&self) -> Self {
        let mut out = self.clone();
        if out.base_url.trim().is_empty()
            && let Some(url) = self.provider.base_url()
        {
            out.base_url = url.to_string();
        }
        if out.model_name.trim().is_empty() {
            out.model_name = self
                .provider
                .models()
                .first()
                .copied()
                .unwrap_or(DEFAULT_MODEL)
                .to_string();
        }
        out
    }

    /// Check the triple before any network call.
    pub fn validate(&self, providers: &ProviderTable) -> Result<(), KilnError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(KilnError::Configuration("base URL is not set".to_string()));
        }
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|_| KilnError::Configuration(format!("base URL is not valid: {base_url}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(KilnError::Configuration(format!(
                "base URL must use http or https: {base_url}"
            )));
        }

        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(KilnError::Configuration("API key is not set".to_string()));
        }
        if key.len() < MIN_API_KEY_LEN {
            return Err(KilnError::Configuration(format!(
                "API key must be at least {MIN_API_KEY_LEN} characters"
            )));
        }
        if let Some(profile) = providers.lookup_url(base_url)
            && let Some(prefix) = profile.key_prefix.as_deref()
            && !key.starts_with(prefix)
        {
            return Err(KilnError::Configuration(format!(
                "{} API keys start with '{prefix}'",
                profile.name
            )));
        }

        if self.model_name.trim().is_empty() {
            return Err(KilnError::Configuration("model name is not set".to_string()));
        }
        Ok(())
    }

    /// Resolve, validate and build the request for one prompt.
    pub fn to_request(
        &self,
        prompt: impl Into<String>,
        providers: &ProviderTable,
    ) -> Result<StreamRequest, KilnError> {
        let resolved = self.resolved();
        resolved.validate(providers)?;
        StreamRequest::new(
            prompt,
            &resolved.base_url,
            &resolved.api_key,
            &resolved.model_name,
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    pub min_submit_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            min_submit_interval_ms: DEFAULT_MIN_SUBMIT_INTERVAL_MS,
        }
    }
}

impl SessionSettings {
    pub fn min_submit_interval(&self) -> Duration {
        Duration::from_millis(self.min_submit_interval_ms)
    }
}

/// On-disk shape of `kiln.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub endpoint: EndpointSettings,
    pub session: SessionSettings,
    pub app: AppIdentity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderProfile>,
}

pub struct Config {
    pub endpoint: EndpointSettings,
    pub session: SessionSettings,
    pub app: AppIdentity,
    pub providers: ProviderTable,
    /// Where `configure` persists endpoint changes.
    pub config_path: PathBuf,
}

impl Config {
    /// Load `kiln.toml` (or `$KILN_CONFIG`) and apply `KILN_*` env overrides.
    /// A missing or unreadable file falls back to defaults with a warning.
    pub fn load() -> Self {
        let path = env::var("KILN_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let file = if path.exists() {
            match read_file_config(&path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("ignoring {}: {e}", path.display());
                    FileConfig::default()
                }
            }
        } else {
            tracing::info!("no config file at {}, using defaults", path.display());
            FileConfig::default()
        };

        let mut config = Self::from_file_config(file, path);
        config.apply_overrides(|key| env::var(key).ok());

        if config.endpoint.api_key.trim().is_empty() {
            tracing::warn!("KILN_API_KEY not set, generation unavailable until configured");
        }
        config
    }

    pub fn from_file_config(file: FileConfig, config_path: PathBuf) -> Self {
        Self {
            endpoint: file.endpoint,
            session: file.session,
            app: file.app,
            providers: ProviderTable::builtin().with_profiles(file.providers),
            config_path,
        }
    }

    /// Apply `KILN_*` overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("KILN_PROVIDER") {
            match ProviderPreset::parse(&value) {
                Some(preset) => self.endpoint.provider = preset,
                None => tracing::warn!("unknown KILN_PROVIDER '{value}', keeping {}", self.endpoint.provider.as_str()),
            }
        }
        if let Some(value) = get("KILN_BASE_URL") {
            self.endpoint.base_url = value;
        }
        if let Some(value) = get("KILN_API_KEY") {
            self.endpoint.api_key = value;
        }
        if let Some(value) = get("KILN_MODEL") {
            self.endpoint.model_name = value;
        }
        if let Some(value) = get("KILN_MIN_SUBMIT_INTERVAL_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.session.min_submit_interval_ms = ms,
                Err(_) => tracing::warn!("KILN_MIN_SUBMIT_INTERVAL_MS is not a number: {value}"),
            }
        }
    }
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, KilnError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        KilnError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map_err(|e| KilnError::Configuration(format!("cannot parse {}: {e}", path.display())))
}

/// Persist the endpoint triple, keeping every other section of the file.
pub fn save_endpoint(path: &Path, endpoint: &EndpointSettings) -> Result<(), KilnError> {
    let mut file = if path.exists() {
        read_file_config(path)?
    } else {
        FileConfig::default()
    };
    file.endpoint = endpoint.clone();

    let raw = toml::to_string_pretty(&file)
        .map_err(|e| KilnError::Configuration(format!("cannot serialize config: {e}")))?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            KilnError::Configuration(format!("cannot create {}: {e}", dir.display()))
        })?;
    }
    std::fs::write(path, raw)
        .map_err(|e| KilnError::Configuration(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_fills_missing_url_and_model() {
        let settings = EndpointSettings {
            provider: ProviderPreset::OpenAi,
            api_key: "sk-0123456789".to_string(),
            ..Default::default()
        };
        let resolved = settings.resolved();
        assert_eq!(resolved.base_url, "https://api.openai.com/v1");
        assert_eq!(resolved.model_name, "gpt-4");
    }

    #[test]
    fn custom_preset_falls_back_to_default_model() {
        let settings = EndpointSettings {
            provider: ProviderPreset::Custom,
            ..Default::default()
        };
        let resolved = settings.resolved();
        assert_eq!(resolved.base_url, "");
        assert_eq!(resolved.model_name, DEFAULT_MODEL);
    }

    #[test]
    fn openrouter_key_prefix_is_enforced() {
        let settings = EndpointSettings {
            provider: ProviderPreset::OpenRouter,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: "sk-0123456789".to_string(),
            model_name: "openai/gpt-4".to_string(),
        };
        let err = settings.validate(&ProviderTable::builtin()).unwrap_err();
        assert!(err.to_string().contains("sk-or-"), "{err}");
    }

    #[test]
    fn short_key_is_rejected() {
        let settings = EndpointSettings {
            provider: ProviderPreset::Custom,
            base_url: "https://llm.internal/v1".to_string(),
            api_key: "short".to_string(),
            model_name: "m".to_string(),
        };
        assert!(matches!(
            settings.validate(&ProviderTable::builtin()),
            Err(KilnError::Configuration(_))
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::from_file_config(FileConfig::default(), PathBuf::from("x.toml"));
        config.apply_overrides(|key| match key {
            "KILN_PROVIDER" => Some("openai".to_string()),
            "KILN_MODEL" => Some("gpt-4o".to_string()),
            "KILN_BASE_URL" => Some("   ".to_string()),
            "KILN_MIN_SUBMIT_INTERVAL_MS" => Some("250".to_string()),
            _ => None,
        });
        assert_eq!(config.endpoint.provider, ProviderPreset::OpenAi);
        assert_eq!(config.endpoint.model_name, "gpt-4o");
        assert_eq!(config.endpoint.base_url, "");
        assert_eq!(config.session.min_submit_interval(), Duration::from_millis(250));
    }
}
