//! Configuration loading for flowdeck.
//!
//! Settings are resolved in two layers: an optional TOML file
//! (`flowdeck.toml`, or the path in `FLOWDECK_CONFIG`) supplies the base
//! values, then `FLOWDECK_*` environment variables override field by field.
//! Provider and model are chosen once here; everything downstream receives a
//! constructed [`ChatClient`] and never branches on provider identity again.
//!
//! ```toml
//! [ai]
//! provider = "anthropic"
//! model = "claude-3-5-sonnet-20241022"
//! anthropic_api_key = "sk-ant-..."
//!
//! [cache]
//! summary_ttl_secs = 300
//! dismissal_ttl_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use flowdeck_providers::ChatClient;

const DEFAULT_CONFIG_PATH: &str = "flowdeck.toml";

/// Context summaries stay cached for five minutes unless invalidated.
pub const DEFAULT_SUMMARY_TTL_SECS: u64 = 300;
/// Dismissal markers suppress re-suggesting a flow for one minute.
pub const DEFAULT_DISMISSAL_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }

    const fn api_key_env_var(self) -> &'static str {
        match self {
            Self::OpenAi => "FLOWDECK_OPENAI_API_KEY",
            Self::Anthropic => "FLOWDECK_ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported AI provider: {0}")]
    UnsupportedProvider(String),
    #[error("missing API key for provider {provider} (set {env_var})")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Raw file layer; every field optional so a partial file merges cleanly
/// with env overrides and defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    ai: AiFileConfig,
    cache: CacheFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AiFileConfig {
    provider: Option<String>,
    model: Option<String>,
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheFileConfig {
    summary_ttl_secs: Option<u64>,
    dismissal_ttl_secs: Option<u64>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub summary_ttl: Duration,
    pub dismissal_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ai: AiSettings,
    pub cache: CacheSettings,
}

impl Settings {
    /// Load from the default file location (if present) plus environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FLOWDECK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let file = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            FileConfig::read(&path)?
        } else {
            FileConfig::default()
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Load from an explicit file plus environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::resolve(FileConfig::read(path)?, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let provider_raw = env("FLOWDECK_AI_PROVIDER")
            .or(file.ai.provider)
            .unwrap_or_else(|| ProviderKind::OpenAi.as_str().to_string());
        let provider = ProviderKind::parse(&provider_raw)
            .ok_or(ConfigError::UnsupportedProvider(provider_raw))?;

        let model = env("FLOWDECK_AI_MODEL")
            .or(file.ai.model)
            .unwrap_or_else(|| provider.default_model().to_string());

        let file_key = match provider {
            ProviderKind::OpenAi => file.ai.openai_api_key,
            ProviderKind::Anthropic => file.ai.anthropic_api_key,
        };
        let api_key = env(provider.api_key_env_var()).or(file_key).ok_or(
            ConfigError::MissingApiKey {
                provider: provider.as_str(),
                env_var: provider.api_key_env_var(),
            },
        )?;

        let summary_ttl_secs = env("FLOWDECK_SUMMARY_TTL_SECS")
            .and_then(|raw| raw.parse().ok())
            .or(file.cache.summary_ttl_secs)
            .unwrap_or(DEFAULT_SUMMARY_TTL_SECS);
        let dismissal_ttl_secs = env("FLOWDECK_DISMISSAL_TTL_SECS")
            .and_then(|raw| raw.parse().ok())
            .or(file.cache.dismissal_ttl_secs)
            .unwrap_or(DEFAULT_DISMISSAL_TTL_SECS);

        tracing::info!(
            provider = provider.as_str(),
            model = %model,
            "resolved AI settings"
        );

        Ok(Self {
            ai: AiSettings {
                provider,
                model,
                api_key,
            },
            cache: CacheSettings {
                summary_ttl: Duration::from_secs(summary_ttl_secs),
                dismissal_ttl: Duration::from_secs(dismissal_ttl_secs),
            },
        })
    }

    /// Construct the provider client these settings select.
    #[must_use]
    pub fn chat_client(&self) -> ChatClient {
        match self.ai.provider {
            ProviderKind::OpenAi => ChatClient::openai(&self.ai.api_key, &self.ai.model),
            ProviderKind::Anthropic => ChatClient::anthropic(&self.ai.api_key, &self.ai.model),
        }
    }
}
