use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::providers::{find_seed, ProviderSeed, PROVIDER_SEEDS};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Identifier of a model backend. Unknown names become [`ProviderId::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderId {
    OpenAi,
    Gemini,
    Copilot,
    Anthropic,
    Custom(String),
}

impl ProviderId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Copilot => "copilot",
            Self::Anthropic => "anthropic",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "gemini" | "google" => Self::Gemini,
            "copilot" => Self::Copilot,
            "anthropic" => Self::Anthropic,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub text: bool,
    pub image: bool,
    pub audio: bool,
    pub video: bool,
    pub code: bool,
    pub realtime: bool,
}

/// Per-provider runtime configuration. The credential is never serialised.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: ProviderId,
    pub display_name: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub capabilities: ProviderCapabilities,
    pub credential_env: Option<String>,
    #[serde(skip)]
    secret: Option<String>,
}

impl ProviderSettings {
    pub fn from_seed(seed: &ProviderSeed) -> Self {
        Self {
            id: ProviderId::from(seed.id),
            display_name: seed.display.to_string(),
            base_url: Some(seed.base_url.to_string()),
            model: seed.default_model.to_string(),
            temperature: seed.temperature,
            max_tokens: seed.max_tokens,
            capabilities: seed.capabilities,
            credential_env: Some(seed.credential_env.to_string()),
            secret: None,
        }
    }

    /// Defaults for providers outside the built-in catalogue: text and code only.
    pub fn generic(id: ProviderId) -> Self {
        Self {
            display_name: id.to_string(),
            id,
            base_url: None,
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            capabilities: ProviderCapabilities {
                text: true,
                code: true,
                ..ProviderCapabilities::default()
            },
            credential_env: None,
            secret: None,
        }
    }

    /// Defaults for `id`, taken from the seed table when it is a known vendor.
    pub fn defaults_for(id: &ProviderId) -> Self {
        find_seed(id.as_str())
            .map(Self::from_seed)
            .unwrap_or_else(|| Self::generic(id.clone()))
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let trimmed = secret.trim();
        self.secret = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn has_credentials(&self) -> bool {
        self.secret.is_some()
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("capabilities", &self.capabilities)
            .field("has_credentials", &self.has_credentials())
            .finish()
    }
}

/// Process-level configuration for the AI core.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Provider used when a call gives no explicit hint.
    pub default_provider: ProviderId,
    pub code_provider: ProviderId,
    pub vision_provider: ProviderId,
    /// Providers queried concurrently for code completions.
    pub suggestion_candidates: Vec<ProviderId>,
    /// Deadline applied to provider calls unless a call overrides it.
    pub request_timeout: Option<Duration>,
    pub providers: Vec<ProviderSettings>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderId::Gemini,
            code_provider: ProviderId::Copilot,
            vision_provider: ProviderId::Gemini,
            suggestion_candidates: vec![
                ProviderId::Copilot,
                ProviderId::OpenAi,
                ProviderId::Gemini,
            ],
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            providers: PROVIDER_SEEDS.iter().map(ProviderSettings::from_seed).collect(),
        }
    }
}

impl AiConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `ASAGENTS_DEFAULT_PROVIDER`, `ASAGENTS_CODE_PROVIDER`,
    /// `ASAGENTS_VISION_PROVIDER`, `ASAGENTS_SUGGESTION_PROVIDERS` (comma
    /// separated), `ASAGENTS_REQUEST_TIMEOUT_SECS` (`0` disables the deadline)
    /// and the per-vendor credential/base-url variables of the seed table.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = read("ASAGENTS_DEFAULT_PROVIDER") {
            config.default_provider = ProviderId::from(value);
        }
        if let Some(value) = read("ASAGENTS_CODE_PROVIDER") {
            config.code_provider = ProviderId::from(value);
        }
        if let Some(value) = read("ASAGENTS_VISION_PROVIDER") {
            config.vision_provider = ProviderId::from(value);
        }
        if let Some(value) = read("ASAGENTS_SUGGESTION_PROVIDERS") {
            let candidates: Vec<ProviderId> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ProviderId::from)
                .collect();
            if candidates.is_empty() {
                return Err(anyhow!("ASAGENTS_SUGGESTION_PROVIDERS lists no providers"));
            }
            config.suggestion_candidates = candidates;
        }
        if let Some(value) = read("ASAGENTS_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("invalid ASAGENTS_REQUEST_TIMEOUT_SECS value {value:?}"))?;
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        for settings in &mut config.providers {
            let Some(seed) = find_seed(settings.id.as_str()) else {
                continue;
            };
            if let Some(url) = read(seed.base_url_env) {
                settings.base_url = Some(url.trim_end_matches('/').to_string());
            }
            if let Some(secret) = read(seed.credential_env) {
                *settings = settings.clone().with_secret(secret);
            }
        }

        Ok(config)
    }

    pub fn settings(&self, id: &ProviderId) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| &p.id == id)
    }

    /// Providers that have a credential and can be registered as live backends.
    pub fn configured_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.has_credentials())
    }
}
