//! Built-in provider catalogue used to seed [`super::config::AiConfig`].

use super::config::ProviderCapabilities;

pub struct ProviderSeed {
    pub id: &'static str,
    pub display: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
    pub capabilities: ProviderCapabilities,
    /// Environment variable holding the API credential.
    pub credential_env: &'static str,
    /// Environment variable that may override `base_url`.
    pub base_url_env: &'static str,
}

pub const PROVIDER_SEEDS: &[ProviderSeed] = &[
    ProviderSeed {
        id: "gemini",
        display: "Google Gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        default_model: "gemini-1.5-pro",
        temperature: 0.7,
        max_tokens: 4000,
        capabilities: ProviderCapabilities {
            text: true,
            image: true,
            audio: true,
            video: true,
            code: true,
            realtime: false,
        },
        credential_env: "GEMINI_API_KEY",
        base_url_env: "GEMINI_BASE_URL",
    },
    ProviderSeed {
        id: "openai",
        display: "OpenAI",
        base_url: "https://api.openai.com",
        default_model: "gpt-4-turbo-preview",
        temperature: 0.7,
        max_tokens: 4000,
        capabilities: ProviderCapabilities {
            text: true,
            image: true,
            audio: true,
            video: false,
            code: true,
            realtime: true,
        },
        credential_env: "OPENAI_API_KEY",
        base_url_env: "OPENAI_BASE_URL",
    },
    ProviderSeed {
        id: "copilot",
        display: "GitHub Copilot",
        base_url: "https://api.githubcopilot.com",
        default_model: "gpt-4-copilot",
        temperature: 0.3,
        max_tokens: 2000,
        capabilities: ProviderCapabilities {
            text: true,
            image: false,
            audio: false,
            video: false,
            code: true,
            realtime: true,
        },
        credential_env: "COPILOT_API_KEY",
        base_url_env: "COPILOT_BASE_URL",
    },
    ProviderSeed {
        id: "anthropic",
        display: "Anthropic",
        base_url: "https://api.anthropic.com",
        default_model: "claude-3-opus",
        temperature: 0.7,
        max_tokens: 4000,
        capabilities: ProviderCapabilities {
            text: true,
            image: true,
            audio: false,
            video: false,
            code: true,
            realtime: false,
        },
        credential_env: "ANTHROPIC_API_KEY",
        base_url_env: "ANTHROPIC_BASE_URL",
    },
];

pub fn find_seed(id: &str) -> Option<&'static ProviderSeed> {
    PROVIDER_SEEDS.iter().find(|seed| seed.id == id)
}
