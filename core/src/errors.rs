use std::time::Duration;

use thiserror::Error;

use crate::agents::config::ProviderId;
use crate::agents::contract::MediaKind;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Provider {0} is not registered")]
    ProviderNotRegistered(ProviderId),
    #[error("Provider {provider} is unavailable: {reason}")]
    ProviderUnavailable { provider: ProviderId, reason: String },
    #[error("Provider {provider} request failed: {reason}")]
    ProviderRequestFailed { provider: ProviderId, reason: String },
    #[error("Provider {provider} timed out after {}ms", .after.as_millis())]
    ProviderTimeout { provider: ProviderId, after: Duration },
    #[error("Provider {provider} does not support {kind} input")]
    UnsupportedCapability { provider: ProviderId, kind: MediaKind },
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("No speech-to-text backend is configured")]
    TranscriptionUnavailable,
    #[error("Speech-to-text backend {backend} failed: {reason}")]
    TranscriptionFailed { backend: String, reason: String },
    #[error("Development environment not found: {0}")]
    EnvironmentNotFound(String),
}

impl AiError {
    pub(crate) fn request_failed(provider: &ProviderId, reason: impl Into<String>) -> Self {
        Self::ProviderRequestFailed {
            provider: provider.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(provider: &ProviderId, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.clone(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderNotRegistered(_) => "AI-1001",
            Self::ProviderUnavailable { .. } => "AI-1002",
            Self::ProviderRequestFailed { .. } => "AI-1003",
            Self::ProviderTimeout { .. } => "AI-1004",
            Self::UnsupportedCapability { .. } => "AI-1005",
            Self::ConversationNotFound(_) => "CNV-1001",
            Self::TranscriptionUnavailable => "MMD-1001",
            Self::TranscriptionFailed { .. } => "MMD-1002",
            Self::EnvironmentNotFound(_) => "DEV-1001",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::ProviderNotRegistered(_) => "No implementation is bound to the requested provider id.",
            Self::ProviderUnavailable { .. } => "The provider exists but is not configured, usually a missing credential.",
            Self::ProviderRequestFailed { .. } => "The provider call failed in transport or returned a malformed response.",
            Self::ProviderTimeout { .. } => "The provider did not answer before the caller's deadline.",
            Self::UnsupportedCapability { .. } => "The chosen provider does not declare support for this media kind.",
            Self::ConversationNotFound(_) => "The conversation id is unknown or the conversation was deleted.",
            Self::TranscriptionUnavailable => "Voice input needs a speech-to-text backend and none is wired in.",
            Self::TranscriptionFailed { .. } => "The speech-to-text backend could not transcribe the audio.",
            Self::EnvironmentNotFound(_) => "The development environment id has not been registered.",
        }
    }

    /// Provider that the failure is attributed to, when there is one.
    pub fn provider(&self) -> Option<&ProviderId> {
        match self {
            Self::ProviderNotRegistered(provider)
            | Self::ProviderUnavailable { provider, .. }
            | Self::ProviderRequestFailed { provider, .. }
            | Self::ProviderTimeout { provider, .. }
            | Self::UnsupportedCapability { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_kind() {
        let provider = ProviderId::Gemini;
        let errors = [
            AiError::ProviderNotRegistered(provider.clone()),
            AiError::unavailable(&provider, "missing key"),
            AiError::request_failed(&provider, "bad json"),
            AiError::ProviderTimeout {
                provider: provider.clone(),
                after: Duration::from_millis(10),
            },
            AiError::UnsupportedCapability {
                provider: provider.clone(),
                kind: MediaKind::Video,
            },
            AiError::ConversationNotFound("c".into()),
            AiError::TranscriptionUnavailable,
            AiError::TranscriptionFailed {
                backend: "whisper".into(),
                reason: "bad codec".into(),
            },
            AiError::EnvironmentNotFound("vim".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(AiError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn timeout_message_reports_deadline() {
        let err = AiError::ProviderTimeout {
            provider: ProviderId::OpenAi,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Provider openai timed out after 250ms");
        assert_eq!(err.provider(), Some(&ProviderId::OpenAi));
    }
}
