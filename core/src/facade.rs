//! Single entry point that wires the AI subsystems together for a host
//! application. The host builds one [`AiSystem`] and passes it around; there
//! is no process-wide instance.

use std::sync::Arc;

use anyhow::Context;
use log::Level;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::config::{AiConfig, ProviderId};
use crate::agents::contract::{MediaKind, MediaReference, MultimodalInput};
use crate::agents::registry::ProviderRegistry;
use crate::agents::vendors::HttpProvider;
use crate::development::{CodeContext, CodeSuggestion, CursorPosition, SuggestionOrchestrator};
use crate::errors::Result;
use crate::language::{
    BasicLanguageDetector, DetectedLanguage, LanguageProcessor, MultilingualContentManager,
};
use crate::logging::log_event;
use crate::model_manager::{ConversationManager, SendOptions};
use crate::multimodal::{MultimodalNormalizer, SpeechToText, TextExtractor};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    pub conversation_id: String,
    pub provider: ProviderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub providers_registered: usize,
    pub conversations_active: usize,
    /// The default provider is registered, so translation can run.
    pub language_support: bool,
    /// The vision provider is registered and accepts images.
    pub multimodal_support: bool,
    /// At least one suggestion candidate is registered.
    pub development_tools_ready: bool,
}

pub struct AiSystem {
    config: AiConfig,
    registry: Arc<ProviderRegistry>,
    conversations: Arc<ConversationManager>,
    language: Arc<LanguageProcessor>,
    content: MultilingualContentManager,
    detector: BasicLanguageDetector,
    multimodal: MultimodalNormalizer,
    development: SuggestionOrchestrator,
}

impl AiSystem {
    /// Wire the subsystems around an existing registry.
    pub fn new(config: AiConfig, registry: Arc<ProviderRegistry>) -> Self {
        let conversations = ConversationManager::new(Arc::clone(&registry), &config);
        let language = Arc::new(LanguageProcessor::new(Arc::clone(&registry), &config));
        let multimodal = MultimodalNormalizer::new(Arc::clone(&conversations), &config);
        let development =
            SuggestionOrchestrator::new(Arc::clone(&conversations), Arc::clone(&language), &config);
        let content = MultilingualContentManager::new(Arc::clone(&language));
        Self {
            config,
            registry,
            conversations,
            language,
            content,
            detector: BasicLanguageDetector::new(),
            multimodal,
            development,
        }
    }

    /// Build a registry holding an HTTP provider for every vendor that has a
    /// credential in `config`.
    pub fn from_config(config: AiConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(ProviderRegistry::with_config(&config));
        for settings in config.configured_providers() {
            let provider = HttpProvider::new(settings.clone(), config.request_timeout)
                .with_context(|| format!("failed to initialise provider {}", settings.id))?;
            registry.register(Arc::new(provider));
        }

        if registry.is_empty() {
            log_event(
                Level::Warn,
                Some("AI-0100"),
                "ai.runtime",
                "No AI provider credentials configured",
                Some("Set a vendor API key such as GEMINI_API_KEY to enable providers"),
                None,
            );
        } else {
            let ids: Vec<String> = registry.ids().iter().map(ToString::to_string).collect();
            log_event(
                Level::Info,
                Some("AI-0101"),
                "ai.runtime",
                "AI providers registered",
                None,
                Some(json!({ "providers": ids })),
            );
        }
        Ok(Self::new(config, registry))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_config(AiConfig::from_env()?)
    }

    pub fn with_speech_to_text(mut self, backend: Arc<dyn SpeechToText>) -> Self {
        self.multimodal = self.multimodal.with_speech_to_text(backend);
        self
    }

    pub fn with_text_extractor(mut self, backend: Arc<dyn TextExtractor>) -> Self {
        self.multimodal = self.multimodal.with_text_extractor(backend);
        self
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn multimodal(&self) -> &MultimodalNormalizer {
        &self.multimodal
    }

    pub fn development(&self) -> &SuggestionOrchestrator {
        &self.development
    }

    pub fn language(&self) -> &LanguageProcessor {
        &self.language
    }

    /// Keyed UI-content translations.
    pub fn content(&self) -> &MultilingualContentManager {
        &self.content
    }

    /// Send `message` into `conversation_id`, or into a new "Quick Chat"
    /// conversation whose id is returned in the reply. A new conversation is
    /// removed again if the very first exchange fails.
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        provider: Option<ProviderId>,
    ) -> Result<ChatReply> {
        let (conversation_id, created) = match conversation_id {
            Some(id) => (id.to_string(), false),
            None => (
                self.conversations
                    .create_conversation("Quick Chat", "general", "auto"),
                true,
            ),
        };
        let mut options = SendOptions::new();
        if let Some(provider) = provider {
            options = options.provider(provider);
        }

        match self
            .conversations
            .send_message(&conversation_id, message, options)
            .await
        {
            Ok(response) => Ok(ChatReply {
                content: response.content,
                conversation_id,
                provider: response.provider,
            }),
            Err(err) => {
                if created {
                    self.conversations.delete_conversation(&conversation_id);
                }
                Err(err)
            }
        }
    }

    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<String> {
        let translation = self
            .language
            .translate(text, target_language, Some(context.unwrap_or("General translation")))
            .await?;
        Ok(translation.translated_text)
    }

    pub fn detect_language(&self, text: &str) -> DetectedLanguage {
        self.detector.detect(text)
    }

    /// Review `code` with the configured code provider in a throwaway
    /// conversation.
    pub async fn analyze_code(
        &self,
        code: &str,
        language: &str,
        filename: Option<&str>,
    ) -> Result<String> {
        let temp = self
            .conversations
            .temporary("Code Analysis", "technical", "en");
        let origin = filename
            .map(|name| format!(" from file \"{name}\""))
            .unwrap_or_default();
        let prompt = format!(
            "Please analyze this {language} code{origin}:\n\n```{language}\n{code}\n```\n\n\
             Provide insights about:\n\
             1. Code quality and best practices\n\
             2. Potential bugs or issues\n\
             3. Performance optimizations\n\
             4. Suggestions for improvement"
        );
        let response = self
            .conversations
            .send_message(
                temp.id(),
                &prompt,
                SendOptions::new().provider(self.config.code_provider.clone()),
            )
            .await?;
        Ok(response.content)
    }

    /// Describe `image`, or answer `question` about it, with the vision
    /// provider.
    pub async fn process_image(
        &self,
        image: &MediaReference,
        question: Option<&str>,
    ) -> Result<String> {
        let vision = self.config.vision_provider.clone();
        let analysis = self
            .multimodal
            .analyze_image(image, Some(vision.clone()))
            .await?;
        let Some(question) = question else {
            return Ok(analysis.description);
        };

        let temp = self
            .conversations
            .temporary("Image Analysis", "technical", "en");
        let prompt = format!(
            "Based on this image analysis: \"{}\", please answer: {question}",
            analysis.description
        );
        let input = MultimodalInput {
            images: vec![image.clone()],
            ..MultimodalInput::default()
        };
        let response = self
            .conversations
            .send_message(temp.id(), &prompt, SendOptions::new().provider(vision).input(input))
            .await?;
        Ok(response.content)
    }

    pub async fn code_completions(
        &self,
        context: &CodeContext,
        cursor: CursorPosition,
    ) -> Vec<CodeSuggestion> {
        self.development.code_completions(context, cursor).await
    }

    pub fn system_status(&self) -> SystemStatus {
        let vision_ready = self
            .registry
            .get(&self.config.vision_provider)
            .map(|provider| provider.supports(MediaKind::Image))
            .unwrap_or(false);
        SystemStatus {
            providers_registered: self.registry.len(),
            conversations_active: self.conversations.list_conversations().len(),
            language_support: self.registry.contains(&self.config.default_provider),
            multimodal_support: vision_ready,
            development_tools_ready: self
                .development
                .candidates()
                .iter()
                .any(|id| self.registry.contains(id)),
        }
    }
}
