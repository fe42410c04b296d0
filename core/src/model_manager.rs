//! Conversation-level AI routing.
//!
//! The manager owns the conversation arena, picks a provider for each call and
//! records both sides of every exchange. It never retries on another provider:
//! a failing backend is reported to the caller, who decides on any fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::Level;
use serde_json::json;

use crate::agents::config::{AiConfig, ProviderId};
use crate::agents::contract::{
    ensure_supported, AiResponse, ChunkSink, Message, MultimodalInput, ProviderContract,
};
use crate::agents::registry::ProviderRegistry;
use crate::conversation::{Conversation, ConversationStore, ConversationSummary};
use crate::errors::{AiError, Result};
use crate::logging::log_event;

/// Per-call options for [`ConversationManager::send_message`] and
/// [`ConversationManager::stream_message`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub input: Option<MultimodalInput>,
    pub provider: Option<ProviderId>,
    /// Overrides the manager's default deadline for this call.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn input(mut self, input: MultimodalInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct ConversationManager {
    store: ConversationStore,
    registry: Arc<ProviderRegistry>,
    default_provider: ProviderId,
    default_timeout: Option<Duration>,
}

impl ConversationManager {
    pub fn new(registry: Arc<ProviderRegistry>, config: &AiConfig) -> Arc<Self> {
        Arc::new(Self {
            store: ConversationStore::new(),
            registry,
            default_provider: config.default_provider.clone(),
            default_timeout: config.request_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Provider used when a call carries no hint.
    pub fn default_provider(&self) -> &ProviderId {
        &self.default_provider
    }

    pub fn create_conversation(&self, title: &str, category: &str, language_hint: &str) -> String {
        let id = self.store.create(title, category, language_hint);
        log::debug!("created conversation {id} ({category})");
        id
    }

    /// Create a conversation that is deleted when the returned guard drops.
    pub fn temporary(
        &self,
        title: &str,
        category: &str,
        language_hint: &str,
    ) -> TemporaryConversation<'_> {
        TemporaryConversation {
            manager: self,
            id: self.create_conversation(title, category, language_hint),
        }
    }

    /// Remove a conversation. Deleting an unknown or already deleted id is a no-op.
    pub fn delete_conversation(&self, conversation_id: &str) {
        if self.store.delete(conversation_id) {
            log::debug!("deleted conversation {conversation_id}");
        }
    }

    pub fn list_conversations(&self) -> Vec<ConversationSummary> {
        self.store.list()
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.store.get(conversation_id)
    }

    pub fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.store.history(conversation_id)
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<usize> {
        self.store.message_count(conversation_id)
    }

    /// Send `text` and wait for the complete answer.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<AiResponse> {
        self.ensure_exists(conversation_id)?;
        let provider = self.select_provider(options.provider.as_ref())?;
        let provider_id = provider.id();
        ensure_supported(&provider_id, &provider.capabilities(), options.input.as_ref())?;
        let prompt = self.record_user_turn(conversation_id, text, options.input.as_ref())?;
        let deadline = options.timeout.or(self.default_timeout);

        let result = with_deadline(
            &provider_id,
            deadline,
            provider.send(&prompt, options.input.as_ref()),
        )
        .await;
        let response = self.observe(&provider_id, conversation_id, result)?;
        self.record_assistant_turn(conversation_id, &response)?;
        Ok(response)
    }

    /// Send `text` and forward the answer to `on_chunk` as it arrives.
    ///
    /// The stored assistant message and the returned content are the
    /// concatenation of the chunks delivered to `on_chunk`.
    pub async fn stream_message(
        &self,
        conversation_id: &str,
        text: &str,
        on_chunk: ChunkSink<'_>,
        options: SendOptions,
    ) -> Result<AiResponse> {
        self.ensure_exists(conversation_id)?;
        let provider = self.select_provider(options.provider.as_ref())?;
        let provider_id = provider.id();
        ensure_supported(&provider_id, &provider.capabilities(), options.input.as_ref())?;
        let prompt = self.record_user_turn(conversation_id, text, options.input.as_ref())?;
        let deadline = options.timeout.or(self.default_timeout);

        let mut delivered = String::new();
        let result = {
            let mut forward = |chunk: &str| {
                delivered.push_str(chunk);
                on_chunk(chunk);
            };
            with_deadline(
                &provider_id,
                deadline,
                provider.stream(&prompt, options.input.as_ref(), &mut forward),
            )
            .await
        };
        let mut response = self.observe(&provider_id, conversation_id, result)?;
        if response.content != delivered {
            log::warn!(
                "provider {provider_id} returned {} bytes but streamed {}; keeping the streamed text",
                response.content.len(),
                delivered.len()
            );
            response.content = delivered;
        }
        self.record_assistant_turn(conversation_id, &response)?;
        Ok(response)
    }

    fn ensure_exists(&self, conversation_id: &str) -> Result<()> {
        if self.store.contains(conversation_id) {
            Ok(())
        } else {
            Err(AiError::ConversationNotFound(conversation_id.to_string()))
        }
    }

    fn select_provider(&self, hint: Option<&ProviderId>) -> Result<Arc<dyn ProviderContract>> {
        self.registry.get(hint.unwrap_or(&self.default_provider))
    }

    /// Append the user message and return the prompt: category system
    /// prompt followed by the history up to and including that message.
    fn record_user_turn(
        &self,
        conversation_id: &str,
        text: &str,
        input: Option<&MultimodalInput>,
    ) -> Result<Vec<Message>> {
        let conversation = self.store.get(conversation_id)?;
        let mut message = Message::user(text);
        if let Some((kind, media)) = input.and_then(MultimodalInput::primary_media) {
            message.media_kind = Some(kind);
            message.media_reference = Some(media.label());
        }
        if !conversation.language_hint.is_empty() && conversation.language_hint != "auto" {
            message.language = Some(conversation.language_hint.clone());
        }
        let stored = self.store.append(conversation_id, message)?;

        let mut history = self.store.history(conversation_id)?;
        if let Some(pos) = history.iter().position(|m| m.id == stored.id) {
            history.truncate(pos + 1);
        }
        let mut prompt = Vec::with_capacity(history.len() + 1);
        prompt.push(Message::system(system_prompt(
            &conversation.category,
            &conversation.language_hint,
        )));
        prompt.extend(history);
        Ok(prompt)
    }

    fn record_assistant_turn(&self, conversation_id: &str, response: &AiResponse) -> Result<()> {
        let mut message = Message::assistant(response.content.clone());
        message.provider = Some(response.provider.clone());
        match self.store.append(conversation_id, message) {
            Ok(_) => Ok(()),
            Err(err) => {
                log_event(
                    Level::Warn,
                    Some("AI-0202"),
                    "ai.conversation",
                    "Discarded response for a deleted conversation",
                    Some("The conversation was deleted while the provider call was in flight"),
                    Some(json!({
                        "conversation_id": conversation_id,
                        "provider": response.provider.as_str(),
                        "response_id": response.id,
                    })),
                );
                Err(err)
            }
        }
    }

    fn observe(
        &self,
        provider_id: &ProviderId,
        conversation_id: &str,
        result: Result<AiResponse>,
    ) -> Result<AiResponse> {
        match &result {
            Ok(response) => {
                if &response.provider != provider_id {
                    log::warn!(
                        "provider {provider_id} reported its response as {}",
                        response.provider
                    );
                }
                log_invocation_success(provider_id, conversation_id, response);
            }
            Err(err) => log_invocation_failure(provider_id, conversation_id, err),
        }
        result
    }
}

/// Conversation that exists only for the lifetime of this guard.
///
/// Dropping the guard deletes the conversation, whether the owning code
/// returned normally, bailed out with an error or was cancelled.
pub struct TemporaryConversation<'a> {
    manager: &'a ConversationManager,
    id: String,
}

impl TemporaryConversation<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for TemporaryConversation<'_> {
    fn drop(&mut self) {
        self.manager.delete_conversation(&self.id);
    }
}

pub(crate) async fn with_deadline<F>(
    provider: &ProviderId,
    deadline: Option<Duration>,
    call: F,
) -> Result<AiResponse>
where
    F: Future<Output = Result<AiResponse>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| AiError::ProviderTimeout {
                provider: provider.clone(),
                after: limit,
            })?,
        None => call.await,
    }
}

fn system_prompt(category: &str, language_hint: &str) -> String {
    let base = match category {
        "technical" => "You are a technical assistant for a construction management platform. Give precise, actionable answers and include code when it helps.",
        "safety" => "You are a construction site safety advisor. Reference recognised safety practice and flag hazards clearly.",
        "project" => "You are a construction project coordinator. Focus on schedules, tasks, budgets and dependencies.",
        "financial" => "You are a construction finance assistant. Be exact with figures, invoices and cost breakdowns.",
        _ => "You are a helpful assistant embedded in a construction management platform.",
    };
    if language_hint.is_empty() || language_hint == "auto" {
        format!("{base} Reply in the language the user writes in.")
    } else {
        format!("{base} Reply in the language with code `{language_hint}`.")
    }
}

fn log_invocation_success(provider_id: &ProviderId, conversation_id: &str, response: &AiResponse) {
    let preview = response.content.chars().take(200).collect::<String>();
    log_event(
        Level::Info,
        Some("AI-0200"),
        "ai.runtime",
        "AI chat invocation succeeded",
        None,
        Some(json!({
            "provider": provider_id.as_str(),
            "model": response.model,
            "conversation_id": conversation_id,
            "preview": preview,
        })),
    );
}

fn log_invocation_failure(provider_id: &ProviderId, conversation_id: &str, error: &AiError) {
    log_event(
        Level::Warn,
        Some("AI-0201"),
        "ai.runtime",
        "AI provider invocation failed",
        Some(error.explain()),
        Some(json!({
            "provider": provider_id.as_str(),
            "conversation_id": conversation_id,
            "code": error.code(),
            "error": error.to_string(),
        })),
    );
}
