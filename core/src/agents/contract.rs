//! Capability interface implemented by every model backend, plus the
//! provider-agnostic message and response shapes that flow through it.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::config::{ProviderCapabilities, ProviderId};
use crate::errors::{AiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Code,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Code => "code",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderCapabilities {
    /// Whether a provider with these capabilities accepts `kind` as input.
    /// Documents travel as text.
    pub fn supports(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => self.image,
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
            MediaKind::Code => self.code,
            MediaKind::Document => self.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MediaSource {
    Url(String),
    Inline(Vec<u8>),
}

/// Pointer to a piece of media, either by location or by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub mime_type: String,
    pub name: Option<String>,
    pub source: MediaSource,
}

impl MediaReference {
    pub fn url(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            name: None,
            source: MediaSource::Url(url.into()),
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            name: None,
            source: MediaSource::Inline(data),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Short human-readable label stored on messages instead of the payload.
    pub fn label(&self) -> String {
        match (&self.name, &self.source) {
            (Some(name), _) => name.clone(),
            (None, MediaSource::Url(url)) => url.clone(),
            (None, MediaSource::Inline(data)) => {
                format!("inline {} ({} bytes)", self.mime_type, data.len())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub media_kind: Option<MediaKind>,
    pub media_reference: Option<String>,
    pub language: Option<String>,
    /// Provider that produced an assistant message.
    pub provider: Option<ProviderId>,
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            media_kind: None,
            media_reference: None,
            language: None,
            provider: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Media and context attached to a single outgoing message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultimodalInput {
    pub images: Vec<MediaReference>,
    pub audio: Option<MediaReference>,
    pub video: Option<MediaReference>,
    pub text: Option<String>,
    pub context: BTreeMap<String, Value>,
}

impl MultimodalInput {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
            && self.audio.is_none()
            && self.video.is_none()
            && self.text.is_none()
            && self.context.is_empty()
    }

    /// Media kinds carried by this bundle, in image/audio/video order.
    pub fn media_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if !self.images.is_empty() {
            kinds.push(MediaKind::Image);
        }
        if self.audio.is_some() {
            kinds.push(MediaKind::Audio);
        }
        if self.video.is_some() {
            kinds.push(MediaKind::Video);
        }
        kinds
    }

    /// First media reference in the bundle, used to annotate the stored message.
    pub fn primary_media(&self) -> Option<(MediaKind, &MediaReference)> {
        self.images
            .first()
            .map(|m| (MediaKind::Image, m))
            .or_else(|| self.audio.as_ref().map(|m| (MediaKind::Audio, m)))
            .or_else(|| self.video.as_ref().map(|m| (MediaKind::Video, m)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Result of exactly one outbound exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub id: String,
    pub provider: ProviderId,
    pub content: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    pub model: String,
    pub created_at: OffsetDateTime,
}

impl AiResponse {
    pub fn new(provider: ProviderId, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider,
            content: content.into(),
            usage: None,
            finish_reason: None,
            model: model.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Receives streamed text chunks in arrival order.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

#[async_trait]
pub trait ProviderContract: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Single exchange. Fails with `ProviderUnavailable` when the backend is
    /// not configured and `ProviderRequestFailed` on transport or parse errors.
    async fn send(
        &self,
        messages: &[Message],
        input: Option<&MultimodalInput>,
    ) -> Result<AiResponse>;

    /// Streamed exchange. `on_chunk` sees every chunk in emission order and is
    /// never called after this future resolves; the returned content is the
    /// concatenation of the chunks.
    async fn stream(
        &self,
        messages: &[Message],
        input: Option<&MultimodalInput>,
        on_chunk: ChunkSink<'_>,
    ) -> Result<AiResponse>;

    async fn analyze_media(
        &self,
        media: &MediaReference,
        kind: MediaKind,
        prompt: Option<&str>,
    ) -> Result<AiResponse>;

    fn supports(&self, kind: MediaKind) -> bool {
        self.capabilities().supports(kind)
    }
}

/// Reject inputs carrying media the provider does not declare.
pub fn ensure_supported(
    provider: &ProviderId,
    capabilities: &ProviderCapabilities,
    input: Option<&MultimodalInput>,
) -> Result<()> {
    let Some(input) = input else {
        return Ok(());
    };
    match input
        .media_kinds()
        .into_iter()
        .find(|kind| !capabilities.supports(*kind))
    {
        Some(kind) => Err(AiError::UnsupportedCapability {
            provider: provider.clone(),
            kind,
        }),
        None => Ok(()),
    }
}
