//! HTTP-backed [`ProviderContract`] for the hosted vendors.
//!
//! Three wire dialects cover the catalogue: OpenAI-style chat completions
//! (OpenAI, Copilot and any custom endpoint), Anthropic messages and Gemini
//! `generateContent`. Streaming uses server-sent events in all three.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};

use super::config::{ProviderCapabilities, ProviderId, ProviderSettings};
use super::contract::{
    AiResponse, ChunkSink, MediaKind, MediaReference, MediaSource, Message, MultimodalInput,
    ProviderContract, Role, Usage,
};
use crate::errors::{AiError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenAiLike,
    Anthropic,
    Gemini,
}

impl Dialect {
    fn for_provider(id: &ProviderId) -> Self {
        match id {
            ProviderId::Anthropic => Self::Anthropic,
            ProviderId::Gemini => Self::Gemini,
            _ => Self::OpenAiLike,
        }
    }
}

enum StreamEvent {
    Delta(String),
    Done,
    Skip,
    Failed(String),
}

pub struct HttpProvider {
    settings: ProviderSettings,
    dialect: Dialect,
    timeout: Option<Duration>,
    client: Client,
}

impl HttpProvider {
    pub fn new(settings: ProviderSettings, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent("ASAgents-Core/0.1");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("failed to construct HTTP client")?;
        Ok(Self {
            dialect: Dialect::for_provider(&settings.id),
            settings,
            timeout,
            client,
        })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn endpoint(&self, stream: bool) -> Result<String> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| AiError::unavailable(&self.settings.id, "no base URL configured"))?;
        Ok(match self.dialect {
            Dialect::OpenAiLike if self.settings.id == ProviderId::Copilot => {
                format!("{base}/chat/completions")
            }
            Dialect::OpenAiLike => format!("{base}/v1/chat/completions"),
            Dialect::Anthropic => format!("{base}/v1/messages"),
            Dialect::Gemini => {
                let method = if stream {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                format!("{base}/models/{}:{method}", self.settings.model)
            }
        })
    }

    fn request(&self, payload: &Value, stream: bool) -> Result<RequestBuilder> {
        let secret = self.settings.secret().ok_or_else(|| {
            AiError::unavailable(
                &self.settings.id,
                format!(
                    "API key is not configured ({})",
                    self.settings.credential_env.as_deref().unwrap_or("no credential variable")
                ),
            )
        })?;
        let request = self.client.post(self.endpoint(stream)?);
        let request = match self.dialect {
            Dialect::OpenAiLike => request.bearer_auth(secret),
            Dialect::Anthropic => request
                .header("x-api-key", secret)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Dialect::Gemini => {
                let mut query = vec![("key", secret)];
                if stream {
                    query.push(("alt", "sse"));
                }
                request.query(&query)
            }
        };
        Ok(request.json(payload))
    }

    async fn dispatch(&self, payload: &Value, stream: bool) -> Result<Response> {
        let response = self
            .request(payload, stream)?
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read error body>".to_string());
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        log::error!("{} request failed with status {status}: {body}", self.settings.id);
        Err(AiError::request_failed(
            &self.settings.id,
            format!("HTTP {status}: {body}"),
        ))
    }

    fn transport_error(&self, err: reqwest::Error) -> AiError {
        match self.timeout {
            Some(after) if err.is_timeout() => AiError::ProviderTimeout {
                provider: self.settings.id.clone(),
                after,
            },
            _ => AiError::request_failed(&self.settings.id, err.to_string()),
        }
    }
}

#[async_trait]
impl ProviderContract for HttpProvider {
    fn id(&self) -> ProviderId {
        self.settings.id.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.settings.capabilities
    }

    async fn send(
        &self,
        messages: &[Message],
        input: Option<&MultimodalInput>,
    ) -> Result<AiResponse> {
        let payload = build_payload(self.dialect, &self.settings, messages, input, false);
        let body: Value = self
            .dispatch(&payload, false)
            .await?
            .json()
            .await
            .map_err(|err| self.transport_error(err))?;

        let content = extract_content(self.dialect, &body).ok_or_else(|| {
            AiError::request_failed(&self.settings.id, "response carried no text content")
        })?;
        let mut response = AiResponse::new(self.id(), &self.settings.model, content);
        response.usage = extract_usage(self.dialect, &body);
        response.finish_reason = extract_finish_reason(self.dialect, &body);
        Ok(response)
    }

    async fn stream(
        &self,
        messages: &[Message],
        input: Option<&MultimodalInput>,
        on_chunk: ChunkSink<'_>,
    ) -> Result<AiResponse> {
        let payload = build_payload(self.dialect, &self.settings, messages, input, true);
        let mut events = self.dispatch(&payload, true).await?.bytes_stream().eventsource();

        let mut content = String::new();
        while let Some(event) = events.next().await {
            let event = event.map_err(|err| {
                AiError::request_failed(
                    &self.settings.id,
                    format!("error reading stream event: {err}"),
                )
            })?;
            match stream_event(self.dialect, event.data.trim()) {
                StreamEvent::Delta(text) if !text.is_empty() => {
                    on_chunk(&text);
                    content.push_str(&text);
                }
                StreamEvent::Delta(_) | StreamEvent::Skip => {}
                StreamEvent::Done => break,
                StreamEvent::Failed(reason) => {
                    return Err(AiError::request_failed(&self.settings.id, reason))
                }
            }
        }
        Ok(AiResponse::new(self.id(), &self.settings.model, content))
    }

    async fn analyze_media(
        &self,
        media: &MediaReference,
        kind: MediaKind,
        prompt: Option<&str>,
    ) -> Result<AiResponse> {
        if !self.supports(kind) {
            return Err(AiError::UnsupportedCapability {
                provider: self.id(),
                kind,
            });
        }
        let mut input = MultimodalInput::default();
        match kind {
            MediaKind::Image => input.images.push(media.clone()),
            MediaKind::Audio => input.audio = Some(media.clone()),
            MediaKind::Video => input.video = Some(media.clone()),
            MediaKind::Document | MediaKind::Code => input.text = Some(media_as_text(media)),
        }
        let prompt = prompt.unwrap_or("Analyze this content and describe it in detail.");
        self.send(&[Message::user(prompt)], Some(&input)).await
    }
}

fn media_as_text(media: &MediaReference) -> String {
    match &media.source {
        MediaSource::Inline(data) => {
            String::from_utf8(data.clone()).unwrap_or_else(|_| media.label())
        }
        MediaSource::Url(url) => url.clone(),
    }
}

fn data_url(media: &MediaReference) -> String {
    match &media.source {
        MediaSource::Url(url) => url.clone(),
        MediaSource::Inline(data) => {
            format!("data:{};base64,{}", media.mime_type, STANDARD.encode(data))
        }
    }
}

fn mime_subtype(mime_type: &str) -> &str {
    mime_type.split_once('/').map_or(mime_type, |(_, sub)| sub)
}

/// User text with the bundle's free text and context appended.
fn merged_text(content: &str, input: &MultimodalInput) -> String {
    let mut sections: Vec<String> = Vec::new();
    if !content.is_empty() {
        sections.push(content.to_string());
    }
    if let Some(text) = input.text.as_ref().filter(|t| !t.is_empty()) {
        sections.push(text.clone());
    }
    if !input.context.is_empty() {
        let context = serde_json::to_string(&input.context).unwrap_or_default();
        sections.push(format!("Context: {context}"));
    }
    sections.join("\n\n")
}

/// Messages paired with the attachment bundle for the last user turn. When
/// there is no user turn a synthetic one carries the attachments.
fn with_attachments<'a>(
    messages: &'a [Message],
    input: Option<&'a MultimodalInput>,
) -> Vec<(Role, &'a str, Option<&'a MultimodalInput>)> {
    let input = input.filter(|i| !i.is_empty());
    let target = messages.iter().rposition(|m| m.role == Role::User);
    let mut turns: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            let attached = if Some(idx) == target { input } else { None };
            (m.role, m.content.as_str(), attached)
        })
        .collect();
    if target.is_none() && input.is_some() {
        turns.push((Role::User, "", input));
    }
    turns
}

fn build_payload(
    dialect: Dialect,
    settings: &ProviderSettings,
    messages: &[Message],
    input: Option<&MultimodalInput>,
    stream: bool,
) -> Value {
    let turns = with_attachments(messages, input);
    match dialect {
        Dialect::OpenAiLike => {
            let messages: Vec<Value> = turns
                .into_iter()
                .map(|(role, text, attached)| match attached {
                    Some(input) => json!({"role": role.as_str(), "content": openai_parts(text, input)}),
                    None => json!({"role": role.as_str(), "content": text}),
                })
                .collect();
            json!({
                "model": settings.model,
                "messages": messages,
                "temperature": settings.temperature,
                "max_tokens": settings.max_tokens,
                "stream": stream,
            })
        }
        Dialect::Anthropic => {
            let mut system_prompt = String::new();
            let mut messages = Vec::new();
            for (role, text, attached) in turns {
                match role {
                    Role::System => {
                        if !system_prompt.is_empty() {
                            system_prompt.push_str("\n\n");
                        }
                        system_prompt.push_str(text);
                    }
                    Role::User | Role::Assistant => {
                        let content = match attached {
                            Some(input) => anthropic_parts(text, input),
                            None => vec![json!({"type": "text", "text": text})],
                        };
                        messages.push(json!({"role": role.as_str(), "content": content}));
                    }
                }
            }
            let mut payload = json!({
                "model": settings.model,
                "max_tokens": settings.max_tokens,
                "messages": messages,
                "temperature": settings.temperature,
                "stream": stream,
            });
            if !system_prompt.is_empty() {
                payload["system"] = Value::String(system_prompt);
            }
            payload
        }
        Dialect::Gemini => {
            let mut system_parts = Vec::new();
            let mut contents = Vec::new();
            for (role, text, attached) in turns {
                match role {
                    Role::System => system_parts.push(json!({"text": text})),
                    Role::User | Role::Assistant => {
                        let role = if role == Role::User { "user" } else { "model" };
                        let parts = match attached {
                            Some(input) => gemini_parts(text, input),
                            None => vec![json!({"text": text})],
                        };
                        contents.push(json!({"role": role, "parts": parts}));
                    }
                }
            }
            let mut payload = json!({
                "contents": contents,
                "generationConfig": {
                    "temperature": settings.temperature,
                    "maxOutputTokens": settings.max_tokens,
                },
            });
            if !system_parts.is_empty() {
                payload["systemInstruction"] = json!({"parts": system_parts});
            }
            payload
        }
    }
}

fn openai_parts(text: &str, input: &MultimodalInput) -> Vec<Value> {
    let mut parts = vec![json!({"type": "text", "text": merged_text(text, input)})];
    for image in &input.images {
        parts.push(json!({"type": "image_url", "image_url": {"url": data_url(image)}}));
    }
    if let Some(audio) = &input.audio {
        parts.push(match &audio.source {
            MediaSource::Inline(data) => json!({
                "type": "input_audio",
                "input_audio": {"data": STANDARD.encode(data), "format": mime_subtype(&audio.mime_type)},
            }),
            MediaSource::Url(url) => json!({"type": "text", "text": format!("Audio: {url}")}),
        });
    }
    if let Some(video) = &input.video {
        parts.push(json!({"type": "text", "text": format!("Video: {}", video.label())}));
    }
    parts
}

fn anthropic_parts(text: &str, input: &MultimodalInput) -> Vec<Value> {
    let mut parts: Vec<Value> = input
        .images
        .iter()
        .map(|image| match &image.source {
            MediaSource::Inline(data) => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": image.mime_type, "data": STANDARD.encode(data)},
            }),
            MediaSource::Url(url) => json!({"type": "image", "source": {"type": "url", "url": url}}),
        })
        .collect();
    parts.push(json!({"type": "text", "text": merged_text(text, input)}));
    parts
}

fn gemini_parts(text: &str, input: &MultimodalInput) -> Vec<Value> {
    let mut parts = vec![json!({"text": merged_text(text, input)})];
    let media = input
        .images
        .iter()
        .chain(input.audio.as_ref())
        .chain(input.video.as_ref());
    for item in media {
        parts.push(match &item.source {
            MediaSource::Inline(data) => json!({
                "inlineData": {"mimeType": item.mime_type, "data": STANDARD.encode(data)},
            }),
            MediaSource::Url(url) => json!({
                "fileData": {"mimeType": item.mime_type, "fileUri": url},
            }),
        });
    }
    parts
}

fn joined_text(parts: &Value, text_key: &str) -> Option<String> {
    let texts: Vec<&str> = parts
        .as_array()?
        .iter()
        .filter_map(|part| part.get(text_key).and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.concat())
}

fn extract_content(dialect: Dialect, body: &Value) -> Option<String> {
    match dialect {
        Dialect::OpenAiLike => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        Dialect::Anthropic => joined_text(body.get("content")?, "text"),
        Dialect::Gemini => joined_text(body.pointer("/candidates/0/content/parts")?, "text"),
    }
}

fn extract_finish_reason(dialect: Dialect, body: &Value) -> Option<String> {
    let pointer = match dialect {
        Dialect::OpenAiLike => "/choices/0/finish_reason",
        Dialect::Anthropic => "/stop_reason",
        Dialect::Gemini => "/candidates/0/finishReason",
    };
    body.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn extract_usage(dialect: Dialect, body: &Value) -> Option<Usage> {
    let count = |usage: &Value, key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
    match dialect {
        Dialect::OpenAiLike => body.get("usage").map(|usage| Usage {
            prompt_tokens: count(usage, "prompt_tokens"),
            completion_tokens: count(usage, "completion_tokens"),
            total_tokens: count(usage, "total_tokens"),
        }),
        Dialect::Anthropic => body.get("usage").map(|usage| {
            let prompt = count(usage, "input_tokens");
            let completion = count(usage, "output_tokens");
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt.zip(completion).map(|(p, c)| p + c),
            }
        }),
        Dialect::Gemini => body.get("usageMetadata").map(|usage| Usage {
            prompt_tokens: count(usage, "promptTokenCount"),
            completion_tokens: count(usage, "candidatesTokenCount"),
            total_tokens: count(usage, "totalTokenCount"),
        }),
    }
}

fn stream_event(dialect: Dialect, data: &str) -> StreamEvent {
    if data.is_empty() {
        return StreamEvent::Skip;
    }
    if dialect == Dialect::OpenAiLike && data == "[DONE]" {
        return StreamEvent::Done;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => return StreamEvent::Failed(format!("malformed stream chunk: {err}")),
    };
    match dialect {
        Dialect::OpenAiLike => value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map_or(StreamEvent::Skip, |text| StreamEvent::Delta(text.to_string())),
        Dialect::Anthropic => match value.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => value
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .map_or(StreamEvent::Skip, |text| StreamEvent::Delta(text.to_string())),
            Some("message_stop") => StreamEvent::Done,
            Some("error") => StreamEvent::Failed(
                value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
            ),
            _ => StreamEvent::Skip,
        },
        Dialect::Gemini => value
            .pointer("/candidates/0/content/parts")
            .and_then(|parts| joined_text(parts, "text"))
            .map_or(StreamEvent::Skip, StreamEvent::Delta),
    }
}
