//! Scripted in-process providers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::agents::config::{ProviderCapabilities, ProviderId};
use crate::agents::contract::{
    AiResponse, ChunkSink, MediaKind, MediaReference, Message, MultimodalInput, ProviderContract,
    Role,
};
use crate::errors::{AiError, Result};

/// Route `log_event` output through the test harness.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) enum Script {
    /// Uppercases the latest user message.
    Echo,
    Fixed(String),
    /// Streams these chunks; `send` answers with their concatenation.
    Chunks(Vec<String>),
    Fail,
    Unavailable,
    Delay(Duration, Box<Script>),
    /// Waits for the notify before running the inner script.
    Gate(Arc<Notify>, Box<Script>),
}

pub(crate) struct ScriptedProvider {
    id: ProviderId,
    capabilities: ProviderCapabilities,
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(id: &str, script: Script) -> Self {
        Self {
            id: ProviderId::from(id),
            capabilities: ProviderCapabilities {
                text: true,
                image: true,
                code: true,
                realtime: true,
                ..ProviderCapabilities::default()
            },
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn echo(id: &str) -> Self {
        Self::new(id, Script::Echo)
    }

    pub fn fixed(id: &str, content: &str) -> Self {
        Self::new(id, Script::Fixed(content.to_string()))
    }

    pub fn chunks(id: &str, chunks: &[&str]) -> Self {
        Self::new(
            id,
            Script::Chunks(chunks.iter().map(|c| c.to_string()).collect()),
        )
    }

    pub fn failing(id: &str) -> Self {
        Self::new(id, Script::Fail)
    }

    pub fn unavailable(id: &str) -> Self {
        Self::new(id, Script::Unavailable)
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists received by each call, in call order.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, messages: &[Message]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
    }

    async fn chunks_for(&self, script: &Script, messages: &[Message]) -> Result<Vec<String>> {
        let mut current = script;
        loop {
            match current {
                Script::Echo => {
                    let last = messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::User)
                        .map(|m| m.content.to_uppercase())
                        .unwrap_or_default();
                    return Ok(if last.is_empty() { Vec::new() } else { vec![last] });
                }
                Script::Fixed(content) => {
                    return Ok(if content.is_empty() {
                        Vec::new()
                    } else {
                        vec![content.clone()]
                    })
                }
                Script::Chunks(chunks) => return Ok(chunks.clone()),
                Script::Fail => return Err(AiError::request_failed(&self.id, "scripted failure")),
                Script::Unavailable => return Err(AiError::unavailable(&self.id, "no credential")),
                Script::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
                Script::Gate(notify, inner) => {
                    notify.notified().await;
                    current = inner;
                }
            }
        }
    }
}

#[async_trait]
impl ProviderContract for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn send(
        &self,
        messages: &[Message],
        _input: Option<&MultimodalInput>,
    ) -> Result<AiResponse> {
        self.record(messages);
        let chunks = self.chunks_for(&self.script, messages).await?;
        Ok(AiResponse::new(self.id.clone(), "scripted", chunks.concat()))
    }

    async fn stream(
        &self,
        messages: &[Message],
        _input: Option<&MultimodalInput>,
        on_chunk: ChunkSink<'_>,
    ) -> Result<AiResponse> {
        self.record(messages);
        let chunks = self.chunks_for(&self.script, messages).await?;
        let mut content = String::new();
        for chunk in chunks {
            tokio::task::yield_now().await;
            on_chunk(&chunk);
            content.push_str(&chunk);
        }
        Ok(AiResponse::new(self.id.clone(), "scripted", content))
    }

    async fn analyze_media(
        &self,
        media: &MediaReference,
        kind: MediaKind,
        _prompt: Option<&str>,
    ) -> Result<AiResponse> {
        if !self.capabilities.supports(kind) {
            return Err(AiError::UnsupportedCapability {
                provider: self.id.clone(),
                kind,
            });
        }
        let messages = vec![Message::user(media.label())];
        self.record(&messages);
        let chunks = self.chunks_for(&self.script, &messages).await?;
        Ok(AiResponse::new(self.id.clone(), "scripted", chunks.concat()))
    }
}
