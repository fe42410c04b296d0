//! Uploaded-file classification and multimodal request assembly.
//!
//! Everything that reaches a provider as media goes through here first:
//! files are classified by MIME type and extension, text is pulled out where
//! it can be, and the result is bundled into a [`MultimodalInput`]. Optional
//! backends (OCR/document parsing, speech-to-text) plug in through
//! [`TextExtractor`] and [`SpeechToText`]; when they are absent the outputs
//! say so explicitly instead of carrying placeholder text.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use log::Level;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::config::{AiConfig, ProviderId};
use crate::agents::contract::{MediaKind, MediaReference, MediaSource, MultimodalInput};
use crate::errors::{AiError, Result};
use crate::logging::log_event;
use crate::model_manager::{ConversationManager, SendOptions};

const IMAGE_ANALYSIS_PROMPT: &str = "Please analyze this image in detail. Describe what you see, identify objects, and extract any text.";

/// Confidence attached to image analyses. Providers return free text without
/// a score, so this is a fixed prior rather than a measurement.
const DESCRIPTION_CONFIDENCE: f32 = 0.9;

const CODE_EXTENSIONS: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("ts", "typescript"),
    ("jsx", "javascript"),
    ("tsx", "typescript"),
    ("py", "python"),
    ("java", "java"),
    ("cpp", "cpp"),
    ("c", "c"),
    ("cs", "csharp"),
    ("php", "php"),
    ("rb", "ruby"),
    ("go", "go"),
    ("rs", "rust"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("sh", "bash"),
    ("bash", "bash"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("json", "json"),
    ("xml", "xml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
];

const TEXT_TYPES: &[&str] = &[
    "text/",
    "application/json",
    "application/javascript",
    "application/xml",
];

/// Raw file as handed over by the upload layer.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

/// Outcome of text extraction for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractedText {
    /// The file is text; this is its content, unchanged.
    Verbatim { text: String },
    /// An extraction backend produced this text.
    Extracted { text: String, backend: String },
    /// No backend was available, or it failed.
    Unavailable,
}

impl ExtractedText {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Verbatim { text } | Self::Extracted { text, .. } => Some(text),
            Self::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub name: String,
    pub declared_type: String,
    pub size: usize,
    pub content: FileContent,
    pub media_kind: MediaKind,
    pub extracted_text: ExtractedText,
    pub code_language: Option<String>,
}

impl ProcessedFile {
    /// Inline media reference carrying the file's bytes.
    pub fn media_reference(&self) -> MediaReference {
        let data = match &self.content {
            FileContent::Text(text) => text.as_bytes().to_vec(),
            FileContent::Binary(bytes) => bytes.clone(),
        };
        MediaReference::inline(self.declared_type.clone(), data).named(self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub transcript: String,
    pub confidence: f32,
    pub language: String,
    pub duration_seconds: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: String,
    pub size: Option<usize>,
}

/// Provider description of an image plus fields mined from it.
///
/// `objects` and `extracted_text` come from pattern matching over the
/// description. They are heuristic and can miss or misread things the
/// provider mentioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub description: String,
    pub objects: Vec<String>,
    pub extracted_text: Option<String>,
    pub confidence: f32,
    pub metadata: ImageMetadata,
    pub provider: ProviderId,
}

/// OCR or document parsing backend.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, file: &ProcessedFile) -> anyhow::Result<String>;
}

/// Speech-to-text backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio: &MediaReference,
        language_hint: Option<&str>,
    ) -> anyhow::Result<Transcription>;
}

/// Media kind of a file from its declared MIME type and name. Total: anything
/// unrecognised is a document.
pub fn classify_media(declared_type: &str, file_name: &str) -> MediaKind {
    let declared = declared_type.trim().to_ascii_lowercase();
    if declared.starts_with("image/") {
        return MediaKind::Image;
    }
    if declared.starts_with("audio/") {
        return MediaKind::Audio;
    }
    if declared.starts_with("video/") {
        return MediaKind::Video;
    }
    if detect_code_language(file_name).is_some() {
        return MediaKind::Code;
    }
    MediaKind::Document
}

/// Programming language implied by a file name's extension.
pub fn detect_code_language(file_name: &str) -> Option<&'static str> {
    let (_, extension) = file_name.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    CODE_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, language)| *language)
}

fn is_text_type(declared_type: &str) -> bool {
    let declared = declared_type.trim().to_ascii_lowercase();
    TEXT_TYPES.iter().any(|prefix| declared.starts_with(prefix))
}

/// Classify an uploaded file. Text-like files that are valid UTF-8 keep their
/// text verbatim; everything else stays binary with extraction unavailable.
pub fn classify(file: FileUpload) -> ProcessedFile {
    let media_kind = classify_media(&file.declared_type, &file.name);
    let size = file.bytes.len();
    let text_like = is_text_type(&file.declared_type) || media_kind == MediaKind::Code;
    let content = if text_like {
        match String::from_utf8(file.bytes) {
            Ok(text) => FileContent::Text(text),
            Err(err) => FileContent::Binary(err.into_bytes()),
        }
    } else {
        FileContent::Binary(file.bytes)
    };
    let extracted_text = match &content {
        FileContent::Text(text) => ExtractedText::Verbatim { text: text.clone() },
        FileContent::Binary(_) => ExtractedText::Unavailable,
    };
    let code_language = match media_kind {
        MediaKind::Code => detect_code_language(&file.name).map(str::to_string),
        _ => None,
    };
    ProcessedFile {
        name: file.name,
        declared_type: file.declared_type,
        size,
        content,
        media_kind,
        extracted_text,
        code_language,
    }
}

pub struct MultimodalNormalizer {
    conversations: Arc<ConversationManager>,
    vision_provider: ProviderId,
    speech: Option<Arc<dyn SpeechToText>>,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl MultimodalNormalizer {
    pub fn new(conversations: Arc<ConversationManager>, config: &AiConfig) -> Self {
        Self {
            conversations,
            vision_provider: config.vision_provider.clone(),
            speech: None,
            extractor: None,
        }
    }

    pub fn with_speech_to_text(mut self, backend: Arc<dyn SpeechToText>) -> Self {
        self.speech = Some(backend);
        self
    }

    pub fn with_text_extractor(mut self, backend: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(backend);
        self
    }

    pub fn has_speech_to_text(&self) -> bool {
        self.speech.is_some()
    }

    /// Classify every file and run the extraction backend over images and
    /// binary documents. A failing backend leaves that file `Unavailable`.
    pub async fn process_files(&self, files: Vec<FileUpload>) -> Vec<ProcessedFile> {
        let mut processed = Vec::with_capacity(files.len());
        for file in files {
            let mut item = classify(file);
            let wants_extraction = matches!(item.media_kind, MediaKind::Image | MediaKind::Document)
                && item.extracted_text == ExtractedText::Unavailable;
            if let (true, Some(extractor)) = (wants_extraction, &self.extractor) {
                match extractor.extract(&item).await {
                    Ok(text) => {
                        item.extracted_text = ExtractedText::Extracted {
                            text,
                            backend: extractor.name().to_string(),
                        };
                    }
                    Err(err) => log_event(
                        Level::Warn,
                        Some("MMD-0201"),
                        "ai.multimodal",
                        "Text extraction failed",
                        Some("The file is kept with extraction marked unavailable"),
                        Some(json!({
                            "file": item.name,
                            "backend": extractor.name(),
                            "error": format!("{err:#}"),
                        })),
                    ),
                }
            }
            processed.push(item);
        }
        processed
    }

    /// Bundle processed files for a provider. Every image is carried; only the
    /// first audio and the first video file are, so callers with several of
    /// those need one call per item.
    pub fn to_multimodal_input(&self, files: &[ProcessedFile]) -> MultimodalInput {
        let of_kind = |kind: MediaKind| files.iter().filter(move |f| f.media_kind == kind);

        let audio_count = of_kind(MediaKind::Audio).count();
        let video_count = of_kind(MediaKind::Video).count();
        if audio_count > 1 || video_count > 1 {
            log::debug!(
                "multimodal input carries 1 of {audio_count} audio and 1 of {video_count} video files"
            );
        }

        MultimodalInput {
            images: of_kind(MediaKind::Image)
                .map(ProcessedFile::media_reference)
                .collect(),
            audio: of_kind(MediaKind::Audio)
                .next()
                .map(ProcessedFile::media_reference),
            video: of_kind(MediaKind::Video)
                .next()
                .map(ProcessedFile::media_reference),
            ..MultimodalInput::default()
        }
    }

    pub async fn transcribe(
        &self,
        audio: &MediaReference,
        language_hint: Option<&str>,
    ) -> Result<Transcription> {
        let backend = self.speech.as_ref().ok_or(AiError::TranscriptionUnavailable)?;
        backend
            .transcribe(audio, language_hint)
            .await
            .map_err(|err| AiError::TranscriptionFailed {
                backend: backend.name().to_string(),
                reason: format!("{err:#}"),
            })
    }

    /// Describe an image with `provider` (the configured vision provider by
    /// default) inside a temporary conversation.
    pub async fn analyze_image(
        &self,
        image: &MediaReference,
        provider: Option<ProviderId>,
    ) -> Result<ImageAnalysis> {
        let provider = provider.unwrap_or_else(|| self.vision_provider.clone());
        let temp = self
            .conversations
            .temporary("Image Analysis", "technical", "en");
        let input = MultimodalInput {
            images: vec![image.clone()],
            ..MultimodalInput::default()
        };
        let response = self
            .conversations
            .send_message(
                temp.id(),
                IMAGE_ANALYSIS_PROMPT,
                SendOptions::new().provider(provider).input(input),
            )
            .await?;

        Ok(ImageAnalysis {
            objects: extract_objects(&response.content),
            extracted_text: extract_quoted_text(&response.content),
            confidence: DESCRIPTION_CONFIDENCE,
            metadata: image_metadata(image),
            description: response.content,
            provider: response.provider,
        })
    }
}

fn object_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)\b(?:i can see|i see|there is|there are)\s+(?:(?:an|a|some|the)\s+)?([a-z][a-z ]*)")
                .expect("static regex"),
            Regex::new(r"(?i)\b(?:object|item|thing)s?:\s*([a-z ,]+)").expect("static regex"),
        ]
    })
}

fn text_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r#"(?i)text(?:\s+(?:says|reads|shows))?:?\s*"([^"]+)""#)
                .expect("static regex"),
            Regex::new(r#"(?i)(?:says|reads|shows):?\s*"([^"]+)""#).expect("static regex"),
            Regex::new(r"(?i)text[^:\n]*:\s*([^\n]+)").expect("static regex"),
        ]
    })
}

/// Object phrases mentioned in a description, deduplicated in order of
/// first mention.
fn extract_objects(description: &str) -> Vec<String> {
    let [sightings, listings] = object_patterns();
    let mut objects: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim().to_lowercase();
        if !candidate.is_empty() && !objects.contains(&candidate) {
            objects.push(candidate);
        }
    };
    for caps in sightings.captures_iter(description) {
        push(&caps[1]);
    }
    for caps in listings.captures_iter(description) {
        caps[1].split(',').for_each(&mut push);
    }
    objects
}

fn extract_quoted_text(description: &str) -> Option<String> {
    text_patterns().iter().find_map(|pattern| {
        pattern
            .captures(description)
            .map(|caps| caps[1].trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

fn image_metadata(image: &MediaReference) -> ImageMetadata {
    let subtype = image
        .mime_type
        .split_once('/')
        .map(|(_, sub)| sub.to_string())
        .unwrap_or_else(|| image.mime_type.clone());
    match &image.source {
        MediaSource::Inline(data) => {
            let (width, height) = sniff_dimensions(data).unzip();
            ImageMetadata {
                width,
                height,
                format: subtype,
                size: Some(data.len()),
            }
        }
        MediaSource::Url(_) => ImageMetadata {
            width: None,
            height: None,
            format: subtype,
            size: None,
        },
    }
}

/// Width and height from PNG, GIF or JPEG headers.
fn sniff_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
    let be16 = |at: usize| -> Option<u32> {
        Some(u16::from_be_bytes([*data.get(at)?, *data.get(at + 1)?]) as u32)
    };

    if data.starts_with(PNG_MAGIC) {
        let width = u32::from_be_bytes(data.get(16..20)?.try_into().ok()?);
        let height = u32::from_be_bytes(data.get(20..24)?.try_into().ok()?);
        return Some((width, height));
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        let width = u16::from_le_bytes(data.get(6..8)?.try_into().ok()?) as u32;
        let height = u16::from_le_bytes(data.get(8..10)?.try_into().ok()?) as u32;
        return Some((width, height));
    }
    if data.starts_with(&[0xFF, 0xD8]) {
        let mut at = 2;
        while at + 9 < data.len() {
            if data[at] != 0xFF {
                return None;
            }
            let marker = data[at + 1];
            let is_frame = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
            if is_frame {
                return Some((be16(at + 7)?, be16(at + 5)?));
            }
            at += 2 + be16(at + 2)? as usize;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::ProviderRegistry;
    use crate::testing::{init_logging, ScriptedProvider};
    use anyhow::anyhow;

    struct FakeOcr;

    #[async_trait]
    impl TextExtractor for FakeOcr {
        fn name(&self) -> &str {
            "fake-ocr"
        }

        async fn extract(&self, file: &ProcessedFile) -> anyhow::Result<String> {
            if file.name.contains("blurry") {
                Err(anyhow!("unreadable"))
            } else {
                Ok(format!("text of {}", file.name))
            }
        }
    }

    struct FakeSpeech;

    struct BrokenSpeech;

    #[async_trait]
    impl SpeechToText for BrokenSpeech {
        fn name(&self) -> &str {
            "broken-stt"
        }

        async fn transcribe(
            &self,
            _audio: &MediaReference,
            _language_hint: Option<&str>,
        ) -> anyhow::Result<Transcription> {
            Err(anyhow!("unsupported codec"))
        }
    }

    #[async_trait]
    impl SpeechToText for FakeSpeech {
        fn name(&self) -> &str {
            "fake-stt"
        }

        async fn transcribe(
            &self,
            _audio: &MediaReference,
            language_hint: Option<&str>,
        ) -> anyhow::Result<Transcription> {
            Ok(Transcription {
                transcript: "pour the east footing".into(),
                confidence: 0.82,
                language: language_hint.unwrap_or("en").into(),
                duration_seconds: 2.5,
            })
        }
    }

    fn normalizer_with(
        provider: ScriptedProvider,
    ) -> (MultimodalNormalizer, Arc<ConversationManager>) {
        init_logging();
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(provider));
        let config = AiConfig {
            default_provider: ProviderId::from("stub"),
            vision_provider: ProviderId::from("stub"),
            ..AiConfig::default()
        };
        let manager = ConversationManager::new(registry, &config);
        (MultimodalNormalizer::new(manager.clone(), &config), manager)
    }

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    #[test]
    fn classify_media_examples() {
        assert_eq!(classify_media("text/plain", "script.py"), MediaKind::Code);
        assert_eq!(
            classify_media("application/octet-stream", "readme.txt"),
            MediaKind::Document
        );
        assert_eq!(classify_media("IMAGE/PNG", "plan.bin"), MediaKind::Image);
        assert_eq!(classify_media("audio/webm", "note.rs"), MediaKind::Audio);
        assert_eq!(classify_media("video/mp4", "walkthrough"), MediaKind::Video);
        assert_eq!(classify_media("", "Schema.SQL"), MediaKind::Code);
        assert_eq!(classify_media("", ""), MediaKind::Document);
        assert_eq!(classify_media("application/pdf", "rs"), MediaKind::Document);
    }

    #[test]
    fn classify_keeps_text_verbatim_and_marks_binary_unavailable() {
        let code = classify(FileUpload::new("main.rs", "text/x-rust", b"fn main() {}\n".to_vec()));
        assert_eq!(code.media_kind, MediaKind::Code);
        assert_eq!(code.code_language.as_deref(), Some("rust"));
        assert_eq!(code.extracted_text.text(), Some("fn main() {}\n"));

        let notes = classify(FileUpload::new("notes.txt", "text/plain", b"rebar on site".to_vec()));
        assert_eq!(notes.media_kind, MediaKind::Document);
        assert!(matches!(notes.extracted_text, ExtractedText::Verbatim { .. }));
        assert_eq!(notes.code_language, None);

        let pdf = classify(FileUpload::new(
            "drawings.pdf",
            "application/pdf",
            vec![0x25, 0x50, 0x44, 0x46],
        ));
        assert_eq!(pdf.extracted_text, ExtractedText::Unavailable);
        assert_eq!(pdf.size, 4);

        let broken = classify(FileUpload::new("data.json", "application/json", vec![0xFF, 0xFE]));
        assert_eq!(broken.content, FileContent::Binary(vec![0xFF, 0xFE]));
        assert_eq!(broken.extracted_text, ExtractedText::Unavailable);
    }

    #[tokio::test]
    async fn process_files_uses_extractor_for_images_and_documents() {
        let (normalizer, _) = normalizer_with(ScriptedProvider::echo("stub"));
        let normalizer = normalizer.with_text_extractor(Arc::new(FakeOcr));
        let files = vec![
            FileUpload::new("site.jpg", "image/jpeg", vec![0xFF, 0xD8]),
            FileUpload::new("blurry.png", "image/png", vec![1, 2, 3]),
            FileUpload::new("app.ts", "text/plain", b"let a = 1;".to_vec()),
            FileUpload::new("clip.mp3", "audio/mpeg", vec![0; 8]),
        ];

        let processed = normalizer.process_files(files).await;

        assert_eq!(
            processed[0].extracted_text,
            ExtractedText::Extracted {
                text: "text of site.jpg".into(),
                backend: "fake-ocr".into()
            }
        );
        assert_eq!(processed[1].extracted_text, ExtractedText::Unavailable);
        assert_eq!(processed[2].extracted_text.text(), Some("let a = 1;"));
        assert_eq!(processed[3].extracted_text, ExtractedText::Unavailable);
    }

    #[test]
    fn multimodal_input_keeps_all_images_and_first_audio_video() {
        let (normalizer, _) = normalizer_with(ScriptedProvider::echo("stub"));
        let files: Vec<ProcessedFile> = [
            ("a.png", "image/png"),
            ("first.mp3", "audio/mpeg"),
            ("b.jpg", "image/jpeg"),
            ("second.mp3", "audio/mpeg"),
            ("tour.mp4", "video/mp4"),
            ("readme.md", "text/markdown"),
        ]
        .into_iter()
        .map(|(name, kind)| classify(FileUpload::new(name, kind, vec![1])))
        .collect();

        let input = normalizer.to_multimodal_input(&files);

        let images: Vec<_> = input.images.iter().map(|m| m.label()).collect();
        assert_eq!(images, vec!["a.png", "b.jpg"]);
        assert_eq!(input.audio.map(|m| m.label()).as_deref(), Some("first.mp3"));
        assert_eq!(input.video.map(|m| m.label()).as_deref(), Some("tour.mp4"));
        assert!(input.text.is_none());
    }

    #[tokio::test]
    async fn transcription_requires_a_backend() {
        let (normalizer, _) = normalizer_with(ScriptedProvider::echo("stub"));
        let clip = MediaReference::inline("audio/webm", vec![0; 16]);

        let err = normalizer.transcribe(&clip, None).await.unwrap_err();
        assert!(matches!(err, AiError::TranscriptionUnavailable));

        let normalizer = normalizer.with_speech_to_text(Arc::new(FakeSpeech));
        let result = normalizer.transcribe(&clip, Some("es")).await.unwrap();
        assert_eq!(result.transcript, "pour the east footing");
        assert_eq!(result.language, "es");
    }

    #[tokio::test]
    async fn transcription_backend_failure_names_the_backend() {
        let (normalizer, _) = normalizer_with(ScriptedProvider::echo("stub"));
        let normalizer = normalizer.with_speech_to_text(Arc::new(BrokenSpeech));
        let clip = MediaReference::inline("audio/webm", vec![0; 16]);

        let err = normalizer.transcribe(&clip, None).await.unwrap_err();
        match &err {
            AiError::TranscriptionFailed { backend, reason } => {
                assert_eq!(backend, "broken-stt");
                assert!(reason.contains("unsupported codec"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.code(), "MMD-1002");
        assert!(err.provider().is_none());
    }

    #[tokio::test]
    async fn analyze_image_extracts_heuristic_fields_and_cleans_up() {
        let description = "I can see a tower crane beside the slab. Objects: hard hats, scaffolding. The sign text reads: \"Danger - Keep Out\"";
        let (normalizer, manager) = normalizer_with(ScriptedProvider::fixed("stub", description));
        let image = MediaReference::inline("image/png", png_header(640, 480)).named("site.png");

        let analysis = normalizer.analyze_image(&image, None).await.unwrap();

        assert_eq!(analysis.description, description);
        assert_eq!(
            analysis.objects,
            vec!["tower crane beside the slab", "hard hats", "scaffolding"]
        );
        assert_eq!(analysis.extracted_text.as_deref(), Some("Danger - Keep Out"));
        assert_eq!(analysis.metadata.width, Some(640));
        assert_eq!(analysis.metadata.height, Some(480));
        assert_eq!(analysis.metadata.format, "png");
        assert_eq!(analysis.provider, ProviderId::from("stub"));
        assert!(manager.list_conversations().is_empty());
    }

    #[tokio::test]
    async fn analyze_image_failure_still_deletes_temporary_conversation() {
        let (normalizer, manager) = normalizer_with(ScriptedProvider::failing("stub"));
        let image = MediaReference::url("image/jpeg", "https://site/crack.jpg");

        let err = normalizer.analyze_image(&image, None).await.unwrap_err();
        assert!(matches!(err, AiError::ProviderRequestFailed { .. }));
        assert!(manager.list_conversations().is_empty());
    }

    #[test]
    fn sniffs_gif_and_jpeg_dimensions() {
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&320u16.to_le_bytes());
        gif.extend_from_slice(&200u16.to_le_bytes());
        assert_eq!(sniff_dimensions(&gif), Some((320, 200)));

        let jpeg = vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, // APP0, 2 payload bytes
            0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x03, // SOF0 480x640
        ];
        assert_eq!(sniff_dimensions(&jpeg), Some((640, 480)));
        assert_eq!(sniff_dimensions(b"not an image"), None);
    }
}
