//! Natural-language and programming-language detection, plus
//! provider-backed translation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use log::Level;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::config::{AiConfig, ProviderId};
use crate::agents::contract::Message;
use crate::agents::registry::ProviderRegistry;
use crate::errors::{AiError, Result};
use crate::logging::log_event;
use crate::model_manager::with_deadline;

const LANGUAGE_PATTERNS: &[(&str, &str, &str)] = &[
    ("en", "English", r"(?i)\b(?:the|and|or|but|in|on|at|to|for|of|with|by)\b"),
    ("es", "Spanish", r"(?i)\b(?:el|la|los|las|y|o|pero|en|con|de|por|para)\b"),
    ("fr", "French", r"(?i)\b(?:le|la|les|et|ou|mais|dans|sur|à|pour|de|avec)\b"),
    ("de", "German", r"(?i)\b(?:der|die|das|und|oder|aber|in|auf|zu|für|von|mit)\b"),
    ("it", "Italian", r"(?i)\b(?:il|la|i|le|e|o|ma|in|su|a|per|di|con)\b"),
    ("pt", "Portuguese", r"(?i)\b(?:o|a|os|as|e|ou|mas|em|sobre|para|de|com)\b"),
    ("ru", "Russian", r"(?i)\b(?:и|или|но|в|на|к|для|от|с|по)\b"),
    ("zh", "Chinese", r"[\x{4e00}-\x{9fff}]"),
    ("ja", "Japanese", r"[\x{3040}-\x{309f}\x{30a0}-\x{30ff}\x{4e00}-\x{9fff}]"),
    ("ar", "Arabic", r"[\x{0600}-\x{06ff}]"),
];

const CODE_PATTERNS: &[(&str, &str)] = &[
    ("javascript", r"\b(?:function|const|let|var|require|import)\b|=>|console\.log"),
    ("typescript", r"\b(?:interface|type|enum|implements|extends|as|keyof)\b"),
    ("python", r"\b(?:def|class|import|from|print|self)\b|if __name__"),
    ("java", r"\b(?:public|private|protected|class|interface|extends|implements|static)\b"),
    ("csharp", r"\b(?:using|namespace|public|private|protected|class|interface|var)\b"),
    ("cpp", r"#include\b|\busing namespace\b|\b(?:public|private|protected):|\b(?:class|struct)\b"),
    ("rust", r"\b(?:fn|let|mut|impl|trait|use|mod|pub)\b"),
    ("go", r"\b(?:func|package|import|var|const|type|interface)\b"),
    ("php", r"<\?php|\$\w+|\b(?:function|class|public|private|protected)\b"),
    ("ruby", r"\b(?:def|class|module|require|include|attr_accessor|puts)\b"),
    ("swift", r"\b(?:func|var|let|class|struct|protocol|import|public|private)\b"),
    ("kotlin", r"\b(?:fun|val|var|class|interface|object|companion|data)\b"),
];

/// Keyword hits that count as a certain code-language match.
const CODE_HITS_FOR_CERTAINTY: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    /// ISO 639-1 code.
    pub code: String,
    pub name: String,
    pub confidence: f32,
    /// Writing system, when a provider reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLanguage {
    pub language: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub original_text: String,
    pub translated_text: String,
    /// Heuristic guess at the source language.
    pub source_language: DetectedLanguage,
    pub target_language: String,
    pub provider: ProviderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    pub language: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// 0.0 (trivial) to 1.0 (very complex).
    #[serde(default = "neutral_complexity")]
    pub complexity: f32,
}

fn neutral_complexity() -> f32 {
    0.5
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    script: Option<String>,
}

fn unit_interval(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// The outermost `{ ... }` span of a reply, skipping fences or prose around it.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

pub fn language_name(code: &str) -> String {
    LANGUAGE_PATTERNS
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, _)| name.to_string())
        .unwrap_or_else(|| code.to_uppercase())
}

fn compiled(
    table: &'static OnceLock<Vec<(&'static str, Regex)>>,
    patterns: &[(&'static str, &str)],
) -> &'static [(&'static str, Regex)] {
    table.get_or_init(|| {
        patterns
            .iter()
            .map(|(key, pattern)| (*key, Regex::new(pattern).expect("static regex")))
            .collect()
    })
}

/// Stop-word and script heuristics. Cheap and offline, and only good enough
/// to pick a reply language.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicLanguageDetector;

impl BasicLanguageDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        LANGUAGE_PATTERNS.iter().map(|(code, _, _)| *code).collect()
    }

    /// Best-scoring language, or English at 0.1 when nothing scores higher.
    pub fn detect(&self, text: &str) -> DetectedLanguage {
        static TABLE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
        let patterns: Vec<(&'static str, &str)> =
            LANGUAGE_PATTERNS.iter().map(|(code, _, p)| (*code, *p)).collect();

        let mut best = DetectedLanguage {
            code: "en".into(),
            name: language_name("en"),
            confidence: 0.1,
            script: None,
        };
        let words = text.split_whitespace().count();
        if words == 0 {
            return best;
        }
        for (code, pattern) in compiled(&TABLE, &patterns) {
            let hits = pattern.find_iter(text).count();
            let confidence = (hits as f32 / words as f32).min(1.0);
            if confidence > best.confidence {
                best = DetectedLanguage {
                    code: code.to_string(),
                    name: language_name(code),
                    confidence,
                    script: None,
                };
            }
        }
        best
    }

    /// Best-scoring programming language, or `plaintext` at 0.0.
    pub fn detect_code(&self, code: &str) -> CodeLanguage {
        static TABLE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
        let mut best = CodeLanguage {
            language: "plaintext".into(),
            confidence: 0.0,
        };
        for (language, pattern) in compiled(&TABLE, CODE_PATTERNS) {
            let hits = pattern.find_iter(code).count();
            let confidence = (hits as f32 / CODE_HITS_FOR_CERTAINTY).min(1.0);
            if confidence > best.confidence {
                best = CodeLanguage {
                    language: language.to_string(),
                    confidence,
                };
            }
        }
        best
    }
}

/// Translation through a single provider. There is no offline fallback: when
/// the provider fails the caller gets the error.
pub struct LanguageProcessor {
    registry: Arc<ProviderRegistry>,
    provider: ProviderId,
    timeout: Option<Duration>,
    detector: BasicLanguageDetector,
}

impl LanguageProcessor {
    pub fn new(registry: Arc<ProviderRegistry>, config: &AiConfig) -> Self {
        Self {
            registry,
            provider: config.default_provider.clone(),
            timeout: config.request_timeout,
            detector: BasicLanguageDetector::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = provider;
        self
    }

    pub fn detector(&self) -> &BasicLanguageDetector {
        &self.detector
    }

    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<Translation> {
        let provider = self.registry.get(&self.provider)?;
        let mut request = format!(
            "Translate the following text to {}. Preserve formatting, markdown and code blocks.\n",
            language_name(target_language)
        );
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            request.push_str(&format!("Context: {context}\n"));
        }
        request.push_str(&format!("\nText to translate:\n{text}"));
        let messages = [
            Message::system("You are a professional translator. Respond with the translated text only."),
            Message::user(request),
        ];

        let response = with_deadline(&self.provider, self.timeout, provider.send(&messages, None))
            .await
            .inspect_err(|err| {
                log_event(
                    Level::Warn,
                    Some("LNG-0201"),
                    "ai.language",
                    "Translation failed",
                    Some(err.explain()),
                    Some(json!({ "provider": self.provider.as_str(), "target": target_language })),
                )
            })?;

        Ok(Translation {
            original_text: text.to_string(),
            translated_text: response.content.trim().to_string(),
            source_language: self.detector.detect(text),
            target_language: target_language.to_string(),
            provider: response.provider,
        })
    }

    /// Provider-backed detection. Falls back to the heuristic detector when
    /// the provider fails or answers with something other than the JSON
    /// object it was asked for.
    pub async fn detect_language(&self, text: &str) -> DetectedLanguage {
        let prompt = format!(
            "Detect the language of the following text and return only a JSON object \
             with this format:\n\
             {{\"code\": \"ISO_639_1_CODE\", \"name\": \"LANGUAGE_NAME\", \
             \"confidence\": 0.95, \"script\": \"SCRIPT_TYPE\"}}\n\n\
             Text to analyze: \"{text}\""
        );
        let reply = self
            .ask_json::<DetectionReply>(
                "You are a language detection expert. Respond only with valid JSON.",
                prompt,
            )
            .await;
        match reply {
            Ok(reply) if !reply.code.trim().is_empty() => {
                let code = reply.code.trim().to_lowercase();
                DetectedLanguage {
                    name: reply
                        .name
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| language_name(&code)),
                    confidence: unit_interval(reply.confidence.unwrap_or(0.5), 0.5),
                    script: reply.script,
                    code,
                }
            }
            other => {
                self.log_fallback("language detection", other.err());
                self.detector.detect(text)
            }
        }
    }

    /// Provider-backed code profile: language, framework, improvement hints
    /// and a complexity score. Falls back to keyword detection with no hints.
    pub async fn analyze_code(&self, code: &str) -> CodeAnalysis {
        let prompt = format!(
            "Analyze the following code and return a JSON object with this format:\n\
             {{\"language\": \"PROGRAMMING_LANGUAGE\", \"confidence\": 0.95, \
             \"framework\": \"FRAMEWORK_NAME\", \"version\": \"VERSION_IF_DETECTABLE\", \
             \"suggestions\": [\"improvement suggestion\"], \"complexity\": 0.7}}\n\n\
             Code to analyze:\n```\n{code}\n```"
        );
        let reply = self
            .ask_json::<CodeAnalysis>(
                "You are a code analysis expert. Respond only with valid JSON.",
                prompt,
            )
            .await;
        match reply {
            Ok(mut analysis) if !analysis.language.trim().is_empty() => {
                analysis.language = analysis.language.trim().to_lowercase();
                analysis.confidence = unit_interval(analysis.confidence, 0.0);
                analysis.complexity = unit_interval(analysis.complexity, neutral_complexity());
                analysis.suggestions.retain(|hint| !hint.trim().is_empty());
                analysis
            }
            other => {
                self.log_fallback("code analysis", other.err());
                let basic = self.detector.detect_code(code);
                CodeAnalysis {
                    language: basic.language,
                    confidence: basic.confidence,
                    framework: None,
                    version: None,
                    suggestions: Vec::new(),
                    complexity: neutral_complexity(),
                }
            }
        }
    }

    async fn ask_json<T: DeserializeOwned>(&self, system: &str, prompt: String) -> Result<T> {
        let provider = self.registry.get(&self.provider)?;
        let messages = [Message::system(system), Message::user(prompt)];
        let response =
            with_deadline(&self.provider, self.timeout, provider.send(&messages, None)).await?;
        let body = json_object(&response.content).ok_or_else(|| {
            AiError::request_failed(&self.provider, "reply does not contain a JSON object")
        })?;
        serde_json::from_str(body).map_err(|err| {
            AiError::request_failed(&self.provider, format!("malformed JSON reply: {err}"))
        })
    }

    fn log_fallback(&self, task: &str, err: Option<AiError>) {
        log_event(
            Level::Warn,
            Some("LNG-0202"),
            "ai.language",
            &format!("AI {task} failed, using heuristics"),
            Some(err.as_ref().map_or("The provider returned an empty answer", AiError::explain)),
            Some(json!({
                "provider": self.provider.as_str(),
                "error": err.map(|err| err.to_string()),
            })),
        );
    }
}

/// Translation cache for keyed UI content.
///
/// Entries are stored per key and per target language. A target whose
/// translation fails keeps the original text, so a lookup never comes back
/// empty-handed for a key that was translated.
pub struct MultilingualContentManager {
    processor: Arc<LanguageProcessor>,
    current: RwLock<String>,
    translations: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MultilingualContentManager {
    pub fn new(processor: Arc<LanguageProcessor>) -> Self {
        Self {
            processor,
            current: RwLock::new("en".to_string()),
            translations: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_language(&self, language: &str) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = language.to_string();
    }

    pub fn current_language(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Translate `content` into every target and replace the cached entry
    /// for `key` with the result.
    pub async fn translate_content(
        &self,
        key: &str,
        content: &str,
        targets: &[&str],
    ) -> HashMap<String, String> {
        let current = self.current_language();
        let context = format!("UI content translation for key: {key}");
        let mut translated = HashMap::with_capacity(targets.len());
        for target in targets {
            let text = if *target == current {
                content.to_string()
            } else {
                match self.processor.translate(content, target, Some(context.as_str())).await {
                    Ok(translation) => translation.translated_text,
                    Err(err) => {
                        log::debug!("keeping original text for {key} in {target}: {err}");
                        content.to_string()
                    }
                }
            };
            translated.insert(target.to_string(), text);
        }

        self.translations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), translated.clone());
        translated
    }

    /// Cached text for `key` in `language` (the current language by
    /// default), or the key itself.
    pub fn get_translation(&self, key: &str, language: Option<&str>) -> String {
        let language = language
            .map(str::to_string)
            .unwrap_or_else(|| self.current_language());
        self.translations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|entry| entry.get(&language))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub async fn bulk_translate(&self, entries: &[(&str, &str)], targets: &[&str]) {
        let calls = entries
            .iter()
            .map(|(key, content)| self.translate_content(key, content, targets));
        join_all(calls).await;
    }

    pub fn export_translations(&self, language: &str) -> BTreeMap<String, String> {
        self.translations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(key, entry)| {
                entry
                    .get(language)
                    .filter(|text| !text.is_empty())
                    .map(|text| (key.clone(), text.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_logging, Script, ScriptedProvider};
    use tokio::sync::Notify;

    fn processor_with(provider: ScriptedProvider) -> LanguageProcessor {
        init_logging();
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(provider));
        LanguageProcessor::new(registry, &AiConfig::default())
            .with_provider(ProviderId::from("stub"))
    }

    #[test]
    fn detects_common_languages() {
        let detector = BasicLanguageDetector::new();
        assert_eq!(
            detector.detect("The crane is on the north side of the site and ready for the lift").code,
            "en"
        );
        assert_eq!(
            detector.detect("Los trabajadores de la obra llegan con el material para el techo").code,
            "es"
        );
        assert_eq!(detector.detect("Рабочие на площадке и в офисе").code, "ru");
        assert_eq!(detector.detect("مرحبا بكم في الموقع").code, "ar");
        assert_eq!(detector.detect("安全第一").code, "zh");
    }

    #[test]
    fn empty_or_unknown_text_defaults_to_english() {
        let detector = BasicLanguageDetector::new();
        let empty = detector.detect("   ");
        assert_eq!(empty.code, "en");
        assert_eq!(empty.confidence, 0.1);
        assert_eq!(detector.detect("xyzzy qwerty").confidence, 0.1);
    }

    #[test]
    fn detects_code_languages() {
        let detector = BasicLanguageDetector::new();
        let rust = "pub fn area(w: f32) -> f32 { let mut a = w; a }\nimpl Trait for X {}\nuse std::fmt;\nmod inner;";
        assert_eq!(detector.detect_code(rust).language, "rust");
        let python = "def area(self):\n    print(self.w)\n\nclass Beam:\n    def load(self): pass";
        assert_eq!(detector.detect_code(python).language, "python");
        let plain = detector.detect_code("just some words");
        assert_eq!(plain.language, "plaintext");
        assert_eq!(plain.confidence, 0.0);
    }

    #[tokio::test]
    async fn translate_returns_provider_text() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(ScriptedProvider::fixed("stub", "  Hola equipo  ")));
        let processor = LanguageProcessor::new(registry, &AiConfig::default())
            .with_provider(ProviderId::from("stub"));

        let translation = processor
            .translate("Hello team and crew", "es", Some("site briefing"))
            .await
            .unwrap();

        assert_eq!(translation.translated_text, "Hola equipo");
        assert_eq!(translation.target_language, "es");
        assert_eq!(translation.source_language.code, "en");
        assert_eq!(translation.provider, ProviderId::from("stub"));
    }

    #[tokio::test]
    async fn translate_failure_propagates() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(ScriptedProvider::failing("stub")));
        let processor = LanguageProcessor::new(registry, &AiConfig::default())
            .with_provider(ProviderId::from("stub"));

        let err = processor.translate("Hello", "fr", None).await.unwrap_err();
        assert!(matches!(err, AiError::ProviderRequestFailed { .. }));
    }

    #[tokio::test]
    async fn provider_detection_reads_fenced_json() {
        let reply = "```json\n{\"code\": \"FR\", \"name\": \"French\", \"confidence\": 1.4, \
                     \"script\": \"Latin\"}\n```";
        let processor = processor_with(ScriptedProvider::fixed("stub", reply));

        let detected = processor.detect_language("Le chantier ouvre demain").await;

        assert_eq!(detected.code, "fr");
        assert_eq!(detected.name, "French");
        assert_eq!(detected.confidence, 1.0);
        assert_eq!(detected.script.as_deref(), Some("Latin"));
    }

    #[tokio::test]
    async fn detection_falls_back_to_heuristics() {
        let text = "Los trabajadores de la obra llegan con el material para el techo";
        let expected = BasicLanguageDetector::new().detect(text);

        let prose = processor_with(ScriptedProvider::fixed("stub", "Spanish, I think."));
        assert_eq!(prose.detect_language(text).await, expected);

        let failing = processor_with(ScriptedProvider::failing("stub"));
        assert_eq!(failing.detect_language(text).await, expected);

        let empty_code = processor_with(ScriptedProvider::fixed("stub", r#"{"code": " "}"#));
        assert_eq!(empty_code.detect_language(text).await.code, "es");
    }

    #[tokio::test]
    async fn code_analysis_uses_provider_profile() {
        let reply = r#"{"language": "TypeScript", "confidence": 0.9, "framework": "react",
            "suggestions": ["Memoise the crane list", ""], "complexity": 0.3}"#;
        let processor = processor_with(ScriptedProvider::fixed("stub", reply));

        let analysis = processor.analyze_code("const crane = useCrane();").await;

        assert_eq!(analysis.language, "typescript");
        assert_eq!(analysis.framework.as_deref(), Some("react"));
        assert_eq!(analysis.version, None);
        assert_eq!(analysis.suggestions, vec!["Memoise the crane list"]);
        assert_eq!(analysis.complexity, 0.3);
    }

    #[tokio::test]
    async fn code_analysis_falls_back_to_keywords() {
        let processor = processor_with(ScriptedProvider::failing("stub"));
        let python = "def area(self):\n    print(self.w)\n\nclass Beam:\n    def load(self): pass";

        let analysis = processor.analyze_code(python).await;

        assert_eq!(analysis.language, "python");
        assert!(analysis.suggestions.is_empty());
        assert_eq!(analysis.complexity, 0.5);
        assert!(analysis.framework.is_none());
    }

    #[tokio::test]
    async fn content_translation_caches_per_key_and_language() {
        let processor = processor_with(ScriptedProvider::fixed("stub", "Journal de chantier"));
        let content = MultilingualContentManager::new(Arc::new(processor));
        assert_eq!(content.current_language(), "en");

        let translated = content
            .translate_content("diary.title", "Site diary", &["en", "fr"])
            .await;

        assert_eq!(translated["en"], "Site diary");
        assert_eq!(translated["fr"], "Journal de chantier");
        assert_eq!(content.get_translation("diary.title", None), "Site diary");
        assert_eq!(content.get_translation("diary.title", Some("fr")), "Journal de chantier");
        assert_eq!(content.get_translation("diary.title", Some("de")), "diary.title");
        assert_eq!(content.get_translation("unknown.key", None), "unknown.key");

        content.set_language("fr");
        assert_eq!(content.get_translation("diary.title", None), "Journal de chantier");
    }

    #[tokio::test]
    async fn failed_translation_keeps_original_text() {
        let processor = processor_with(ScriptedProvider::failing("stub"));
        let content = MultilingualContentManager::new(Arc::new(processor));

        let translated = content.translate_content("lift.warn", "Stand clear", &["es"]).await;

        assert_eq!(translated["es"], "Stand clear");
        assert_eq!(content.export_translations("es")["lift.warn"], "Stand clear");
    }

    #[tokio::test]
    async fn bulk_translation_runs_entries_concurrently() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(ScriptedProvider::new(
            "stub",
            Script::Gate(gate.clone(), Box::new(Script::Echo)),
        ));
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(provider.clone());
        let processor = LanguageProcessor::new(registry, &AiConfig::default())
            .with_provider(ProviderId::from("stub"));
        let content = MultilingualContentManager::new(Arc::new(processor));

        let entries = [("diary.title", "Site diary"), ("lift.warn", "Stand clear")];
        let bulk = content.bulk_translate(&entries, &["de"]);
        let release = async {
            while provider.calls() < 2 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
            gate.notify_one();
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            tokio::join!(bulk, release)
        })
        .await
        .expect("entries were translated one after another");

        let exported = content.export_translations("de");
        assert_eq!(exported.len(), 2);
        assert!(exported["diary.title"].contains("SITE DIARY"));
        assert!(exported["lift.warn"].contains("STAND CLEAR"));
        assert!(content.export_translations("it").is_empty());
    }
}
