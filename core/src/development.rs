//! Code-completion fan-out and development-environment context sharing.
//!
//! One code context is sent to several providers at once. Each provider gets
//! its own temporary conversation; whatever comes back is parsed, merged in
//! candidate order and ranked. A provider that fails simply contributes
//! nothing.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use futures::future::join_all;
use log::Level;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agents::config::{AiConfig, ProviderId};
use crate::errors::{AiError, Result};
use crate::language::LanguageProcessor;
use crate::logging::log_event;
use crate::model_manager::{ConversationManager, SendOptions};

const SURROUNDING_LINES: usize = 5;
const MAX_SUGGESTIONS: usize = 10;
const STRUCTURED_DEFAULT_CONFIDENCE: f32 = 0.8;
const HEURISTIC_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Zero-based line index.
    pub line: usize,
    /// Zero-based column, counted in characters.
    pub column: usize,
}

impl CursorPosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub severity: Severity,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeContext {
    pub language: String,
    pub framework: Option<String>,
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub errors: Vec<CompileError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Completion,
    Refactor,
    Fix,
    Documentation,
}

impl SuggestionKind {
    /// Tie-break priority between suggestions of equal confidence.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Fix => 4,
            Self::Refactor => 3,
            Self::Completion => 2,
            Self::Documentation => 1,
        }
    }

    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "fix" => Self::Fix,
            "refactor" => Self::Refactor,
            "documentation" | "docs" => Self::Documentation,
            _ => Self::Completion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    Structured,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub kind: SuggestionKind,
    pub title: String,
    pub description: String,
    pub code: String,
    pub confidence: f32,
    pub provider: ProviderId,
    pub parse_mode: ParseMode,
}

/// Suggestions parsed from one provider response, tagged with how they were
/// obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSuggestions {
    /// The response contained a JSON object with a `suggestions` array.
    Structured(Vec<CodeSuggestion>),
    /// Fenced code blocks were lifted out of free text.
    Heuristic(Vec<CodeSuggestion>),
}

impl ParsedSuggestions {
    pub fn mode(&self) -> ParseMode {
        match self {
            Self::Structured(_) => ParseMode::Structured,
            Self::Heuristic(_) => ParseMode::Heuristic,
        }
    }

    pub fn into_vec(self) -> Vec<CodeSuggestion> {
        match self {
            Self::Structured(items) | Self::Heuristic(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentEnvironment {
    pub id: String,
    pub name: String,
    /// Primary programming language, or `multi`.
    pub language: String,
    pub framework: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl DevelopmentEnvironment {
    fn seed(
        id: &str,
        name: &str,
        language: &str,
        framework: Option<&str>,
        extensions: &[&str],
        capabilities: &[&str],
    ) -> Self {
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            framework: framework.map(str::to_string),
            extensions: owned(extensions),
            capabilities: owned(capabilities),
        }
    }
}

fn default_environments() -> Vec<DevelopmentEnvironment> {
    vec![
        DevelopmentEnvironment::seed(
            "vscode",
            "Visual Studio Code",
            "multi",
            None,
            &["copilot", "intellisense", "debugger"],
            &["completion", "refactoring", "debugging", "git"],
        ),
        DevelopmentEnvironment::seed(
            "chatgpt",
            "ChatGPT Interface",
            "multi",
            None,
            &[],
            &["conversation", "code-generation", "explanation", "debugging"],
        ),
        DevelopmentEnvironment::seed(
            "gemini",
            "Google Gemini",
            "multi",
            None,
            &[],
            &["multimodal", "code-analysis", "conversation", "translation"],
        ),
        DevelopmentEnvironment::seed(
            "copilot",
            "GitHub Copilot",
            "multi",
            None,
            &[],
            &["code-completion", "code-generation", "chat", "explanation"],
        ),
        DevelopmentEnvironment::seed(
            "node",
            "Node.js Environment",
            "javascript",
            Some("node"),
            &[],
            &["execution", "debugging", "npm", "testing"],
        ),
        DevelopmentEnvironment::seed(
            "react",
            "React Development",
            "typescript",
            Some("react"),
            &[],
            &["jsx", "hooks", "components", "hot-reload"],
        ),
        DevelopmentEnvironment::seed(
            "vite",
            "Vite Build System",
            "javascript",
            Some("vite"),
            &[],
            &["bundling", "hot-reload", "optimization", "dev-server"],
        ),
    ]
}

/// Dependency renames between frameworks. Pairs not listed map nothing.
const FRAMEWORK_MAPPINGS: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "react",
        "vue",
        &[("react", "vue"), ("react-dom", "vue"), ("react-router-dom", "vue-router")],
    ),
    (
        "react",
        "angular",
        &[
            ("react", "@angular/core"),
            ("react-dom", "@angular/platform-browser"),
            ("react-router-dom", "@angular/router"),
        ],
    ),
];

pub fn map_dependencies(
    dependencies: &[String],
    source: Option<&str>,
    target: Option<&str>,
) -> Vec<String> {
    let mapping = match (source, target) {
        (Some(source), Some(target)) => FRAMEWORK_MAPPINGS
            .iter()
            .find(|(from, to, _)| *from == source && *to == target)
            .map(|(_, _, pairs)| *pairs),
        _ => None,
    };
    let Some(mapping) = mapping else {
        return dependencies.to_vec();
    };
    dependencies
        .iter()
        .map(|dep| {
            mapping
                .iter()
                .find(|(from, _)| *from == dep.as_str())
                .map_or_else(|| dep.clone(), |(_, to)| to.to_string())
        })
        .collect()
}

fn comment_pattern(language: &str) -> Option<&'static Regex> {
    static C_STYLE: OnceLock<Regex> = OnceLock::new();
    static HASH_STYLE: OnceLock<Regex> = OnceLock::new();
    match language {
        "javascript" | "typescript" | "java" | "cpp" | "c" | "csharp" | "rust" | "go" => Some(
            C_STYLE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("static regex")),
        ),
        "python" => Some(HASH_STYLE.get_or_init(|| {
            Regex::new(r#"(?s)""".*?"""|#[^\n]*"#).expect("static regex")
        })),
        _ => None,
    }
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```[\w+-]*\n?(.*?)```").expect("static regex"))
}

/// Prompt shared by every candidate provider.
pub fn build_prompt(context: &CodeContext, cursor: CursorPosition) -> String {
    let lines: Vec<&str> = context.content.lines().collect();
    let current = lines.get(cursor.line).copied().unwrap_or_default();
    let before: String = current.chars().take(cursor.column).collect();
    let after: String = current.chars().skip(cursor.column).collect();
    let start = cursor.line.saturating_sub(SURROUNDING_LINES).min(lines.len());
    let end = cursor
        .line
        .saturating_add(SURROUNDING_LINES + 1)
        .min(lines.len());
    let surrounding = lines[start..end.max(start)].join("\n");
    let lang = &context.language;

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Please provide code completions for the following {lang} code context:\n"
    );
    let _ = writeln!(prompt, "File: {}", context.filename);
    let _ = writeln!(prompt, "Language: {lang}");
    if let Some(framework) = &context.framework {
        let _ = writeln!(prompt, "Framework: {framework}");
    }
    let _ = writeln!(
        prompt,
        "\nCurrent cursor position: Line {}, Column {}\n",
        cursor.line.saturating_add(1),
        cursor.column.saturating_add(1)
    );
    let _ = writeln!(prompt, "Code before cursor on current line:\n```{lang}\n{before}\n```\n");
    let _ = writeln!(prompt, "Code after cursor on current line:\n```{lang}\n{after}\n```\n");
    let _ = writeln!(prompt, "Surrounding code context:\n```{lang}\n{surrounding}\n```\n");
    if !context.dependencies.is_empty() {
        let _ = writeln!(prompt, "Dependencies: {}\n", context.dependencies.join(", "));
    }
    if !context.errors.is_empty() {
        let _ = writeln!(prompt, "Current errors:");
        for error in &context.errors {
            let _ = writeln!(prompt, "Line {}: {}", error.line, error.message);
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "Please provide:\n\
         1. Code completions that would be appropriate at the cursor position\n\
         2. Any refactoring suggestions for the surrounding code\n\
         3. Fixes for any identified errors\n\
         4. Documentation suggestions if applicable\n\n\
         Format your response as JSON with the following structure:\n\
         {\n  \"suggestions\": [\n    {\n      \"type\": \"completion|refactor|fix|documentation\",\n      \
         \"title\": \"Brief title\",\n      \"description\": \"Detailed description\",\n      \
         \"code\": \"The actual code\",\n      \"confidence\": 0.0-1.0\n    }\n  ]\n}\n",
    );
    prompt
}

/// Parse one provider response. A JSON object carrying a `suggestions` array
/// wins; otherwise fenced code blocks become completions.
pub fn parse_suggestions(response: &str, provider: &ProviderId) -> ParsedSuggestions {
    match structured_suggestions(response, provider) {
        Some(items) => ParsedSuggestions::Structured(items),
        None => ParsedSuggestions::Heuristic(heuristic_suggestions(response, provider)),
    }
}

fn structured_suggestions(response: &str, provider: &ProviderId) -> Option<Vec<CodeSuggestion>> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&response[start..=end]).ok()?;
    let items = parsed.get("suggestions")?.as_array()?;
    let text = |item: &Value, key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);

    Some(
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let code = text(item, "code").filter(|c| !c.trim().is_empty())?;
                let kind = text(item, "type")
                    .or_else(|| text(item, "kind"))
                    .map_or(SuggestionKind::Completion, |k| SuggestionKind::parse(&k));
                let confidence = item
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map_or(STRUCTURED_DEFAULT_CONFIDENCE, |c| c as f32)
                    .clamp(0.0, 1.0);
                Some(CodeSuggestion {
                    kind,
                    title: text(item, "title").unwrap_or_else(|| format!("Suggestion {}", idx + 1)),
                    description: text(item, "description").unwrap_or_default(),
                    code,
                    confidence,
                    provider: provider.clone(),
                    parse_mode: ParseMode::Structured,
                })
            })
            .collect(),
    )
}

fn heuristic_suggestions(response: &str, provider: &ProviderId) -> Vec<CodeSuggestion> {
    fence_pattern()
        .captures_iter(response)
        .enumerate()
        .filter_map(|(idx, caps)| {
            let code = caps[1].trim();
            (!code.is_empty()).then(|| CodeSuggestion {
                kind: SuggestionKind::Completion,
                title: format!("Code Suggestion {}", idx + 1),
                description: format!("Generated by {provider}"),
                code: code.to_string(),
                confidence: HEURISTIC_CONFIDENCE,
                provider: provider.clone(),
                parse_mode: ParseMode::Heuristic,
            })
        })
        .collect()
}

fn normalized_code(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable sort by confidence then kind priority, drop repeated code (first
/// ranked occurrence wins) and keep the top ten.
pub fn rank_suggestions(mut suggestions: Vec<CodeSuggestion>) -> Vec<CodeSuggestion> {
    suggestions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.kind.priority().cmp(&a.kind.priority()))
    });
    let mut seen = HashSet::new();
    suggestions
        .into_iter()
        .filter(|s| seen.insert(normalized_code(&s.code)))
        .take(MAX_SUGGESTIONS)
        .collect()
}

pub struct SuggestionOrchestrator {
    conversations: Arc<ConversationManager>,
    language: Arc<LanguageProcessor>,
    candidates: Vec<ProviderId>,
    environments: RwLock<Vec<DevelopmentEnvironment>>,
    shared: RwLock<HashMap<String, Map<String, Value>>>,
}

impl SuggestionOrchestrator {
    pub fn new(
        conversations: Arc<ConversationManager>,
        language: Arc<LanguageProcessor>,
        config: &AiConfig,
    ) -> Self {
        Self {
            conversations,
            language,
            candidates: config.suggestion_candidates.clone(),
            environments: RwLock::new(default_environments()),
            shared: RwLock::default(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<ProviderId>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn candidates(&self) -> &[ProviderId] {
        &self.candidates
    }

    /// Ranked suggestions from every candidate provider. Never fails: with no
    /// usable response the result is empty.
    pub async fn code_completions(
        &self,
        context: &CodeContext,
        cursor: CursorPosition,
    ) -> Vec<CodeSuggestion> {
        let prompt = build_prompt(context, cursor);
        let calls = self.candidates.iter().map(|provider| {
            let prompt = prompt.as_str();
            async move {
                let temp = self
                    .conversations
                    .temporary("Code Completion", "technical", "en");
                let result = self
                    .conversations
                    .send_message(temp.id(), prompt, SendOptions::new().provider(provider.clone()))
                    .await;
                (provider, result)
            }
        });

        let mut merged = Vec::new();
        for (provider, result) in join_all(calls).await {
            match result {
                Ok(response) => {
                    let parsed = parse_suggestions(&response.content, provider);
                    log::debug!(
                        "{provider} returned {:?} suggestions for {}",
                        parsed.mode(),
                        context.filename
                    );
                    merged.extend(parsed.into_vec());
                }
                Err(err) => log_event(
                    Level::Warn,
                    Some("DEV-0201"),
                    "ai.development",
                    "Code completion provider failed",
                    Some("The provider is skipped and the remaining suggestions are returned"),
                    Some(json!({
                        "provider": provider.as_str(),
                        "code": err.code(),
                        "error": err.to_string(),
                    })),
                ),
            }
        }
        rank_suggestions(merged)
    }

    pub fn register_environment(&self, environment: DevelopmentEnvironment) {
        let mut environments = self.environments.write().unwrap_or_else(PoisonError::into_inner);
        match environments.iter_mut().find(|env| env.id == environment.id) {
            Some(existing) => *existing = environment,
            None => environments.push(environment),
        }
    }

    pub fn environment(&self, id: &str) -> Result<DevelopmentEnvironment> {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|env| env.id == id)
            .cloned()
            .ok_or_else(|| AiError::EnvironmentNotFound(id.to_string()))
    }

    /// Capabilities of `id`; empty for unknown environments.
    pub fn environment_capabilities(&self, id: &str) -> Vec<String> {
        self.environment(id)
            .map(|env| env.capabilities)
            .unwrap_or_default()
    }

    pub fn list_environments(&self) -> Vec<DevelopmentEnvironment> {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adapt `context` from one environment to another and store it for the
    /// target. Returns `false` when either environment is unknown.
    ///
    /// Recognised context keys: `code` and `language` (comments are
    /// translated into `comment_language`, English by default, when the
    /// environments' primary languages differ) and `dependencies` (renamed
    /// when the frameworks differ).
    pub async fn share_context(
        &self,
        source_env: &str,
        target_env: &str,
        context: Map<String, Value>,
    ) -> bool {
        let environments = self.environment(source_env).and_then(|source| {
            self.environment(target_env).map(|target| (source, target))
        });
        let (source, target) = match environments {
            Ok(pair) => pair,
            Err(err) => {
                log_event(
                    Level::Warn,
                    Some(err.code()),
                    "ai.development",
                    "Context sharing failed",
                    Some(err.explain()),
                    Some(json!({ "source": source_env, "target": target_env })),
                );
                return false;
            }
        };

        let transformed = self.transform_context(context, &source, &target).await;
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.id, transformed);
        true
    }

    pub fn shared_context(&self, environment_id: &str) -> Option<Map<String, Value>> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(environment_id)
            .cloned()
    }

    pub fn clear_shared_context(&self, environment_id: &str) {
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(environment_id);
    }

    async fn transform_context(
        &self,
        mut context: Map<String, Value>,
        source: &DevelopmentEnvironment,
        target: &DevelopmentEnvironment,
    ) -> Map<String, Value> {
        if source.language != target.language && target.language != "multi" {
            let code = context.get("code").and_then(Value::as_str).map(str::to_string);
            let language = context.get("language").and_then(Value::as_str).map(str::to_string);
            if let (Some(code), Some(language)) = (code, language) {
                let comment_language = context
                    .get("comment_language")
                    .and_then(Value::as_str)
                    .unwrap_or("en")
                    .to_string();
                let translated = self.translate_comments(&code, &language, &comment_language).await;
                context.insert("code".into(), Value::String(translated));
            }
        }

        if source.framework != target.framework {
            let dependencies: Option<Vec<String>> = context
                .get("dependencies")
                .and_then(|deps| serde_json::from_value(deps.clone()).ok());
            if let Some(dependencies) = dependencies {
                let mapped = map_dependencies(
                    &dependencies,
                    source.framework.as_deref(),
                    target.framework.as_deref(),
                );
                context.insert("dependencies".into(), json!(mapped));
            }
        }
        context
    }

    /// Translate each comment in `code`. A comment whose translation fails is
    /// kept as written.
    async fn translate_comments(&self, code: &str, code_language: &str, target: &str) -> String {
        let Some(pattern) = comment_pattern(code_language) else {
            return code.to_string();
        };
        let mut output = String::with_capacity(code.len());
        let mut cursor = 0;
        for comment in pattern.find_iter(code) {
            output.push_str(&code[cursor..comment.start()]);
            match self
                .language
                .translate(comment.as_str(), target, Some("Code comment translation"))
                .await
            {
                Ok(translation) => output.push_str(&translation.translated_text),
                Err(err) => {
                    log::warn!("comment translation failed, keeping original: {err}");
                    output.push_str(comment.as_str());
                }
            }
            cursor = comment.end();
        }
        output.push_str(&code[cursor..]);
        output
    }
}
