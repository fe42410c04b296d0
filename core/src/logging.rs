use log::Level;
use serde_json::Value;

/// Emit a structured diagnostic through the `log` facade.
///
/// Records carry the event code and module as their target so hosts can
/// filter on `asagents::ai.runtime` and similar. The optional `data` payload is
/// rendered as compact JSON after the message.
pub fn log_event(
    level: Level,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) {
    let target = format!("asagents::{module}");
    if !log::log_enabled!(target: &target, level) {
        return;
    }
    let line = format_event(code, message, explain, data.as_ref());
    log::log!(target: &target, level, "{line}");
}

fn format_event(
    code: Option<&str>,
    message: &str,
    explain: Option<&str>,
    data: Option<&Value>,
) -> String {
    let mut line = String::new();
    if let Some(code) = code {
        line.push('[');
        line.push_str(code);
        line.push_str("] ");
    }
    line.push_str(message);
    if let Some(explain) = explain {
        line.push_str(" (");
        line.push_str(explain);
        line.push(')');
    }
    if let Some(data) = data {
        line.push(' ');
        line.push_str(&data.to_string());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_event_includes_code_explain_and_data() {
        let line = format_event(
            Some("AI-0200"),
            "AI chat invocation succeeded",
            Some("provider answered"),
            Some(&json!({ "provider": "gemini" })),
        );
        assert_eq!(
            line,
            r#"[AI-0200] AI chat invocation succeeded (provider answered) {"provider":"gemini"}"#
        );
    }

    #[test]
    fn format_event_without_optional_parts() {
        assert_eq!(format_event(None, "plain", None, None), "plain");
    }
}
