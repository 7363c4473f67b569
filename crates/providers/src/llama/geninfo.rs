use serde_json::Value;

/// Diagnostic fields worth reporting from the terminal stream event, in the
/// order they are emitted.
const GENERATION_INFO_KEYS: [&str; 8] = [
    "tokens_cached",
    "tokens_evaluated",
    "tokens_predicted",
    "stopped_eos",
    "stopped_limit",
    "stopped_word",
    "stopping_word",
    "timings",
];

/// Pull the allow-listed diagnostics out of the final stream event as
/// `"key: value"` lines. Missing keys are skipped; nothing here feeds back
/// into control flow.
pub fn extract(event: &Value) -> Vec<String> {
    let Some(obj) = event.as_object() else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for key in GENERATION_INFO_KEYS {
        let Some(value) = obj.get(key) else { continue };
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(value)
                .unwrap_or_else(|_| value.to_string()),
            other => other.to_string(),
        };
        lines.push(format!("{key}: {rendered}"));
    }
    lines
}
