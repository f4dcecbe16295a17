//! Parameter redaction for audit events

use regex::Regex;
use sprocket_core::Value;
use std::sync::LazyLock;

/// Replacement marker for sensitive parameter values
pub const REDACTED: &str = "[REDACTED]";

// Long string values are truncated to this many characters in events.
const MAX_STRING_LEN: usize = 200;

static SENSITIVE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|pwd|secret|token|credential|api[_-]?key|authorization)")
        .expect("sensitive key regex")
});

/// Render parameters for an activity event, redacting sensitive keys and
/// truncating long string values.
pub fn redact_parameters(parameters: &[(String, Value)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in parameters {
        let rendered = if SENSITIVE_KEY_RE.is_match(name) {
            serde_json::Value::String(REDACTED.to_string())
        } else {
            render(value)
        };
        map.insert(name.clone(), rendered);
    }
    serde_json::Value::Object(map)
}

fn render(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int16(n) => (*n as i64).into(),
        Value::Int32(n) => (*n as i64).into(),
        Value::Int64(n) => (*n).into(),
        Value::Float32(n) => serde_json::json!(*n as f64),
        Value::Float64(n) => serde_json::json!(*n),
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => {
            let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
            serde_json::Value::String(format!("{truncated}…"))
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
        Value::Json(j) => j.clone(),
        other => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn sensitive_keys_are_redacted() {
        let redacted = redact_parameters(&params(&[
            ("UserPassword", Value::String("hunter2".into())),
            ("apiKey", Value::String("sk-123".into())),
            ("refresh_token", Value::String("t".into())),
            ("user_id", Value::Int32(7)),
        ]));

        assert_eq!(redacted["UserPassword"], REDACTED);
        assert_eq!(redacted["apiKey"], REDACTED);
        assert_eq!(redacted["refresh_token"], REDACTED);
        assert_eq!(redacted["user_id"], 7);
    }

    #[test]
    fn long_strings_are_truncated() {
        let long = "x".repeat(500);
        let redacted = redact_parameters(&params(&[("note", Value::String(long))]));
        let rendered = redacted["note"].as_str().unwrap();
        assert!(rendered.chars().count() <= 201);
        assert!(rendered.ends_with('…'));
    }

    #[test]
    fn short_values_render_plainly() {
        let redacted = redact_parameters(&params(&[
            ("name", Value::String("Ada".into())),
            ("count", Value::Int64(3)),
            ("missing", Value::Null),
        ]));
        assert_eq!(redacted["name"], "Ada");
        assert_eq!(redacted["count"], 3);
        assert!(redacted["missing"].is_null());
    }
}
