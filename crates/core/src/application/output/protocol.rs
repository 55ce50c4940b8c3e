// Agent stdout protocol: newline-delimited JSON events

use serde_json::Value;

/// Human-readable text carried by one stdout protocol line.
///
/// Expected shape:
/// `{"type":"assistant","message":{"content":[{"type":"text","text":"..."}, ...]}}`
///
/// - Lines that are not JSON pass through verbatim.
/// - For `assistant` events, `content[0]` gates extraction: when it is a text item,
///   its text and that of the immediately following text items are concatenated
///   (scanning stops at the first non-text item). When `content[0]` is anything
///   else (e.g. a `tool_use` marker) the line yields nothing, even if later items
///   are text.
/// - Other JSON events yield nothing.
///
/// NOTE: the first-item gate probably drops text that consumers would want
/// (`[tool_use, text]` lines). It is kept as-is because downstream readers may
/// depend on it; confirm the intended behaviour before changing it.
pub fn extract_text(line: &str) -> Option<String> {
    let event: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return Some(line.to_string()),
    };

    if event.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }

    let content = event.get("message")?.get("content")?.as_array()?;
    let text: String = content
        .iter()
        .map_while(|item| {
            (item.get("type").and_then(Value::as_str) == Some("text"))
                .then(|| item.get("text").and_then(Value::as_str).unwrap_or_default())
        })
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
