//! Entry extraction from JSON lists.
//!
//! Accepted shapes:
//! - `["vless://...", "trojan://..."]`
//! - `[{"uri": "vless://..."}, {"url": "..."}, {"config": "..."}]`
//! - `{"configs": [...]}` (also `entries`, `servers`, `proxies`)

use serde_json::Value;
use subharvest_shared::{HarvestError, Result};

/// Object keys that may hold the list.
const LIST_KEYS: [&str; 4] = ["configs", "entries", "servers", "proxies"];

/// Item keys that may hold the entry string.
const ITEM_KEYS: [&str; 4] = ["uri", "url", "config", "link"];

/// Flatten a JSON list into line-delimited text.
///
/// Items without a recognizable entry string are emitted as compact JSON so
/// the validator rejects and counts them instead of them vanishing.
pub(crate) fn extract_entries(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| HarvestError::parse(format!("invalid JSON payload: {e}")))?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .ok_or_else(|| {
                HarvestError::parse(format!(
                    "JSON object has none of the list keys {LIST_KEYS:?}"
                ))
            })?,
        _ => return Err(HarvestError::parse("JSON payload is not a list")),
    };

    let lines: Vec<String> = items.iter().map(item_line).collect();
    Ok(lines.join("\n"))
}

fn item_line(item: &Value) -> String {
    match item {
        Value::String(s) => single_line(s),
        Value::Object(map) => ITEM_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(single_line)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}

/// Items are passed through with only their ends trimmed. An item with an
/// embedded line break is emitted JSON-quoted, so it is rejected and counted
/// as one candidate instead of splitting into several.
fn single_line(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.contains(['\n', '\r']) {
        Value::String(trimmed.to_string()).to_string()
    } else {
        trimmed.to_string()
    }
}
