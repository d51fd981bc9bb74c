//! Defensive parsing of capability output.
//!
//! Extraction output is decomposed with a fixed cascade: a JSON array (or an
//! object wrapping one), then a numbered or bulleted list, then blank-line
//! separated paragraphs, then single lines. A format that is recognised wins
//! even when it yields fewer items than requested; the caller records the
//! shortfall.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern")
});
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*+•])\s+(.+?)\s*$").expect("list item pattern")
});
static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("array pattern"));
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("object pattern"));
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n\s*\r?\n").expect("paragraph pattern"));

/// Object fields that may carry the idea text inside a JSON array item.
const STUB_FIELDS: [&str; 4] = ["text", "idea", "approach", "title"];

/// Strip a Markdown code fence and a JSON string quoting layer, if present.
pub fn unwrap_fenced(text: &str) -> String {
    let mut body = text.trim();
    if let Some(inner) = FENCED.captures(body).and_then(|c| c.get(1)) {
        body = inner.as_str().trim();
    }
    if body.len() >= 2 && body.starts_with('"') && body.ends_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(body) {
            return inner.trim().to_string();
        }
    }
    body.to_string()
}

/// Recover up to `count` idea stubs from one blob of extraction output.
pub fn parse_stubs(text: &str, count: usize) -> Vec<String> {
    let body = unwrap_fenced(text);

    let mut stubs = structured(&body);
    if stubs.is_empty() {
        stubs = list_items(&body);
    }
    if stubs.is_empty() {
        stubs = paragraphs(&body);
        if stubs.len() < count {
            let single = lines(&body);
            if single.len() > stubs.len() {
                stubs = single;
            }
        }
    }

    stubs.truncate(count);
    stubs
}

/// Merge output: `{"merged": "..."}`, a JSON string, or the raw text.
pub fn parse_merge_output(text: &str) -> String {
    let body = unwrap_fenced(text);
    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => {
            if let Some(Value::String(merged)) = map.get("merged") {
                return merged.trim().to_string();
            }
        }
        Ok(Value::String(s)) => return s.trim().to_string(),
        _ => {}
    }
    body
}

fn structured(body: &str) -> Vec<String> {
    let value = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| first_json(&JSON_ARRAY, body))
        .or_else(|| first_json(&JSON_OBJECT, body));

    let items = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove("ideas").or_else(|| map.remove("items")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items.iter().filter_map(stub_text).collect()
}

fn first_json(pattern: &Regex, body: &str) -> Option<Value> {
    pattern
        .find(body)
        .and_then(|m| serde_json::from_str(m.as_str()).ok())
}

fn stub_text(item: &Value) -> Option<String> {
    let text = match item {
        Value::String(s) => s.as_str(),
        Value::Object(map) => STUB_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))?,
        _ => return None,
    };
    clean(text)
}

fn list_items(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|c| c.get(1).and_then(|m| clean(m.as_str())))
        .collect()
}

fn paragraphs(body: &str) -> Vec<String> {
    PARAGRAPH_BREAK.split(body).filter_map(clean).collect()
}

fn lines(body: &str) -> Vec<String> {
    body.lines().filter_map(clean).collect()
}

fn clean(raw: &str) -> Option<String> {
    let text = raw.trim().trim_matches('"').trim();
    (!text.is_empty()).then(|| text.to_string())
}
