use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::BackendError;
use crate::pipeline::cache::BatchTranslation;
use crate::pipeline::prompts::WireItem;

/// Unescapes entity-encoded replies and drops markdown code fences.
pub fn clean_response(raw: &str) -> String {
    let text = raw.trim();
    let text = match quick_xml::escape::unescape(text) {
        Ok(s) => s.into_owned(),
        Err(_) => text.to_string(),
    };
    strip_code_fence(text.trim()).to_string()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Finds a JSON value in noisy output: the whole text first, then from the
/// first bracket or brace with progressively shorter closing bounds.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    let start = text.find(['[', '{'])?;
    let tail = &text[start..];
    let closers: Vec<usize> = tail
        .char_indices()
        .filter(|(_, c)| *c == ']' || *c == '}')
        .map(|(i, _)| i)
        .collect();
    for &end in closers.iter().rev() {
        if let Ok(v) = serde_json::from_str::<Value>(&tail[..=end]) {
            return Some(v);
        }
    }
    None
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_item(v: &Value) -> Option<(String, String)> {
    let obj = v.as_object()?;
    let id = scalar_string(obj.get("id")?)?;
    let text = scalar_string(obj.get("text")?)?;
    Some((id, text))
}

/// `{id, text}` pairs from an array, a single object, or an object holding
/// such an array under any key.
pub fn collect_items(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Array(arr) => arr.iter().filter_map(as_item).collect(),
        Value::Object(obj) => {
            if let Some(item) = as_item(value) {
                return vec![item];
            }
            for inner in obj.values() {
                if let Value::Array(arr) = inner {
                    let items: Vec<(String, String)> = arr.iter().filter_map(as_item).collect();
                    if !items.is_empty() {
                        return items;
                    }
                }
            }
            vec![]
        }
        _ => vec![],
    }
}

#[derive(Clone, Debug, Default)]
pub struct Reconciled {
    pub map: BatchTranslation,
    /// Requested ids absent from the reply, filled from source.
    pub missing: Vec<String>,
    /// Reply entries dropped as unknown or duplicate.
    pub dropped: usize,
}

/// Applies the id contract: unknown ids and repeats are dropped (first one
/// wins), missing ids fall back to their source text. A reply that matches
/// none of the requested ids is an error.
pub fn reconcile(
    requested: &[WireItem],
    items: Vec<(String, String)>,
) -> Result<Reconciled, BackendError> {
    let wanted: HashSet<&str> = requested.iter().map(|it| it.id.as_str()).collect();
    let mut got: HashMap<String, String> = HashMap::new();
    let mut dropped = 0usize;
    for (id, text) in items {
        if !wanted.contains(id.as_str()) || got.contains_key(&id) {
            dropped += 1;
            continue;
        }
        got.insert(id, text);
    }
    if got.is_empty() {
        return Err(BackendError::IdentifierMismatch(format!(
            "{} requested, 0 matched",
            requested.len()
        )));
    }
    let mut missing: Vec<String> = Vec::new();
    for it in requested {
        if !got.contains_key(&it.id) {
            missing.push(it.id.clone());
            got.insert(it.id.clone(), it.text.clone());
        }
    }
    Ok(Reconciled {
        map: got,
        missing,
        dropped,
    })
}

pub fn parse_response(raw: &str, requested: &[WireItem]) -> Result<Reconciled, BackendError> {
    if raw.trim().is_empty() {
        return Err(BackendError::EmptyResponse);
    }
    let cleaned = clean_response(raw);
    let value = extract_json(&cleaned)
        .ok_or_else(|| BackendError::Parse("no JSON value in model output".to_string()))?;
    reconcile(requested, collect_items(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(ids: &[&str]) -> Vec<WireItem> {
        ids.iter()
            .map(|id| WireItem {
                id: id.to_string(),
                text: format!("src {id}"),
            })
            .collect()
    }

    #[test]
    fn extracts_from_prose_and_fences() {
        let raw = "Sure! Here you go:\n```json\n[{\"id\":\"P0\",\"text\":\"नमस्ते\"}]\n```\nHope it helps {smile}";
        let r = parse_response(raw, &req(&["P0"])).expect("parse");
        assert_eq!(r.map["P0"], "नमस्ते");

        let fenced = "```json\n[{\"id\":\"P0\",\"text\":\"a\"}]\n```";
        assert_eq!(clean_response(fenced), "[{\"id\":\"P0\",\"text\":\"a\"}]");
    }

    #[test]
    fn entity_escaped_reply_is_unescaped() {
        let raw = "[{&quot;id&quot;:&quot;P0&quot;,&quot;text&quot;:&quot;x &amp; y&quot;}]";
        let r = parse_response(raw, &req(&["P0"])).expect("parse");
        assert_eq!(r.map["P0"], "x & y");
    }

    #[test]
    fn accepts_object_and_wrapped_shapes() {
        let single = extract_json(r#"{"id":"P1","text":42}"#).expect("json");
        assert_eq!(collect_items(&single), vec![("P1".to_string(), "42".to_string())]);
        let wrapped = extract_json(r#"{"translations":[{"id":"P1","text":"t"}]}"#).expect("json");
        assert_eq!(collect_items(&wrapped), vec![("P1".to_string(), "t".to_string())]);
    }

    #[test]
    fn id_set_is_closed_over_the_request() {
        let requested = req(&["P0", "P1", "P2"]);
        let items = vec![
            ("P1".to_string(), "one".to_string()),
            ("P9".to_string(), "stray".to_string()),
            ("P1".to_string(), "again".to_string()),
            ("P0".to_string(), "zero".to_string()),
        ];
        let r = reconcile(&requested, items).expect("reconcile");
        let mut keys: Vec<&String> = r.map.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["P0", "P1", "P2"]);
        assert_eq!(r.map["P1"], "one");
        assert_eq!(r.map["P2"], "src P2");
        assert_eq!(r.missing, vec!["P2"]);
        assert_eq!(r.dropped, 2);
    }

    #[test]
    fn no_match_and_garbage_are_errors() {
        let err = parse_response(r#"[{"id":"X","text":"t"}]"#, &req(&["P0"])).expect_err("mismatch");
        assert!(matches!(err, BackendError::IdentifierMismatch(_)));
        let err = parse_response("no json here", &req(&["P0"])).expect_err("parse");
        assert!(matches!(err, BackendError::Parse(_)));
        let err = parse_response("   ", &req(&["P0"])).expect_err("empty");
        assert!(matches!(err, BackendError::EmptyResponse));
    }
}
