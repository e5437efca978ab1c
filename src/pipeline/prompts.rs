use serde::Serialize;

/// Separates the instructions from the batch in every payload.
pub const INPUT_JSON_MARKER: &str = "\n\nINPUT_JSON:\n";

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WireItem {
    pub id: String,
    pub text: String,
}

pub fn system_prompt(target_lang: &str, ids: &[String]) -> String {
    let id_list = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
    let n = ids.len();
    format!(
        "YOU ARE A PRECISE, FAITHFUL TRANSLATOR. RETURN ONLY valid JSON (no code fences) as an array of exactly {n} objects.
Each object MUST have keys 'id' and 'text' only. The 'id' MUST be one of: {id_list}. Do NOT add, remove, or reorder ids.
Translate each 'text' into {target_lang} preserving meaning.
SPACING:
- Do not add or remove necessary spaces; keep single spaces where present.
- Do not insert spaces inside words or before punctuation.
- Numbers should use the {target_lang} numbering format.
- Keep placeholders exactly as-is (e.g. <URL_0>, <SEG_1>) without extra spaces around them.
HINDI:
- Do not insert spaces between Devanagari letters; natural punctuation spacing only.
ACRONYMS/ABBREVIATIONS:
- Translate acronyms and abbreviations; preserve original casing.
- Do not add periods to acronyms unless present in the source.
Do NOT summarize or rewrite; translate fully. Preserve punctuation, capitalization (ALL CAPS headings), bullets, numbering, symbols and layout cues.
FOLLOW THESE INSTRUCTIONS CAREFULLY AND STRICTLY."
    )
}

/// System text, marker, then the JSON batch.
pub fn build_batch_prompt(items: &[WireItem], target_lang: &str) -> String {
    let ids: Vec<String> = items.iter().map(|it| it.id.clone()).collect();
    let system = system_prompt(target_lang, &ids);
    let input_json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    format!("{system}{INPUT_JSON_MARKER}{input_json}")
}

/// The JSON batch carried by a payload, if the marker is present.
pub fn payload_input_json(payload: &str) -> Option<&str> {
    payload
        .split_once(INPUT_JSON_MARKER)
        .map(|(_, json)| json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_ids_and_batch() {
        let items = vec![
            WireItem {
                id: "P0".into(),
                text: "Hello".into(),
            },
            WireItem {
                id: "P3".into(),
                text: "नमस्ते \"x\"".into(),
            },
        ];
        let payload = build_batch_prompt(&items, "hi");
        let (system, json) = payload.split_once(INPUT_JSON_MARKER).expect("marker");
        assert!(system.contains("exactly 2 objects"));
        assert!(system.contains(r#"["P0","P3"]"#));
        assert!(system.contains("into hi"));
        assert_eq!(payload_input_json(&payload), Some(json));
        assert_eq!(json, r#"[{"id":"P0","text":"Hello"},{"id":"P3","text":"नमस्ते \"x\""}]"#);
    }
}
