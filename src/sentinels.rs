use once_cell::sync::Lazy;
use regex::Regex;

/// Any placeholder shaped like `<TAG_n>`; tags are upper-case ASCII.
pub static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[A-Z]+_\d+>").expect("placeholder regex"));

pub fn placeholder_token(tag: &str, ordinal: usize) -> String {
    format!("<{tag}_{ordinal}>")
}

/// Splits a token back into `(tag, ordinal)`.
pub fn parse_placeholder(token: &str) -> Option<(&str, usize)> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    let (tag, n) = inner.rsplit_once('_')?;
    if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some((tag, n.parse().ok()?))
}

pub fn placeholders_in(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }
    PLACEHOLDER_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn strip_placeholders(text: &str) -> String {
    PLACEHOLDER_RE.replace_all(text, " ").into_owned()
}

/// Splits `text` into alternating plain / placeholder pieces so callers can
/// transform only the plain parts.
pub fn split_by_placeholders(text: &str) -> Vec<(bool, &str)> {
    let mut parts: Vec<(bool, &str)> = Vec::new();
    let mut pos = 0usize;
    for m in PLACEHOLDER_RE.find_iter(text) {
        if m.start() > pos {
            parts.push((false, &text[pos..m.start()]));
        }
        parts.push((true, m.as_str()));
        pos = m.end();
    }
    if pos < text.len() {
        parts.push((false, &text[pos..]));
    }
    parts
}

/// Joins the pieces of a merged paragraph. Segment markers share the
/// placeholder grammar, so digit localization and triviality checks skip them.
pub const SEGMENT_TAG: &str = "SEG";

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<SEG_\d+>").expect("segment regex"));

pub fn segment_token(index: usize) -> String {
    placeholder_token(SEGMENT_TAG, index)
}

pub fn split_segments(text: &str) -> Vec<&str> {
    SEGMENT_RE.split(text).collect()
}

pub fn strip_segments(text: &str) -> String {
    SEGMENT_RE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape_round_trips() {
        let tok = placeholder_token("EMAIL", 3);
        assert_eq!(tok, "<EMAIL_3>");
        assert_eq!(parse_placeholder(&tok), Some(("EMAIL", 3)));
        assert_eq!(parse_placeholder("<email_3>"), None);
        assert_eq!(parse_placeholder("<EMAIL_x>"), None);
    }

    #[test]
    fn split_keeps_every_byte() {
        let text = "call <PHONE_1> or mail <EMAIL_2>.";
        let parts = split_by_placeholders(text);
        let joined: String = parts.iter().map(|(_, s)| *s).collect();
        assert_eq!(joined, text);
        assert_eq!(parts.iter().filter(|(p, _)| *p).count(), 2);
        assert_eq!(placeholders_in(text), vec!["<PHONE_1>", "<EMAIL_2>"]);
    }

    #[test]
    fn segments_split_and_strip() {
        let joined = format!("Click {}here{} now", segment_token(1), segment_token(2));
        assert_eq!(split_segments(&joined), vec!["Click ", "here", " now"]);
        assert_eq!(split_segments("no markers"), vec!["no markers"]);
        assert_eq!(strip_segments("a <SEG_1>b"), "a b");
    }
}
