use once_cell::sync::Lazy;
use regex::Regex;

use crate::docx::document::StyleCatalog;
use crate::textutil::char_len;

static NUMBERED_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)*\.?\s+\p{Lu}").expect("numbered heading regex"));

const MAX_CAPS_HEADING_CHARS: usize = 120;

/// Decides which paragraphs are headings: by style (built-in levels or a
/// custom style that looks like one), or by shape of the text itself.
pub struct HeadingClassifier<'a> {
    styles: &'a StyleCatalog,
}

fn is_builtin_heading_name(name: &str) -> bool {
    let n = name.trim().to_ascii_lowercase();
    if n == "title" {
        return true;
    }
    let level = n
        .strip_prefix("heading")
        .map(str::trim_start)
        .or_else(|| n.strip_prefix('h'));
    matches!(level, Some(l) if l.len() == 1 && l.as_bytes()[0].is_ascii_digit() && l != "0")
}

fn looks_like_heading_name(name: &str) -> bool {
    let n = name.to_lowercase();
    n.contains("heading") || n.contains("title") || n.contains("header")
}

/// Short text whose cased letters are all upper case.
fn is_caps_phrase(text: &str) -> bool {
    let len = char_len(text);
    if len <= 2 || len > MAX_CAPS_HEADING_CHARS {
        return false;
    }
    let mut cased = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

impl<'a> HeadingClassifier<'a> {
    pub fn new(styles: &'a StyleCatalog) -> Self {
        Self { styles }
    }

    pub fn is_heading_style(&self, style_id: &str) -> bool {
        let name = self.styles.display_name(style_id);
        if is_builtin_heading_name(style_id) || is_builtin_heading_name(name) {
            return true;
        }
        if looks_like_heading_name(name) {
            return true;
        }
        let Some(base) = self.styles.get(style_id).and_then(|s| s.based_on.as_deref()) else {
            return false;
        };
        self.styles
            .display_name(base)
            .to_ascii_lowercase()
            .starts_with("heading")
    }

    pub fn is_heading(&self, style: Option<&str>, text: &str) -> bool {
        if style.is_some_and(|s| self.is_heading_style(s)) {
            return true;
        }
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        is_caps_phrase(text) || NUMBERED_HEADING_RE.is_match(text)
    }
}
