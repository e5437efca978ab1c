use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentinels::{split_by_placeholders, strip_placeholders};

static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter"));

const RTL_LANGS: [&str; 12] = [
    "ar", "arc", "dv", "fa", "ha", "he", "khw", "ks", "ku", "ps", "ur", "yi",
];

const DEVANAGARI_DIGITS: [char; 10] = ['०', '१', '२', '३', '४', '५', '६', '७', '८', '९'];
const ARABIC_INDIC_DIGITS: [char; 10] = ['٠', '١', '٢', '٣', '٤', '٥', '٦', '٧', '٨', '٩'];

fn primary_subtag(lang: &str) -> String {
    lang.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_rtl_language(lang: Option<&str>) -> bool {
    match lang {
        Some(l) => RTL_LANGS.contains(&primary_subtag(l).as_str()),
        None => false,
    }
}

pub fn is_hindi(lang: &str) -> bool {
    primary_subtag(lang) == "hi"
}

/// More than 15% of the alphabetic characters fall in the Arabic block.
pub fn is_arabic_text(text: &str) -> bool {
    let mut arabic = 0usize;
    let mut alpha = 0usize;
    for ch in text.chars() {
        if ('\u{0600}'..='\u{06FF}').contains(&ch) {
            arabic += 1;
        }
        if ch.is_alphabetic() {
            alpha += 1;
        }
    }
    if alpha == 0 || arabic == 0 {
        return false;
    }
    (arabic as f64 / alpha as f64) > 0.15
}

fn digit_table(target_lang: &str) -> Option<&'static [char; 10]> {
    let lang = target_lang.trim().to_ascii_lowercase();
    if primary_subtag(&lang) == "hi" {
        return Some(&DEVANAGARI_DIGITS);
    }
    // Regional Arabic variants keep Western digits.
    if lang == "ar" {
        return Some(&ARABIC_INDIC_DIGITS);
    }
    None
}

pub fn needs_digit_localization(target_lang: &str) -> bool {
    digit_table(target_lang).is_some()
}

pub fn localize_digits(text: &str, target_lang: &str) -> String {
    let Some(table) = digit_table(target_lang) else {
        return text.to_string();
    };
    text.chars()
        .map(|c| match c.to_digit(10) {
            Some(d) if c.is_ascii_digit() => table[d as usize],
            _ => c,
        })
        .collect()
}

/// Placeholder tokens carry ASCII ordinals that must survive untouched.
pub fn localize_digits_outside_placeholders(text: &str, target_lang: &str) -> String {
    if !needs_digit_localization(target_lang) {
        return text.to_string();
    }
    split_by_placeholders(text)
        .into_iter()
        .map(|(is_token, piece)| {
            if is_token {
                piece.to_string()
            } else {
                localize_digits(piece, target_lang)
            }
        })
        .collect()
}

/// Nothing worth sending to a backend: no letters once placeholders are gone.
pub fn is_trivial_text(text: &str) -> bool {
    let plain = strip_placeholders(text);
    let plain = plain.trim();
    if plain.is_empty() {
        return true;
    }
    !LETTER_RE.is_match(plain)
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtl_detection_by_code() {
        assert!(is_rtl_language(Some("ar-SA")));
        assert!(is_rtl_language(Some("he")));
        assert!(is_rtl_language(Some("UR")));
        assert!(!is_rtl_language(Some("hi-IN")));
        assert!(!is_rtl_language(None));
    }

    #[test]
    fn arabic_ratio_threshold() {
        assert!(is_arabic_text("مرحبا world"));
        assert!(!is_arabic_text("a long english sentence with ب"));
        assert!(!is_arabic_text("12345"));
    }

    #[test]
    fn digits_localized_outside_tokens_only() {
        let out = localize_digits_outside_placeholders("Room 12 <NUMUNIT_1> floor 3", "hi");
        assert_eq!(out, "Room १२ <NUMUNIT_1> floor ३");

        assert_eq!(localize_digits("2024", "ar"), "٢٠٢٤");
        assert_eq!(localize_digits("2024", "ar-EG"), "2024");
        assert_eq!(localize_digits("2024", "fr"), "2024");
    }

    #[test]
    fn trivial_text() {
        assert!(is_trivial_text("   "));
        assert!(is_trivial_text("<URL_1> 42 -"));
        assert!(!is_trivial_text("see <URL_1>"));
    }
}
