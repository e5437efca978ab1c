use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentinels::{parse_placeholder, placeholder_token, PLACEHOLDER_RE};

/// Protected categories, in tie-break priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Source text that already looks like a placeholder.
    Raw,
    Title,
    Url,
    Email,
    NumUnit,
    Date,
    Version,
    Extension,
    Currency,
    Phone,
}

impl Category {
    pub fn tag(self) -> &'static str {
        match self {
            Category::Raw => "RAW",
            Category::Title => "TITLE",
            Category::Url => "URL",
            Category::Email => "EMAIL",
            Category::NumUnit => "NUMUNIT",
            Category::Date => "DATE",
            Category::Version => "VERSION",
            Category::Extension => "EXTENSION",
            Category::Currency => "CURRENCY",
            Category::Phone => "PHONE",
        }
    }
}

const UNITS: &str =
    "kg|g|mg|lbs|oz|m|cm|mm|km|mi|ft|in|K|yr|yrs|s|ms|Hz|rpm|V|A|W|kW|MB|GB|TB|Mbps|Gbps";

struct Matcher {
    category: Category,
    re: Regex,
}

fn build_matchers() -> Result<Vec<Matcher>, regex::Error> {
    let numunit = format!(
        r"\b\d{{1,3}}[,\d]*(?:\.\d+)?(?:\s*(?:%|°[CF])|\s*(?i:{UNITS})\b|\b)"
    );
    let specs: Vec<(Category, String)> = vec![
        (Category::Raw, PLACEHOLDER_RE.as_str().to_string()),
        (Category::Title, r"\b(?:Mrs|Mr|Dr|Prof|Sr|Jr)\.".to_string()),
        (Category::Url, r"https?://\S+|www\.\S+\.\w{2,}".to_string()),
        (Category::Email, r"\b[\w.\-]+@[\w.\-]+\.\w{2,}\b".to_string()),
        (Category::NumUnit, numunit),
        (
            Category::Date,
            r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|\d{1,2}-\d{1,2}-\d{2,4})\b".to_string(),
        ),
        (
            Category::Version,
            r"\b\d+\.\d+(?:\.\d+)*(?:-[a-zA-Z0-9]+)?\b".to_string(),
        ),
        (Category::Extension, r"\.[A-Za-z]{2,4}\b".to_string()),
        (
            Category::Currency,
            r"(?:USD|EUR|GBP|INR|JPY|CNY|₹|\$|€|£|¥)\s*\d+(?:,\d{3})*(?:\.\d{2})?\b".to_string(),
        ),
        (
            Category::Phone,
            r"\+?\d{1,3}[-\s]?\d{3,4}[-\s]?\d{4}\b".to_string(),
        ),
    ];
    specs
        .into_iter()
        .map(|(category, pat)| Ok(Matcher { category, re: Regex::new(&pat)? }))
        .collect()
}

static MATCHERS: Lazy<Result<Vec<Matcher>, regex::Error>> = Lazy::new(build_matchers);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardStatus {
    Protected(usize),
    Unchanged,
    /// The matchers were unusable; text was left as is.
    PassedThrough,
}

/// Token -> original substring, in creation order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    entries: Vec<(String, String)>,
}

impl PlaceholderMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn next_ordinal(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|(k, _)| parse_placeholder(k).map(|(_, n)| n + 1))
            .max()
            .unwrap_or(0)
    }

    /// Takes over `other`'s entries, renumbering them after ours, and
    /// returns `other_text` rewritten to the new tokens.
    pub fn absorb(&mut self, other_text: &str, other: &PlaceholderMap) -> String {
        if other.is_empty() {
            return other_text.to_string();
        }
        let offset = self.next_ordinal();
        let mut renamed = PlaceholderMap::default();
        for (k, v) in &other.entries {
            let new_key = match parse_placeholder(k) {
                Some((tag, n)) => placeholder_token(tag, n + offset),
                None => k.clone(),
            };
            renamed.entries.push((k.clone(), new_key.clone()));
            self.entries.push((new_key, v.clone()));
        }
        // The renaming map is itself a placeholder map: old token -> new token.
        restore(other_text, &renamed)
    }
}

pub struct Protected {
    pub text: String,
    pub map: PlaceholderMap,
    pub status: GuardStatus,
}

struct Candidate {
    start: usize,
    end: usize,
    rank: usize,
    category: Category,
}

fn worth_protecting(span: &str) -> bool {
    span.chars().count() >= 3 || span.chars().any(|c| c.is_ascii_digit())
}

fn next_char_boundary(text: &str, i: usize) -> usize {
    let mut j = i + 1;
    while j < text.len() && !text.is_char_boundary(j) {
        j += 1;
    }
    j
}

fn first_usable_match(m: &Matcher, text: &str, from: usize) -> Option<(usize, usize)> {
    let mut at = from;
    while at <= text.len() {
        let found = m.re.find_at(text, at)?;
        if found.end() > found.start() && worth_protecting(found.as_str()) {
            return Some((found.start(), found.end()));
        }
        at = next_char_boundary(text, found.start());
    }
    None
}

/// Replaces every protected span with a `<TAG_n>` token.
///
/// Matching runs over the raw text left to right: at each position the
/// earliest match of any enabled category wins, longer beats shorter, and
/// category order breaks remaining ties. Matches never overlap.
/// `skip` removes categories (literal placeholder shapes are always guarded).
pub fn protect(text: &str, skip: &[Category]) -> Protected {
    let matchers = match MATCHERS.as_ref() {
        Ok(m) => m,
        Err(e) => {
            log::warn!("token guard unavailable, passing text through: {e}");
            return Protected {
                text: text.to_string(),
                map: PlaceholderMap::default(),
                status: GuardStatus::PassedThrough,
            };
        }
    };
    if text.is_empty() {
        return Protected {
            text: String::new(),
            map: PlaceholderMap::default(),
            status: GuardStatus::Unchanged,
        };
    }

    let active: Vec<(usize, &Matcher)> = matchers
        .iter()
        .enumerate()
        .filter(|(_, m)| m.category == Category::Raw || !skip.contains(&m.category))
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut map = PlaceholderMap::default();
    let mut pos = 0usize;
    loop {
        let best = active
            .iter()
            .filter_map(|(rank, m)| {
                first_usable_match(m, text, pos).map(|(start, end)| Candidate {
                    start,
                    end,
                    rank: *rank,
                    category: m.category,
                })
            })
            .min_by(|a, b| {
                a.start
                    .cmp(&b.start)
                    .then((b.end - b.start).cmp(&(a.end - a.start)))
                    .then(a.rank.cmp(&b.rank))
            });
        let Some(c) = best else {
            break;
        };
        out.push_str(&text[pos..c.start]);
        let token = placeholder_token(c.category.tag(), map.len());
        out.push_str(&token);
        map.entries.push((token, text[c.start..c.end].to_string()));
        pos = c.end;
    }
    out.push_str(&text[pos..]);

    let status = if map.is_empty() {
        GuardStatus::Unchanged
    } else {
        GuardStatus::Protected(map.len())
    };
    Protected {
        text: out,
        map,
        status,
    }
}

/// Substitutes tokens back in a single pass, longest key first, so a
/// restored value is never rescanned.
pub fn restore(text: &str, map: &PlaceholderMap) -> String {
    if text.is_empty() || map.is_empty() {
        return text.to_string();
    }
    let mut keys: Vec<&str> = map.entries.iter().map(|(k, _)| k.as_str()).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()));
    let pat = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&pat) {
        Ok(re) => re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let tok = &caps[0];
                map.get(tok).unwrap_or(tok).to_string()
            })
            .into_owned(),
        Err(e) => {
            log::warn!("placeholder restore fell back to sequential replace: {e}");
            let mut s = text.to_string();
            for k in keys {
                if let Some(v) = map.get(k) {
                    s = s.replace(k, v);
                }
            }
            s
        }
    }
}
