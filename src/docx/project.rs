use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::TextNodeRef;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+|\S+").expect("token regex"));

fn tokenize(text: &str) -> Vec<&str> {
    TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

fn is_space_token(tok: &str) -> bool {
    tok.starts_with(char::is_whitespace)
}

/// Proportional char targets for `total` chars over `weights`, rounded, with
/// the rounding drift absorbed by the last nodes.
fn allocate_counts(total: usize, weights: &[usize]) -> Vec<usize> {
    let total_w: usize = weights.iter().sum();
    if weights.is_empty() || total_w == 0 {
        return vec![0; weights.len()];
    }
    let mut out: Vec<usize> = weights
        .iter()
        .map(|w| ((total as f64) * (*w as f64) / (total_w as f64)).round() as usize)
        .collect();
    let mut sum: usize = out.iter().sum();
    let mut i = out.len();
    while sum > total {
        i = if i == 0 { out.len() - 1 } else { i - 1 };
        if out[i] > 0 {
            out[i] -= 1;
            sum -= 1;
        }
    }
    if sum < total {
        if let Some(last) = out.last_mut() {
            *last += total - sum;
        }
    }
    out
}

/// Splits `translated` into one span per original node. Spans are made of
/// whole whitespace/word tokens, and each node's share follows its original
/// length. Concatenating the result always gives back `translated`.
pub fn distribute(translated: &str, original_lens: &[usize]) -> Vec<String> {
    let n = original_lens.len();
    if n == 0 {
        return vec![];
    }
    if n == 1 {
        return vec![translated.to_string()];
    }
    let tokens = tokenize(translated);
    if original_lens.iter().all(|&l| l == 0) {
        return split_by_words(&tokens, n);
    }

    let total_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
    let targets = allocate_counts(total_chars, original_lens);
    // Doubled cumulative bounds so token midpoints stay integral.
    let mut bounds2: Vec<usize> = Vec::with_capacity(n);
    let mut acc = 0usize;
    for t in &targets {
        acc += t;
        bounds2.push(acc * 2);
    }

    let mut spans: Vec<String> = vec![String::new(); n];
    let mut node = 0usize;
    let mut pos = 0usize;
    for tok in tokens {
        let len = tok.chars().count();
        let mid2 = pos * 2 + len;
        while node + 1 < n && mid2 >= bounds2[node] {
            node += 1;
        }
        spans[node].push_str(tok);
        pos += len;
    }
    spans
}

/// Even split by word count; whitespace travels with the preceding word.
fn split_by_words(tokens: &[&str], n: usize) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for tok in tokens {
        match words.last_mut() {
            Some(last) if is_space_token(tok) => last.push_str(tok),
            _ => words.push(tok.to_string()),
        }
    }
    let mut spans: Vec<String> = vec![String::new(); n];
    if words.is_empty() {
        return spans;
    }
    let base = words.len() / n;
    let extra = words.len() % n;
    let mut it = words.into_iter();
    for (i, span) in spans.iter_mut().enumerate() {
        let take = base + usize::from(i < extra);
        for w in it.by_ref().take(take) {
            span.push_str(&w);
        }
    }
    spans
}

fn split_trailing_ws(s: &str) -> (&str, &str) {
    let cut = s.trim_end().len();
    s.split_at(cut)
}

fn split_leading_ws(s: &str) -> (&str, &str) {
    let cut = s.len() - s.trim_start().len();
    s.split_at(cut)
}

/// Moves whitespace across span boundaries so it lands on the side where
/// the source nodes carried it. Concatenation is unchanged.
pub fn rebalance_whitespace(spans: &mut [String], nodes: &[TextNodeRef]) {
    if spans.len() != nodes.len() {
        return;
    }
    for i in 0..spans.len().saturating_sub(1) {
        let (left, right) = (&nodes[i], &nodes[i + 1]);
        if !left.trailing_space && right.leading_space {
            let (body, ws) = split_trailing_ws(&spans[i]);
            if !ws.is_empty() && !body.is_empty() {
                let moved = ws.to_string();
                let body = body.to_string();
                spans[i] = body;
                spans[i + 1].insert_str(0, &moved);
            }
        } else if left.trailing_space && !right.leading_space {
            let (ws, body) = split_leading_ws(&spans[i + 1]);
            if !ws.is_empty() && !body.is_empty() {
                let moved = ws.to_string();
                let body = body.to_string();
                spans[i + 1] = body;
                spans[i].push_str(&moved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(leading: bool, trailing: bool, len: usize) -> TextNodeRef {
        TextNodeRef {
            node: 0,
            run: 0,
            leading_space: leading,
            trailing_space: trailing,
            original_len: len,
        }
    }

    #[test]
    fn two_equal_nodes_split_devanagari_pair() {
        let spans = distribute("एक दो", &[4, 4]);
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| !s.is_empty()));
        assert_eq!(spans.concat(), "एक दो");
    }

    #[test]
    fn shares_follow_original_lengths() {
        let spans = distribute("one two three four five six", &[20, 4]);
        assert_eq!(spans.concat(), "one two three four five six");
        assert!(spans[0].chars().count() > spans[1].chars().count());
        assert!(!spans[1].is_empty());
        // never mid-word
        for s in &spans {
            for w in s.split_whitespace() {
                assert!(["one", "two", "three", "four", "five", "six"].contains(&w));
            }
        }
    }

    #[test]
    fn conservation_and_span_count() {
        let cases: [(&str, &[usize]); 5] = [
            ("", &[3, 3, 3]),
            ("single", &[1, 1, 1, 1]),
            ("  leading and trailing  ", &[5, 0, 9]),
            ("नमस्ते दुनिया, यह परीक्षण है", &[7, 1, 1, 12]),
            ("a b c d e f g h", &[1, 100]),
        ];
        for (text, lens) in cases {
            let spans = distribute(text, lens);
            assert_eq!(spans.len(), lens.len(), "{text}");
            assert_eq!(spans.concat(), text, "{text}");
        }
    }

    #[test]
    fn zero_length_nodes_split_by_words_keeping_whitespace() {
        let spans = distribute("alpha beta  gamma", &[0, 0]);
        assert_eq!(spans, vec!["alpha beta  ".to_string(), "gamma".to_string()]);
    }

    #[test]
    fn drift_lands_on_last_nodes() {
        let c = allocate_counts(5, &[1, 1, 1]);
        assert_eq!(c.iter().sum::<usize>(), 5);
        let c = allocate_counts(7, &[1, 1]);
        assert_eq!(c, vec![4, 3]);
    }

    #[test]
    fn whitespace_moves_to_the_side_the_source_used() {
        let nodes = vec![node(false, false, 3), node(true, false, 4)];
        let mut spans = vec!["abc ".to_string(), "def".to_string()];
        rebalance_whitespace(&mut spans, &nodes);
        assert_eq!(spans, vec!["abc".to_string(), " def".to_string()]);

        let nodes = vec![node(false, true, 3), node(false, false, 4)];
        let mut spans = vec!["abc".to_string(), " def".to_string()];
        rebalance_whitespace(&mut spans, &nodes);
        assert_eq!(spans, vec!["abc ".to_string(), "def".to_string()]);
    }
}
