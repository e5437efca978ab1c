use crate::guard::{protect, Category, GuardStatus, PlaceholderMap};
use crate::ir::{Chunk, ProtectedUnit, TranslationUnit};
use crate::pipeline::heading::HeadingClassifier;
use crate::sentinels::segment_token;

/// Merges walker units of the same paragraph into one protected unit.
///
/// Each member is protected on its own (headings keep numbers unfrozen so
/// they can be localized); later members' placeholders are renumbered into
/// the first member's map and the pieces are joined with segment markers.
pub fn prepare_units(units: &[TranslationUnit], headings: &HeadingClassifier<'_>) -> Vec<ProtectedUnit> {
    let mut out: Vec<ProtectedUnit> = Vec::new();
    let mut i = 0usize;
    while i < units.len() {
        let key = units[i].paragraph_key();
        let mut j = i + 1;
        while j < units.len() && units[j].paragraph_key() == key {
            j += 1;
        }
        out.push(merge_paragraph(&units[i..j], headings));
        i = j;
    }
    out
}

fn merge_paragraph(members: &[TranslationUnit], headings: &HeadingClassifier<'_>) -> ProtectedUnit {
    let first = &members[0];
    let source_text: String = members.iter().map(|u| u.text.as_str()).collect();
    let heading = headings.is_heading(first.style.as_deref(), &source_text);
    let skip: &[Category] = if heading { &[Category::NumUnit] } else { &[] };

    let mut text = String::new();
    let mut placeholders = PlaceholderMap::default();
    for (k, member) in members.iter().enumerate() {
        let p = protect(&member.text, skip);
        if p.status == GuardStatus::PassedThrough {
            log::debug!("{}: text left unprotected", member.id);
        }
        if k > 0 {
            text.push_str(&segment_token(k));
        }
        let piece = placeholders.absorb(&p.text, &p.map);
        text.push_str(&piece);
    }

    ProtectedUnit {
        id: first.id.clone(),
        members: members.iter().map(|u| u.id.clone()).collect(),
        style: first.style.clone(),
        source_text,
        text,
        placeholders,
        heading,
        ends_section: members.iter().any(|u| u.ends_section),
    }
}

fn flush(chunks: &mut Vec<Chunk>, cur: &mut Vec<ProtectedUnit>, cur_len: &mut usize) {
    if !cur.is_empty() {
        chunks.push(Chunk {
            units: std::mem::take(cur),
        });
    }
    *cur_len = 0;
}

/// Groups units into requests of at most `max_chars` characters.
///
/// Headings are always singleton chunks. When the next unit overflows the
/// running chunk, the chunk is cut after the nearest earlier unit that ends
/// a page or section, or at the overflow point when there is none. A unit
/// longer than `max_chars` on its own gets its own chunk. Small chunks are
/// then folded into an adjacent non-heading chunk while the sum still fits.
pub fn build_chunks(units: Vec<ProtectedUnit>, max_chars: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut cur: Vec<ProtectedUnit> = Vec::new();
    let mut cur_len = 0usize;

    for unit in units {
        let len = unit.char_len();
        if unit.heading || len > max_chars {
            flush(&mut chunks, &mut cur, &mut cur_len);
            chunks.push(Chunk { units: vec![unit] });
            continue;
        }
        if cur_len + len > max_chars && !cur.is_empty() {
            let cut = (1..cur.len()).rev().find(|&i| cur[i - 1].ends_section);
            match cut {
                Some(cut) => {
                    let rest = cur.split_off(cut);
                    chunks.push(Chunk {
                        units: std::mem::replace(&mut cur, rest),
                    });
                    cur_len = cur.iter().map(ProtectedUnit::char_len).sum();
                    if cur_len + len > max_chars {
                        flush(&mut chunks, &mut cur, &mut cur_len);
                    }
                }
                None => flush(&mut chunks, &mut cur, &mut cur_len),
            }
        }
        cur.push(unit);
        cur_len += len;
    }
    flush(&mut chunks, &mut cur, &mut cur_len);

    let merged = merge_small_chunks(chunks, max_chars);
    log::info!("chunks built: {}", merged.len());
    merged
}

fn merge_small_chunks(chunks: Vec<Chunk>, max_chars: usize) -> Vec<Chunk> {
    let small = max_chars / 2;
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let len = chunk.char_len();
        if let Some(last) = out.last_mut() {
            let last_len = last.char_len();
            let mergeable = !chunk.is_heading()
                && !last.is_heading()
                && (len < small || last_len < small)
                && last_len + len <= max_chars;
            if mergeable {
                last.units.extend(chunk.units);
                continue;
            }
        }
        out.push(chunk);
    }
    out
}
