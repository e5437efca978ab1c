use crate::ir::{FormattingSnapshot, TextNodeRef, TranslationUnit};
use crate::textutil::char_len;

use super::document::{WordDocument, W_NS};
use super::format::{capture_cell, capture_paragraph, capture_run};
use super::xml::{qualify, NodeId, XmlTree};

/// How a part was walked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartScan {
    pub part: String,
    pub paragraphs: usize,
    pub units: usize,
    /// The namespace-qualified query found nothing and local names were used.
    pub used_fallback: bool,
}

/// Element matching for one part: exact qualified names when the main
/// namespace is bound, any prefix otherwise.
enum Names {
    Qualified(String),
    Local,
}

impl Names {
    fn is(&self, tree: &XmlTree, node: NodeId, local: &str) -> bool {
        if !tree.is_element(node) {
            return false;
        }
        match self {
            Names::Qualified(prefix) => tree.name(node) == qualify(prefix, local),
            Names::Local => tree.local_name(node) == local,
        }
    }

    fn ancestor(&self, tree: &XmlTree, node: NodeId, local: &str) -> Option<NodeId> {
        let mut cur = tree.parent(node);
        while let Some(n) = cur {
            if self.is(tree, n, local) {
                return Some(n);
            }
            cur = tree.parent(n);
        }
        None
    }

    fn child(&self, tree: &XmlTree, node: NodeId, local: &str) -> Option<NodeId> {
        tree.element_children(node).find(|&c| self.is(tree, c, local))
    }
}

fn paragraphs_of(tree: &XmlTree, names: &Names) -> Vec<NodeId> {
    let Some(root) = tree.root() else {
        return vec![];
    };
    tree.descendants(root)
        .into_iter()
        .filter(|&n| names.is(tree, n, "p"))
        .collect()
}

/// Runs attributed to `p`: nested paragraphs (textboxes) own their runs.
fn runs_of(tree: &XmlTree, names: &Names, p: NodeId) -> Vec<NodeId> {
    tree.descendants(p)
        .into_iter()
        .filter(|&n| names.is(tree, n, "r") && names.ancestor(tree, n, "p") == Some(p))
        .collect()
}

fn hyperlink_of(tree: &XmlTree, names: &Names, run: NodeId, p: NodeId) -> Option<NodeId> {
    let mut cur = tree.parent(run);
    while let Some(n) = cur {
        if n == p {
            return None;
        }
        if names.is(tree, n, "hyperlink") {
            return Some(n);
        }
        cur = tree.parent(n);
    }
    None
}

fn paragraph_style(tree: &XmlTree, names: &Names, p: NodeId) -> Option<String> {
    let ppr = names.child(tree, p, "pPr")?;
    let ps = names.child(tree, ppr, "pStyle")?;
    tree.attr_local(ps, "val")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn ends_section(tree: &XmlTree, names: &Names, p: NodeId, runs: &[NodeId]) -> bool {
    let sect = names
        .child(tree, p, "pPr")
        .is_some_and(|ppr| names.child(tree, ppr, "sectPr").is_some());
    sect || runs.iter().any(|&r| {
        tree.element_children(r)
            .any(|c| names.is(tree, c, "br") && tree.attr_local(c, "type") == Some("page"))
    })
}

#[derive(Default)]
struct Segment {
    nodes: Vec<TextNodeRef>,
    runs: Vec<NodeId>,
    hyperlink: Option<NodeId>,
}

impl Segment {
    fn touches(&mut self, run: NodeId) {
        if self.runs.last() != Some(&run) {
            self.runs.push(run);
        }
    }
}

/// Splits a paragraph's runs into segments at hyperlink changes and at
/// explicit breaks or tabs.
fn segment_paragraph(tree: &XmlTree, names: &Names, p: NodeId, runs: &[NodeId]) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    let mut cur = Segment::default();
    for &run in runs {
        let link = hyperlink_of(tree, names, run, p);
        if link != cur.hyperlink {
            if !cur.nodes.is_empty() {
                out.push(std::mem::take(&mut cur));
            } else {
                cur.runs.clear();
            }
            cur.hyperlink = link;
        }
        for child in tree.element_children(run) {
            if names.is(tree, child, "t") {
                let text = tree.text_of(child);
                cur.touches(run);
                cur.nodes.push(TextNodeRef {
                    node: child,
                    run,
                    leading_space: text.starts_with(char::is_whitespace),
                    trailing_space: text.ends_with(char::is_whitespace),
                    original_len: char_len(&text),
                });
            } else if ["br", "cr", "tab", "ptab"]
                .iter()
                .any(|l| names.is(tree, child, l))
            {
                if !cur.nodes.is_empty() {
                    let hyperlink = cur.hyperlink;
                    out.push(std::mem::take(&mut cur));
                    cur.hyperlink = hyperlink;
                }
            }
        }
    }
    if !cur.nodes.is_empty() {
        out.push(cur);
    }
    out
}

/// Walks every part of the document and emits translation units in
/// document order, body first then headers and footers.
pub fn collect_units(doc: &WordDocument) -> (Vec<TranslationUnit>, Vec<PartScan>) {
    let mut units: Vec<TranslationUnit> = Vec::new();
    let mut scans: Vec<PartScan> = Vec::new();
    let mut next_id = 0usize;

    for (part_idx, part) in doc.parts.iter().enumerate() {
        let tree = &part.tree;
        let mut used_fallback = false;
        let mut names = match tree.prefix_for_namespace(W_NS) {
            Some(prefix) => Names::Qualified(prefix),
            None => Names::Local,
        };
        let mut paragraphs = paragraphs_of(tree, &names);
        if paragraphs.is_empty() || matches!(names, Names::Local) {
            let local = paragraphs_of(tree, &Names::Local);
            if !local.is_empty() {
                if matches!(names, Names::Qualified(_)) {
                    log::warn!(
                        "{}: qualified paragraph query found nothing, using local names",
                        part.name
                    );
                }
                used_fallback = true;
                names = Names::Local;
                paragraphs = local;
            }
        }

        let before = units.len();
        for &p in &paragraphs {
            let runs = runs_of(tree, &names, p);
            let style = paragraph_style(tree, &names, p);
            let cell = names.ancestor(tree, p, "tc");
            let textbox = names.ancestor(tree, p, "txbxContent");
            let para_fmt = capture_paragraph(tree, p);
            let cell_fmt = cell.map(|c| capture_cell(tree, c));
            let section_end = ends_section(tree, &names, p, &runs);
            let lang = runs.first().and_then(|&r| capture_run(tree, r).lang);

            let mut segments = segment_paragraph(tree, &names, p, &runs);
            if segments.is_empty() {
                segments.push(Segment {
                    nodes: vec![],
                    runs: runs.clone(),
                    hyperlink: None,
                });
            }
            for seg in segments {
                let text: String = seg
                    .nodes
                    .iter()
                    .map(|n| tree.text_of(n.node))
                    .collect();
                let snapshot = FormattingSnapshot {
                    runs: seg.runs.iter().map(|&r| (r, capture_run(tree, r))).collect(),
                    paragraph: para_fmt.clone(),
                    cell: cell_fmt.clone(),
                };
                units.push(TranslationUnit {
                    id: format!("P{next_id}"),
                    part: part_idx,
                    paragraph: p,
                    cell,
                    textbox,
                    text,
                    style: style.clone(),
                    nodes: seg.nodes,
                    runs: seg.runs,
                    lang: lang.clone(),
                    ends_section: section_end,
                    snapshot,
                });
                next_id += 1;
            }
        }
        log::info!(
            "{}: {} paragraphs, {} units",
            part.name,
            paragraphs.len(),
            units.len() - before
        );
        scans.push(PartScan {
            part: part.name.clone(),
            paragraphs: paragraphs.len(),
            units: units.len() - before,
            used_fallback,
        });
    }
    (units, scans)
}

/// Text nodes whose content must be removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearedNode {
    pub part: usize,
    pub node: NodeId,
}

pub struct Budgeted {
    pub units: Vec<TranslationUnit>,
    pub cleared: Vec<ClearedNode>,
    pub truncated: bool,
}

/// Keeps units in order until `max_total` chars are consumed. The unit
/// crossing the limit is cut; nodes past the cut are cleared.
pub fn apply_char_budget(units: Vec<TranslationUnit>, max_total: Option<usize>) -> Budgeted {
    let Some(max_total) = max_total else {
        return Budgeted {
            units,
            cleared: vec![],
            truncated: false,
        };
    };
    let mut kept: Vec<TranslationUnit> = Vec::new();
    let mut cleared: Vec<ClearedNode> = Vec::new();
    let mut used = 0usize;
    let mut truncated = false;
    for mut unit in units {
        let len = char_len(&unit.text);
        if used + len <= max_total {
            used += len;
            kept.push(unit);
            continue;
        }
        truncated = true;
        let room = max_total - used;
        used = max_total;
        let mut nodes: Vec<TextNodeRef> = Vec::new();
        let mut left = room;
        for mut n in std::mem::take(&mut unit.nodes) {
            if left == 0 {
                cleared.push(ClearedNode {
                    part: unit.part,
                    node: n.node,
                });
                continue;
            }
            let take = n.original_len.min(left);
            left -= take;
            n.original_len = take;
            nodes.push(n);
        }
        if nodes.is_empty() {
            continue;
        }
        unit.text = unit.text.chars().take(room).collect();
        unit.nodes = nodes;
        kept.push(unit);
    }
    Budgeted {
        units: kept,
        cleared,
        truncated,
    }
}
