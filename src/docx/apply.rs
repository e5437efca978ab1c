use std::collections::HashSet;
use std::fmt;

use anyhow::{anyhow, ensure};

use crate::docx::document::{WordDocument, W_NS};
use crate::docx::extract::ClearedNode;
use crate::docx::format::{
    apply_cell, apply_paragraph, apply_run, ensure_ppr, ensure_rpr, RunFormat, Vocab, PPR_ORDER,
    RPR_ORDER,
};
use crate::docx::project::{distribute, rebalance_whitespace};
use crate::docx::xml::{NodeId, XmlTree};
use crate::ir::TranslationUnit;
use crate::textutil::{is_arabic_text, is_hindi, is_rtl_language};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReinsertStep {
    Text,
    RunFormat,
    ParagraphFormat,
    CellFormat,
    Typography,
    Direction,
}

impl fmt::Display for ReinsertStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReinsertStep::Text => "text",
            ReinsertStep::RunFormat => "run format",
            ReinsertStep::ParagraphFormat => "paragraph format",
            ReinsertStep::CellFormat => "cell format",
            ReinsertStep::Typography => "typography",
            ReinsertStep::Direction => "direction",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct StepFailure {
    pub unit: String,
    pub step: ReinsertStep,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct ReinsertReport {
    /// Units whose text step succeeded.
    pub applied: usize,
    pub failures: Vec<StepFailure>,
}

/// Script-specific run settings for Devanagari output.
#[derive(Clone, Debug)]
pub struct Typography {
    pub devanagari_font: String,
    pub min_font_pt: u32,
}

impl Default for Typography {
    fn default() -> Self {
        Self {
            devanagari_font: "Noto Sans Devanagari".to_string(),
            min_font_pt: 11,
        }
    }
}

const HINDI_LANG_TAG: &str = "hi-IN";
const RTL_MIN_LINE_TWIPS: &str = "360";

/// Writes translations back into the document. Paragraph and cell
/// properties are applied once per container; every step of every unit is
/// isolated, so a failure is recorded and the remaining steps still run.
pub struct Reinserter {
    target_lang: String,
    typography: Typography,
    seen_paragraphs: HashSet<(usize, NodeId)>,
    seen_cells: HashSet<(usize, NodeId)>,
    rtl_paragraphs: HashSet<(usize, NodeId)>,
    report: ReinsertReport,
}

fn vocab_for(tree: &XmlTree) -> Vocab {
    Vocab::new(tree.prefix_for_namespace(W_NS).unwrap_or_else(|| "w".to_string()))
}

fn check_element(tree: &XmlTree, id: NodeId, local: &str) -> anyhow::Result<()> {
    ensure!(tree.contains(id), "node {id} is not in {}", tree.name);
    ensure!(
        tree.is_element(id) && tree.local_name(id) == local,
        "node {id} in {} is <{}>, expected {local}",
        tree.name,
        tree.name(id)
    );
    Ok(())
}

impl Reinserter {
    pub fn new(target_lang: &str, typography: Typography) -> Self {
        Self {
            target_lang: target_lang.to_string(),
            typography,
            seen_paragraphs: HashSet::new(),
            seen_cells: HashSet::new(),
            rtl_paragraphs: HashSet::new(),
            report: ReinsertReport::default(),
        }
    }

    pub fn report(&self) -> &ReinsertReport {
        &self.report
    }

    pub fn into_report(self) -> ReinsertReport {
        self.report
    }

    fn record(&mut self, unit: &str, step: ReinsertStep, res: anyhow::Result<()>) -> bool {
        match res {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{unit}: {step} step failed: {e:#}");
                self.report.failures.push(StepFailure {
                    unit: unit.to_string(),
                    step,
                    message: format!("{e:#}"),
                });
                false
            }
        }
    }

    /// Applies one unit. Returns whether its text was written.
    pub fn apply(
        &mut self,
        doc: &mut WordDocument,
        unit: &TranslationUnit,
        translated: &str,
        heading: bool,
    ) -> bool {
        let Some(part) = doc.parts.get_mut(unit.part) else {
            let err = anyhow!("unit refers to missing part #{}", unit.part);
            self.record(&unit.id, ReinsertStep::Text, Err(err));
            return false;
        };
        let tree = &mut part.tree;
        let v = vocab_for(tree);
        let key = unit.paragraph_key();

        let filled = write_text(tree, unit, translated);
        let text_ok = match filled {
            Ok(filled) => {
                let res = apply_run_formats(tree, &v, unit, &filled);
                self.record(&unit.id, ReinsertStep::RunFormat, res);
                true
            }
            Err(e) => {
                self.record(&unit.id, ReinsertStep::Text, Err(e));
                false
            }
        };

        if self.seen_paragraphs.insert(key) {
            let res = check_element(tree, unit.paragraph, "p")
                .map(|_| apply_paragraph(tree, &v, unit.paragraph, &unit.snapshot.paragraph));
            self.record(&unit.id, ReinsertStep::ParagraphFormat, res);
        }
        if let (Some(cell), Some(fmt)) = (unit.cell, unit.snapshot.cell.as_ref()) {
            if self.seen_cells.insert((unit.part, cell)) {
                let res = check_element(tree, cell, "tc").map(|_| apply_cell(tree, &v, cell, fmt));
                self.record(&unit.id, ReinsertStep::CellFormat, res);
            }
        }

        if is_hindi(&self.target_lang) {
            let res = apply_hindi_typography(tree, &v, unit, heading, &self.typography);
            self.record(&unit.id, ReinsertStep::Typography, res);
        }

        let rtl = is_rtl_language(unit.lang.as_deref()) || is_arabic_text(translated);
        // Once any unit marks the paragraph RTL, later LTR segments keep it.
        let set_ltr = !rtl && !self.rtl_paragraphs.contains(&key);
        if rtl {
            self.rtl_paragraphs.insert(key);
        }
        if rtl || set_ltr {
            let res = check_element(tree, unit.paragraph, "p")
                .map(|_| set_paragraph_direction(tree, &v, unit.paragraph, rtl));
            self.record(&unit.id, ReinsertStep::Direction, res);
        }

        if text_ok {
            self.report.applied += 1;
        }
        text_ok
    }

    /// Empties text nodes cut off by the global character budget.
    pub fn clear(&mut self, doc: &mut WordDocument, nodes: &[ClearedNode]) {
        for n in nodes {
            let res = match doc.parts.get_mut(n.part) {
                Some(part) => check_element(&part.tree, n.node, "t").map(|_| part.tree.set_text(n.node, "")),
                None => Err(anyhow!("missing part #{}", n.part)),
            };
            self.record("budget", ReinsertStep::Text, res);
        }
    }
}

/// Redistributes `translated` over the unit's text nodes. Returns, per node,
/// whether it received any text.
fn write_text(tree: &mut XmlTree, unit: &TranslationUnit, translated: &str) -> anyhow::Result<Vec<bool>> {
    for n in &unit.nodes {
        check_element(tree, n.node, "t")?;
    }
    if unit.nodes.is_empty() {
        ensure!(
            translated.trim().is_empty(),
            "translation for {} has no text node to land in",
            unit.id
        );
        return Ok(vec![]);
    }
    let lens: Vec<usize> = unit.nodes.iter().map(|n| n.original_len).collect();
    let mut spans = distribute(translated, &lens);
    rebalance_whitespace(&mut spans, &unit.nodes);
    let mut filled = Vec::with_capacity(spans.len());
    for (n, span) in unit.nodes.iter().zip(spans.iter()) {
        tree.set_text(n.node, span);
        if !span.is_empty() {
            tree.set_attr(n.node, "xml:space", "preserve");
        }
        filled.push(!span.is_empty());
    }
    Ok(filled)
}

fn apply_run_formats(
    tree: &mut XmlTree,
    v: &Vocab,
    unit: &TranslationUnit,
    filled: &[bool],
) -> anyhow::Result<()> {
    let Some(first) = unit.snapshot.runs.first().map(|(_, f)| f.clone()) else {
        return Ok(());
    };
    for &run in &unit.runs {
        check_element(tree, run, "r")?;
        let got_text = unit
            .nodes
            .iter()
            .zip(filled.iter())
            .any(|(n, f)| n.run == run && *f);
        let own = unit.snapshot.run_format(run).filter(|f| !f.is_empty());
        let fmt: &RunFormat = match own {
            Some(f) if got_text => f,
            _ => &first,
        };
        apply_run(tree, v, run, fmt);
    }
    Ok(())
}

fn set_lang(tree: &mut XmlTree, v: &Vocab, rpr: NodeId, tag: &str) {
    let lang = tree.ensure_child_ordered(rpr, &v.el("lang"), RPR_ORDER);
    tree.set_attr(lang, &v.at("val"), tag);
    tree.set_attr(lang, &v.at("bidi"), tag);
}

/// Point size for a run whose original size is `half_points`.
pub fn devanagari_half_points(half_points: Option<&str>, min_pt: u32) -> u32 {
    let target_pt = match half_points.and_then(|s| s.trim().parse::<u32>().ok()) {
        Some(hp) => (hp / 2).max(min_pt),
        None => min_pt,
    };
    target_pt * 2
}

fn apply_hindi_typography(
    tree: &mut XmlTree,
    v: &Vocab,
    unit: &TranslationUnit,
    heading: bool,
    typo: &Typography,
) -> anyhow::Result<()> {
    for &run in &unit.runs {
        check_element(tree, run, "r")?;
        let rpr = ensure_rpr(tree, v, run);
        set_lang(tree, v, rpr, HINDI_LANG_TAG);
        if heading {
            continue;
        }
        let fonts = tree.ensure_child_ordered(rpr, &v.el("rFonts"), RPR_ORDER);
        for key in ["ascii", "hAnsi", "cs", "eastAsia"] {
            tree.set_attr(fonts, &v.at(key), &typo.devanagari_font);
        }
        let original = unit
            .snapshot
            .run_format(run)
            .and_then(|f| f.size.clone());
        let hp = devanagari_half_points(original.as_deref(), typo.min_font_pt).to_string();
        for local in ["sz", "szCs"] {
            let node = tree.ensure_child_ordered(rpr, &v.el(local), RPR_ORDER);
            tree.set_attr(node, &v.at("val"), &hp);
        }
    }
    Ok(())
}

pub fn set_paragraph_direction(tree: &mut XmlTree, v: &Vocab, p: NodeId, rtl: bool) {
    let ppr = match tree.find_child(p, &v.el("pPr")) {
        Some(ppr) => ppr,
        None if rtl => ensure_ppr(tree, v, p),
        None => return,
    };
    if let Some(td) = tree.find_child(ppr, &v.el("textDirection")) {
        // `rtl` is not a valid textDirection value.
        if tree.attr_local(td, "val") == Some("rtl") {
            tree.remove_child(ppr, td);
        }
    }
    if rtl {
        let bidi = tree.ensure_child_ordered(ppr, &v.el("bidi"), PPR_ORDER);
        tree.set_attr(bidi, &v.at("val"), "1");
        let spacing = tree.ensure_child_ordered(ppr, &v.el("spacing"), PPR_ORDER);
        if tree.attr_local(spacing, "line").is_none() {
            tree.set_attr(spacing, &v.at("line"), RTL_MIN_LINE_TWIPS);
            tree.set_attr(spacing, &v.at("lineRule"), "auto");
        }
    } else if let Some(bidi) = tree.find_child(ppr, &v.el("bidi")) {
        tree.remove_child(ppr, bidi);
    }
}
