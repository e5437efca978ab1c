//! Formatting snapshots: the run, paragraph and cell properties captured
//! before text is rewritten, and their reapplication afterwards.

use super::xml::{qualify, NodeId, XmlTree};

pub const RPR_ORDER: &[&str] = &[
    "rStyle", "rFonts", "b", "bCs", "i", "iCs", "caps", "smallCaps", "strike", "dstrike",
    "outline", "shadow", "emboss", "imprint", "noProof", "snapToGrid", "vanish", "webHidden",
    "color", "spacing", "w", "kern", "position", "sz", "szCs", "highlight", "u", "effect", "bdr",
    "shd", "fitText", "vertAlign", "rtl", "cs", "em", "lang", "eastAsianLayout", "specVanish",
    "oMath",
];

pub const PPR_ORDER: &[&str] = &[
    "pStyle", "keepNext", "keepLines", "pageBreakBefore", "framePr", "widowControl", "numPr",
    "suppressLineNumbers", "pBdr", "shd", "tabs", "suppressAutoHyphens", "kinsoku", "wordWrap",
    "overflowPunct", "topLinePunct", "autoSpaceDE", "autoSpaceDN", "bidi", "adjustRightInd",
    "snapToGrid", "spacing", "ind", "contextualSpacing", "mirrorIndents", "suppressOverlap", "jc",
    "textDirection", "textAlignment", "textboxTightWrap", "outlineLvl", "divId", "cnfStyle", "rPr",
    "sectPr", "pPrChange",
];

const PBDR_ORDER: &[&str] = &["top", "left", "bottom", "right", "between", "bar"];

const TCPR_ORDER: &[&str] = &[
    "cnfStyle", "tcW", "gridSpan", "hMerge", "vMerge", "tcBorders", "shd", "noWrap", "tcMar",
    "textDirection", "tcFitText", "vAlign", "hideMark",
];

const TCBORDERS_ORDER: &[&str] = &[
    "top", "left", "start", "bottom", "right", "end", "insideH", "insideV", "tl2br", "tr2bl",
];

const TCMAR_ORDER: &[&str] = &["top", "left", "start", "bottom", "right", "end"];

const SIDES: [&str; 4] = ["top", "left", "bottom", "right"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunFormat {
    pub color: Option<String>,
    pub highlight: Option<String>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<String>,
    pub strike: Option<bool>,
    pub size: Option<String>,
    pub size_cs: Option<String>,
    pub font_ascii: Option<String>,
    pub font_hansi: Option<String>,
    pub font_cs: Option<String>,
    pub font_east_asia: Option<String>,
    pub vert_align: Option<String>,
    pub lang: Option<String>,
}

impl RunFormat {
    pub fn is_empty(&self) -> bool {
        *self == RunFormat::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BorderSpec {
    pub val: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub space: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParagraphFormat {
    pub alignment: Option<String>,
    pub indent_left: Option<String>,
    pub indent_right: Option<String>,
    pub indent_first_line: Option<String>,
    pub indent_hanging: Option<String>,
    pub spacing_before: Option<String>,
    pub spacing_after: Option<String>,
    pub spacing_line: Option<String>,
    pub spacing_line_rule: Option<String>,
    pub borders: Vec<(String, BorderSpec)>,
    pub shading_fill: Option<String>,
    pub bidi: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Measure {
    pub w: Option<String>,
    pub kind: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellFormat {
    pub v_align: Option<String>,
    pub width: Option<Measure>,
    pub borders: Vec<(String, BorderSpec)>,
    pub shading_fill: Option<String>,
    pub margins: Vec<(String, Measure)>,
}

/// Qualifies WordprocessingML names with the part's bound prefix.
#[derive(Clone, Debug)]
pub struct Vocab {
    prefix: String,
}

impl Vocab {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Element name.
    pub fn el(&self, local: &str) -> String {
        qualify(&self.prefix, local)
    }

    /// Attribute name. Unprefixed attributes are not in the namespace, so a
    /// default-namespace part still writes `w:`-less keys.
    pub fn at(&self, local: &str) -> String {
        qualify(&self.prefix, local)
    }
}

fn val_of(tree: &XmlTree, node: NodeId) -> Option<String> {
    tree.attr_value(node, "val")
}

fn child_val(tree: &XmlTree, parent: NodeId, local: &str) -> Option<String> {
    tree.find_child_local(parent, local).and_then(|c| val_of(tree, c))
}

fn toggle(tree: &XmlTree, parent: NodeId, local: &str) -> Option<bool> {
    let node = tree.find_child_local(parent, local)?;
    Some(!matches!(
        tree.attr_local(node, "val"),
        Some("0") | Some("false") | Some("off")
    ))
}

fn attr_of(tree: &XmlTree, node: NodeId, local: &str) -> Option<String> {
    tree.attr_value(node, local)
}

fn capture_border(tree: &XmlTree, node: NodeId) -> BorderSpec {
    BorderSpec {
        val: attr_of(tree, node, "val"),
        size: attr_of(tree, node, "sz"),
        color: attr_of(tree, node, "color"),
        space: attr_of(tree, node, "space"),
    }
}

fn capture_borders(tree: &XmlTree, container: Option<NodeId>) -> Vec<(String, BorderSpec)> {
    let Some(container) = container else {
        return vec![];
    };
    SIDES
        .iter()
        .filter_map(|side| {
            tree.find_child_local(container, side)
                .map(|b| (side.to_string(), capture_border(tree, b)))
        })
        .collect()
}

pub fn capture_run(tree: &XmlTree, run: NodeId) -> RunFormat {
    let Some(rpr) = tree.find_child_local(run, "rPr") else {
        return RunFormat::default();
    };
    let fonts = tree.find_child_local(rpr, "rFonts");
    let font = |local: &str| fonts.and_then(|f| attr_of(tree, f, local));
    RunFormat {
        color: child_val(tree, rpr, "color"),
        highlight: child_val(tree, rpr, "highlight"),
        bold: toggle(tree, rpr, "b"),
        italic: toggle(tree, rpr, "i"),
        underline: tree
            .find_child_local(rpr, "u")
            .map(|u| val_of(tree, u).unwrap_or_else(|| "single".to_string())),
        strike: toggle(tree, rpr, "strike"),
        size: child_val(tree, rpr, "sz"),
        size_cs: child_val(tree, rpr, "szCs"),
        font_ascii: font("ascii"),
        font_hansi: font("hAnsi"),
        font_cs: font("cs"),
        font_east_asia: font("eastAsia"),
        vert_align: child_val(tree, rpr, "vertAlign"),
        lang: child_val(tree, rpr, "lang"),
    }
}

pub fn capture_paragraph(tree: &XmlTree, p: NodeId) -> ParagraphFormat {
    let Some(ppr) = tree.find_child_local(p, "pPr") else {
        return ParagraphFormat::default();
    };
    let ind = tree.find_child_local(ppr, "ind");
    let spacing = tree.find_child_local(ppr, "spacing");
    let ind_attr = |a: &str, alt: &str| {
        ind.and_then(|n| attr_of(tree, n, a).or_else(|| attr_of(tree, n, alt)))
    };
    let sp_attr = |a: &str| spacing.and_then(|n| attr_of(tree, n, a));
    ParagraphFormat {
        alignment: child_val(tree, ppr, "jc"),
        indent_left: ind_attr("left", "start"),
        indent_right: ind_attr("right", "end"),
        indent_first_line: ind_attr("firstLine", "firstLine"),
        indent_hanging: ind_attr("hanging", "hanging"),
        spacing_before: sp_attr("before"),
        spacing_after: sp_attr("after"),
        spacing_line: sp_attr("line"),
        spacing_line_rule: sp_attr("lineRule"),
        borders: capture_borders(tree, tree.find_child_local(ppr, "pBdr")),
        shading_fill: tree
            .find_child_local(ppr, "shd")
            .and_then(|s| attr_of(tree, s, "fill")),
        bidi: toggle(tree, ppr, "bidi").unwrap_or(false),
    }
}

fn capture_measure(tree: &XmlTree, node: NodeId) -> Measure {
    Measure {
        w: attr_of(tree, node, "w"),
        kind: attr_of(tree, node, "type"),
    }
}

pub fn capture_cell(tree: &XmlTree, tc: NodeId) -> CellFormat {
    let Some(tcpr) = tree.find_child_local(tc, "tcPr") else {
        return CellFormat::default();
    };
    let margins = tree
        .find_child_local(tcpr, "tcMar")
        .map(|mar| {
            SIDES
                .iter()
                .filter_map(|side| {
                    tree.find_child_local(mar, side)
                        .map(|m| (side.to_string(), capture_measure(tree, m)))
                })
                .collect()
        })
        .unwrap_or_default();
    CellFormat {
        v_align: child_val(tree, tcpr, "vAlign"),
        width: tree
            .find_child_local(tcpr, "tcW")
            .map(|w| capture_measure(tree, w)),
        borders: capture_borders(tree, tree.find_child_local(tcpr, "tcBorders")),
        shading_fill: tree
            .find_child_local(tcpr, "shd")
            .and_then(|s| attr_of(tree, s, "fill")),
        margins,
    }
}

/// The `rPr` of a run, created as its first child when missing.
pub fn ensure_rpr(tree: &mut XmlTree, v: &Vocab, run: NodeId) -> NodeId {
    if let Some(rpr) = tree.find_child(run, &v.el("rPr")) {
        return rpr;
    }
    tree.insert_element(run, 0, &v.el("rPr"))
}

pub fn ensure_ppr(tree: &mut XmlTree, v: &Vocab, p: NodeId) -> NodeId {
    if let Some(ppr) = tree.find_child(p, &v.el("pPr")) {
        return ppr;
    }
    tree.insert_element(p, 0, &v.el("pPr"))
}

fn ensure_tcpr(tree: &mut XmlTree, v: &Vocab, tc: NodeId) -> NodeId {
    if let Some(tcpr) = tree.find_child(tc, &v.el("tcPr")) {
        return tcpr;
    }
    tree.insert_element(tc, 0, &v.el("tcPr"))
}

pub fn set_child_val(
    tree: &mut XmlTree,
    v: &Vocab,
    parent: NodeId,
    local: &str,
    order: &[&str],
    value: &str,
) -> NodeId {
    let node = tree.ensure_child_ordered(parent, &v.el(local), order);
    tree.set_attr(node, &v.at("val"), value);
    node
}

fn set_toggle(tree: &mut XmlTree, v: &Vocab, rpr: NodeId, local: &str, on: bool) {
    let node = tree.ensure_child_ordered(rpr, &v.el(local), RPR_ORDER);
    if on {
        tree.remove_attr(node, &v.at("val"));
    } else {
        tree.set_attr(node, &v.at("val"), "0");
    }
}

pub fn apply_run(tree: &mut XmlTree, v: &Vocab, run: NodeId, f: &RunFormat) {
    if f.is_empty() {
        return;
    }
    let rpr = ensure_rpr(tree, v, run);
    let fonts = [
        ("ascii", &f.font_ascii),
        ("hAnsi", &f.font_hansi),
        ("cs", &f.font_cs),
        ("eastAsia", &f.font_east_asia),
    ];
    if fonts.iter().any(|(_, val)| val.is_some()) {
        let rf = tree.ensure_child_ordered(rpr, &v.el("rFonts"), RPR_ORDER);
        for (key, val) in fonts {
            if let Some(val) = val {
                tree.set_attr(rf, &v.at(key), val);
            }
        }
    }
    if let Some(b) = f.bold {
        set_toggle(tree, v, rpr, "b", b);
    }
    if let Some(i) = f.italic {
        set_toggle(tree, v, rpr, "i", i);
    }
    if let Some(s) = f.strike {
        set_toggle(tree, v, rpr, "strike", s);
    }
    let vals = [
        ("color", &f.color),
        ("sz", &f.size),
        ("szCs", &f.size_cs),
        ("highlight", &f.highlight),
        ("u", &f.underline),
        ("vertAlign", &f.vert_align),
        ("lang", &f.lang),
    ];
    for (local, val) in vals {
        if let Some(val) = val {
            set_child_val(tree, v, rpr, local, RPR_ORDER, val);
        }
    }
}

fn apply_border(tree: &mut XmlTree, v: &Vocab, node: NodeId, b: &BorderSpec) {
    let attrs = [
        ("val", &b.val),
        ("sz", &b.size),
        ("color", &b.color),
        ("space", &b.space),
    ];
    for (key, val) in attrs {
        if let Some(val) = val {
            tree.set_attr(node, &v.at(key), val);
        }
    }
    if tree.attr(node, &v.at("val")).is_none() {
        tree.set_attr(node, &v.at("val"), "single");
    }
}

fn apply_shading(tree: &mut XmlTree, v: &Vocab, parent: NodeId, order: &[&str], fill: &str) {
    let shd = tree.ensure_child_ordered(parent, &v.el("shd"), order);
    tree.set_attr(shd, &v.at("fill"), fill);
    if tree.attr(shd, &v.at("val")).is_none() {
        tree.set_attr(shd, &v.at("val"), "clear");
    }
}

pub fn apply_paragraph(tree: &mut XmlTree, v: &Vocab, p: NodeId, f: &ParagraphFormat) {
    if *f == ParagraphFormat::default() {
        return;
    }
    let ppr = ensure_ppr(tree, v, p);
    if let Some(jc) = f.alignment.as_deref() {
        set_child_val(tree, v, ppr, "jc", PPR_ORDER, jc);
    }
    let ind = [
        ("left", &f.indent_left),
        ("right", &f.indent_right),
        ("firstLine", &f.indent_first_line),
        ("hanging", &f.indent_hanging),
    ];
    if ind.iter().any(|(_, val)| val.is_some()) {
        let node = tree.ensure_child_ordered(ppr, &v.el("ind"), PPR_ORDER);
        for (key, val) in ind {
            if let Some(val) = val {
                tree.set_attr(node, &v.at(key), val);
            }
        }
    }
    let spacing = [
        ("before", &f.spacing_before),
        ("after", &f.spacing_after),
        ("line", &f.spacing_line),
        ("lineRule", &f.spacing_line_rule),
    ];
    if spacing.iter().any(|(_, val)| val.is_some()) {
        let node = tree.ensure_child_ordered(ppr, &v.el("spacing"), PPR_ORDER);
        for (key, val) in spacing {
            if let Some(val) = val {
                tree.set_attr(node, &v.at(key), val);
            }
        }
    }
    if !f.borders.is_empty() {
        let pbdr = tree.ensure_child_ordered(ppr, &v.el("pBdr"), PPR_ORDER);
        for (side, spec) in &f.borders {
            let node = tree.ensure_child_ordered(pbdr, &v.el(side), PBDR_ORDER);
            apply_border(tree, v, node, spec);
        }
    }
    if let Some(fill) = f.shading_fill.as_deref() {
        apply_shading(tree, v, ppr, PPR_ORDER, fill);
    }
}

fn apply_measure(tree: &mut XmlTree, v: &Vocab, node: NodeId, m: &Measure) {
    if let Some(w) = m.w.as_deref() {
        tree.set_attr(node, &v.at("w"), w);
    }
    if let Some(kind) = m.kind.as_deref() {
        tree.set_attr(node, &v.at("type"), kind);
    }
}

pub fn apply_cell(tree: &mut XmlTree, v: &Vocab, tc: NodeId, f: &CellFormat) {
    if *f == CellFormat::default() {
        return;
    }
    let tcpr = ensure_tcpr(tree, v, tc);
    if let Some(w) = f.width.as_ref() {
        let node = tree.ensure_child_ordered(tcpr, &v.el("tcW"), TCPR_ORDER);
        apply_measure(tree, v, node, w);
    }
    if !f.borders.is_empty() {
        let borders = tree.ensure_child_ordered(tcpr, &v.el("tcBorders"), TCPR_ORDER);
        for (side, spec) in &f.borders {
            let node = tree.ensure_child_ordered(borders, &v.el(side), TCBORDERS_ORDER);
            apply_border(tree, v, node, spec);
        }
    }
    if let Some(fill) = f.shading_fill.as_deref() {
        apply_shading(tree, v, tcpr, TCPR_ORDER, fill);
    }
    if !f.margins.is_empty() {
        let mar = tree.ensure_child_ordered(tcpr, &v.el("tcMar"), TCPR_ORDER);
        for (side, m) in &f.margins {
            let node = tree.ensure_child_ordered(mar, &v.el(side), TCMAR_ORDER);
            apply_measure(tree, v, node, m);
        }
    }
    if let Some(va) = f.v_align.as_deref() {
        set_child_val(tree, v, tcpr, "vAlign", TCPR_ORDER, va);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<w:tc xmlns:w="urn:w"><w:tcPr><w:tcW w:w="2400" w:type="dxa"/><w:shd w:val="clear" w:fill="EEEEEE"/><w:vAlign w:val="center"/></w:tcPr><w:p><w:pPr><w:pBdr><w:top w:val="single" w:sz="4" w:color="FF0000"/></w:pBdr><w:spacing w:before="120" w:after="60"/><w:ind w:left="720" w:hanging="360"/><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:rFonts w:ascii="Arial" w:hAnsi="Arial"/><w:b/><w:i w:val="0"/><w:color w:val="1F3864"/><w:sz w:val="28"/><w:u w:val="double"/><w:vertAlign w:val="superscript"/></w:rPr><w:t>x</w:t></w:r><w:r><w:t>y</w:t></w:r></w:p></w:tc>"#;

    fn fixture() -> (XmlTree, NodeId, NodeId, Vec<NodeId>) {
        let tree = XmlTree::parse("t.xml", XML.as_bytes()).expect("parse");
        let tc = tree.root().expect("root");
        let p = tree.descendants_local(tc, "p")[0];
        let runs = tree.descendants_local(p, "r");
        (tree, tc, p, runs)
    }

    #[test]
    fn captures_run_properties() {
        let (tree, _, _, runs) = fixture();
        let f = capture_run(&tree, runs[0]);
        assert_eq!(f.bold, Some(true));
        assert_eq!(f.italic, Some(false));
        assert_eq!(f.color.as_deref(), Some("1F3864"));
        assert_eq!(f.size.as_deref(), Some("28"));
        assert_eq!(f.underline.as_deref(), Some("double"));
        assert_eq!(f.font_ascii.as_deref(), Some("Arial"));
        assert_eq!(f.vert_align.as_deref(), Some("superscript"));
        assert!(capture_run(&tree, runs[1]).is_empty());
    }

    #[test]
    fn captures_paragraph_and_cell_properties() {
        let (tree, tc, p, _) = fixture();
        let pf = capture_paragraph(&tree, p);
        assert_eq!(pf.alignment.as_deref(), Some("center"));
        assert_eq!(pf.indent_left.as_deref(), Some("720"));
        assert_eq!(pf.indent_hanging.as_deref(), Some("360"));
        assert_eq!(pf.spacing_before.as_deref(), Some("120"));
        assert_eq!(pf.borders[0].0, "top");
        assert_eq!(pf.borders[0].1.color.as_deref(), Some("FF0000"));
        assert!(!pf.bidi);

        let cf = capture_cell(&tree, tc);
        assert_eq!(cf.v_align.as_deref(), Some("center"));
        assert_eq!(cf.shading_fill.as_deref(), Some("EEEEEE"));
        assert_eq!(cf.width.as_ref().and_then(|w| w.w.as_deref()), Some("2400"));
    }

    #[test]
    fn applying_run_format_to_a_bare_run_copies_it_in_schema_order() {
        let (mut tree, _, _, runs) = fixture();
        let f = capture_run(&tree, runs[0]);
        let v = Vocab::new("w");
        apply_run(&mut tree, &v, runs[1], &f);
        assert_eq!(capture_run(&tree, runs[1]), f);

        let rpr = tree.find_child(runs[1], "w:rPr").expect("rPr");
        assert_eq!(tree.element_children(runs[1]).next(), Some(rpr));
        let order: Vec<&str> = tree
            .element_children(rpr)
            .map(|c| tree.local_name(c))
            .collect();
        assert_eq!(order, vec!["rFonts", "b", "i", "color", "sz", "u", "vertAlign"]);
    }

    #[test]
    fn reapplying_captured_formats_is_stable() {
        let (mut tree, tc, p, _) = fixture();
        let v = Vocab::new("w");
        let before = String::from_utf8(tree.to_bytes().expect("write")).expect("utf8");
        let pf = capture_paragraph(&tree, p);
        let cf = capture_cell(&tree, tc);
        apply_paragraph(&mut tree, &v, p, &pf);
        apply_cell(&mut tree, &v, tc, &cf);
        let after = String::from_utf8(tree.to_bytes().expect("write")).expect("utf8");
        assert_eq!(before, after);
    }

    #[test]
    fn escaped_property_values_survive_reapplication() {
        let xml = r#"<w:p xmlns:w="urn:w"><w:r><w:rPr><w:rFonts w:ascii="A&amp;B" w:hAnsi="&quot;Q&quot;"/></w:rPr><w:t>x</w:t></w:r></w:p>"#;
        let mut tree = XmlTree::parse("t.xml", xml.as_bytes()).expect("parse");
        let p = tree.root().expect("root");
        let run = tree.descendants_local(p, "r")[0];
        let f = capture_run(&tree, run);
        assert_eq!(f.font_ascii.as_deref(), Some("A&B"));
        assert_eq!(f.font_hansi.as_deref(), Some("\"Q\""));

        apply_run(&mut tree, &Vocab::new("w"), run, &f);
        let out = String::from_utf8(tree.to_bytes().expect("write")).expect("utf8");
        assert!(out.contains(r#"w:ascii="A&amp;B""#), "{out}");
        assert!(!out.contains("&amp;amp;"), "{out}");
        assert_eq!(capture_run(&tree, run), f);
    }
}
