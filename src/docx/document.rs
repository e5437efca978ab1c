use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, Context};

use super::package::DocxPackage;
use super::xml::XmlTree;

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const DEFAULT_MAIN_PART: &str = "word/document.xml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartKind {
    Body,
    Header,
    Footer,
}

pub struct DocumentPart {
    pub name: String,
    pub kind: PartKind,
    pub tree: XmlTree,
}

#[derive(Clone, Debug, Default)]
pub struct StyleInfo {
    pub name: Option<String>,
    pub based_on: Option<String>,
}

/// Paragraph styles by style id.
#[derive(Clone, Debug, Default)]
pub struct StyleCatalog {
    styles: HashMap<String, StyleInfo>,
}

impl StyleCatalog {
    pub fn from_tree(tree: &XmlTree) -> Self {
        let mut styles = HashMap::new();
        let Some(root) = tree.root() else {
            return Self { styles };
        };
        for st in tree.descendants_local(root, "style") {
            let is_paragraph = tree
                .attr_local(st, "type")
                .map(|t| t == "paragraph")
                .unwrap_or(true);
            let Some(id) = tree.attr_local(st, "styleId") else {
                continue;
            };
            if !is_paragraph {
                continue;
            }
            let child_val = |local: &str| {
                tree.find_child_local(st, local)
                    .and_then(|c| tree.attr_local(c, "val"))
                    .map(str::to_string)
            };
            styles.insert(
                id.to_string(),
                StyleInfo {
                    name: child_val("name"),
                    based_on: child_val("basedOn"),
                },
            );
        }
        Self { styles }
    }

    pub fn get(&self, id: &str) -> Option<&StyleInfo> {
        self.styles.get(id)
    }

    /// Display name for a style id, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.styles
            .get(id)
            .and_then(|s| s.name.as_deref())
            .unwrap_or(id)
    }

    pub fn insert(&mut self, id: &str, info: StyleInfo) {
        self.styles.insert(id.to_string(), info);
    }
}

pub struct WordDocument {
    pub package: DocxPackage,
    pub parts: Vec<DocumentPart>,
    pub styles: StyleCatalog,
}

fn normalize_target(base_dir: &str, target: &str) -> String {
    let t = target.replace('\\', "/");
    if let Some(abs) = t.strip_prefix('/') {
        return abs.to_string();
    }
    let mut segs: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in t.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    segs.join("/")
}

fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

/// Relationship id -> (type, resolved part name).
fn read_rels(pkg: &DocxPackage, rels_name: &str, base_dir: &str) -> anyhow::Result<HashMap<String, (String, String)>> {
    let mut map = HashMap::new();
    let Some(bytes) = pkg.get(rels_name) else {
        return Ok(map);
    };
    let tree = XmlTree::parse(rels_name, bytes).with_context(|| format!("parse {rels_name}"))?;
    let Some(root) = tree.root() else {
        return Ok(map);
    };
    for rel in tree.descendants_local(root, "Relationship") {
        let id = tree.attr(rel, "Id").unwrap_or("").trim();
        let target = tree.attr(rel, "Target").unwrap_or("").trim();
        if id.is_empty() || target.is_empty() {
            continue;
        }
        if tree.attr(rel, "TargetMode") == Some("External") {
            continue;
        }
        let kind = tree.attr(rel, "Type").unwrap_or("").to_string();
        map.insert(id.to_string(), (kind, normalize_target(base_dir, target)));
    }
    Ok(map)
}

fn find_main_part(pkg: &DocxPackage) -> anyhow::Result<String> {
    let root_rels = read_rels(pkg, "_rels/.rels", "")?;
    let main = root_rels
        .values()
        .find(|(kind, _)| kind == OFFICE_DOCUMENT_REL)
        .map(|(_, target)| target.clone());
    Ok(main.unwrap_or_else(|| DEFAULT_MAIN_PART.to_string()))
}

/// Header/footer relationship ids of every section, in section order.
fn section_references(tree: &XmlTree) -> Vec<(PartKind, String)> {
    let mut refs: Vec<(PartKind, String)> = Vec::new();
    let Some(root) = tree.root() else {
        return refs;
    };
    for sect in tree.descendants_local(root, "sectPr") {
        for child in tree.element_children(sect) {
            let kind = match tree.local_name(child) {
                "headerReference" => PartKind::Header,
                "footerReference" => PartKind::Footer,
                _ => continue,
            };
            if let Some(rid) = tree.attr_local(child, "id") {
                let rid = rid.trim();
                if !rid.is_empty() {
                    refs.push((kind, rid.to_string()));
                }
            }
        }
    }
    refs
}

impl WordDocument {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let package = DocxPackage::read(path)?;
        Self::from_package(package).with_context(|| format!("load document: {}", path.display()))
    }

    pub fn from_package(package: DocxPackage) -> anyhow::Result<Self> {
        let main_name = find_main_part(&package)?;
        let main_bytes = package
            .get(&main_name)
            .ok_or_else(|| anyhow!("missing main document part: {main_name}"))?;
        let main_tree =
            XmlTree::parse(&main_name, main_bytes).with_context(|| format!("parse {main_name}"))?;

        let rels = read_rels(&package, &rels_path_for(&main_name), part_dir(&main_name))?;
        let mut parts = vec![];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(main_name.clone());
        let mut aux: Vec<DocumentPart> = Vec::new();
        for (kind, rid) in section_references(&main_tree) {
            let Some((_, target)) = rels.get(&rid) else {
                log::warn!("{main_name}: unresolved relationship {rid}");
                continue;
            };
            if !seen.insert(target.clone()) {
                continue;
            }
            let Some(bytes) = package.get(target).filter(|b| !b.is_empty()) else {
                log::warn!("{main_name}: referenced part missing: {target}");
                continue;
            };
            match XmlTree::parse(target, bytes) {
                Ok(tree) => aux.push(DocumentPart {
                    name: target.clone(),
                    kind,
                    tree,
                }),
                Err(e) => log::warn!("skipping unparsable part {target}: {e:#}"),
            }
        }
        parts.push(DocumentPart {
            name: main_name.clone(),
            kind: PartKind::Body,
            tree: main_tree,
        });
        parts.extend(aux);

        let styles_name = rels
            .values()
            .find(|(kind, _)| kind.ends_with("/styles"))
            .map(|(_, t)| t.clone())
            .unwrap_or_else(|| "word/styles.xml".to_string());
        let styles = match package.get(&styles_name) {
            Some(bytes) => match XmlTree::parse(&styles_name, bytes) {
                Ok(tree) => StyleCatalog::from_tree(&tree),
                Err(e) => {
                    log::warn!("ignoring unparsable {styles_name}: {e:#}");
                    StyleCatalog::default()
                }
            },
            None => StyleCatalog::default(),
        };

        Ok(Self {
            package,
            parts,
            styles,
        })
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        self.package.to_bytes(&self.replacements()?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.package.write_with_replacements(path, &self.replacements()?)
    }

    fn replacements(&self) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for part in &self.parts {
            let bytes = part
                .tree
                .to_bytes()
                .with_context(|| format!("serialize {}", part.name))?;
            out.insert(part.name.clone(), bytes);
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::docx::package::fixtures::build_docx;

    pub const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

    pub const DOC_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/header" Target="header1.xml"/><Relationship Id="rId8" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer" Target="footer1.xml"/><Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/></Relationships>"#;

    pub const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/></w:style><w:style w:type="paragraph" w:styleId="Custom"><w:name w:val="Fancy Body"/><w:basedOn w:val="Heading2"/></w:style><w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style></w:styles>"#;

    pub fn header(text: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:hdr xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:hdr>"#
        )
    }

    pub fn footer(text: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:ftr xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:ftr>"#
        )
    }

    /// Wraps body XML into a document part with one section referencing a
    /// header and a footer.
    pub fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body}<w:sectPr><w:headerReference w:type="default" r:id="rId7"/><w:footerReference w:type="default" r:id="rId8"/><w:footerReference w:type="first" r:id="rId8"/></w:sectPr></w:body></w:document>"#
        )
    }

    pub fn docx_with_body(body: &str) -> Vec<u8> {
        let doc = document(body);
        let hdr = header("Header text");
        let ftr = footer("Page footer");
        build_docx(&[
            ("_rels/.rels", ROOT_RELS),
            ("word/_rels/document.xml.rels", DOC_RELS),
            ("word/document.xml", doc.as_str()),
            ("word/styles.xml", STYLES),
            ("word/header1.xml", hdr.as_str()),
            ("word/footer1.xml", ftr.as_str()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::docx::package::fixtures::build_docx;

    #[test]
    fn discovers_body_header_and_footer_once() {
        let bytes = docx_with_body("<w:p><w:r><w:t>Hi</w:t></w:r></w:p>");
        let doc = WordDocument::from_package(DocxPackage::from_bytes(&bytes).expect("zip"))
            .expect("open");
        let names: Vec<&str> = doc.parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["word/document.xml", "word/header1.xml", "word/footer1.xml"]
        );
        assert_eq!(doc.parts[1].kind, PartKind::Header);
        assert_eq!(doc.styles.display_name("Heading1"), "heading 1");
        assert_eq!(
            doc.styles.get("Custom").and_then(|s| s.based_on.as_deref()),
            Some("Heading2")
        );
    }

    #[test]
    fn broken_header_is_skipped() {
        let doc_xml = document("<w:p/>");
        let bytes = build_docx(&[
            ("_rels/.rels", ROOT_RELS),
            ("word/_rels/document.xml.rels", DOC_RELS),
            ("word/document.xml", doc_xml.as_str()),
            ("word/header1.xml", "<w:hdr><w:p></w:hdr>"),
        ]);
        let doc = WordDocument::from_package(DocxPackage::from_bytes(&bytes).expect("zip"))
            .expect("open");
        assert_eq!(doc.parts.len(), 1);
    }

    #[test]
    fn relationship_targets_resolve_relative_to_part() {
        assert_eq!(normalize_target("word", "header1.xml"), "word/header1.xml");
        assert_eq!(normalize_target("word", "../customXml/item.xml"), "customXml/item.xml");
        assert_eq!(normalize_target("", "/word/document.xml"), "word/document.xml");
        assert_eq!(rels_path_for("word/document.xml"), "word/_rels/document.xml.rels");
    }

    #[test]
    fn untouched_document_round_trips() {
        let bytes = docx_with_body("<w:p><w:r><w:t>Hi</w:t></w:r></w:p>");
        let doc = WordDocument::from_package(DocxPackage::from_bytes(&bytes).expect("zip"))
            .expect("open");
        let again = DocxPackage::from_bytes(&doc.to_bytes().expect("save")).expect("zip");
        let original = DocxPackage::from_bytes(&bytes).expect("zip");
        for ent in &original.entries {
            assert_eq!(again.get(&ent.name), Some(ent.data.as_slice()), "{}", ent.name);
        }
    }
}
