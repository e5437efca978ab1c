use serde::Serialize;

use crate::docx::format::{CellFormat, ParagraphFormat, RunFormat};
use crate::docx::xml::NodeId;
use crate::guard::PlaceholderMap;

#[derive(Clone, Debug)]
pub struct TextNodeRef {
    pub node: NodeId,
    /// Owning run.
    pub run: NodeId,
    pub leading_space: bool,
    pub trailing_space: bool,
    /// Length in chars.
    pub original_len: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FormattingSnapshot {
    pub runs: Vec<(NodeId, RunFormat)>,
    pub paragraph: ParagraphFormat,
    pub cell: Option<CellFormat>,
}

impl FormattingSnapshot {
    pub fn run_format(&self, run: NodeId) -> Option<&RunFormat> {
        self.runs.iter().find(|(r, _)| *r == run).map(|(_, f)| f)
    }
}

/// One atomic piece of translatable text tied to its document nodes.
#[derive(Clone, Debug)]
pub struct TranslationUnit {
    pub id: String,
    /// Index of the owning part in `WordDocument::parts`.
    pub part: usize,
    pub paragraph: NodeId,
    pub cell: Option<NodeId>,
    pub textbox: Option<NodeId>,
    pub text: String,
    /// Paragraph style id.
    pub style: Option<String>,
    pub nodes: Vec<TextNodeRef>,
    pub runs: Vec<NodeId>,
    /// Language recorded on the paragraph's first run.
    pub lang: Option<String>,
    /// The paragraph ends a page or section.
    pub ends_section: bool,
    pub snapshot: FormattingSnapshot,
}

impl TranslationUnit {
    /// Same paragraph in the same part.
    pub fn paragraph_key(&self) -> (usize, NodeId) {
        (self.part, self.paragraph)
    }
}

/// Paragraph-level unit after protection, as sent to a backend.
#[derive(Clone, Debug)]
pub struct ProtectedUnit {
    pub id: String,
    /// Ids of the walker units merged into this one, in order.
    pub members: Vec<String>,
    pub style: Option<String>,
    /// Unprotected joined text, used for classification and reporting.
    pub source_text: String,
    /// Protected text; member boundaries are marked with segment tokens.
    pub text: String,
    pub placeholders: PlaceholderMap,
    pub heading: bool,
    pub ends_section: bool,
}

impl ProtectedUnit {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Chunk {
    pub units: Vec<ProtectedUnit>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.units.iter().map(ProtectedUnit::char_len).sum()
    }

    pub fn is_heading(&self) -> bool {
        self.units.len() == 1 && self.units[0].heading
    }

    pub fn ids(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.id.as_str()).collect()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UnitDump {
    pub id: String,
    pub part: String,
    pub style: Option<String>,
    pub heading: bool,
    /// `body`, `table` or `textbox`.
    pub container: &'static str,
    pub text: String,
}
