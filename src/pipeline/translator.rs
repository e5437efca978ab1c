use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::backends::{self, TranslationBackend};
use crate::docx::apply::{ReinsertReport, Reinserter};
use crate::docx::document::WordDocument;
use crate::docx::extract::{apply_char_budget, collect_units, PartScan};
use crate::error::ConfigError;
use crate::guard::restore;
use crate::ir::{ProtectedUnit, TranslationUnit, UnitDump};
use crate::sentinels::{split_segments, strip_segments};
use crate::textutil::{is_trivial_text, localize_digits_outside_placeholders};

use super::cache::TranslationCache;
use super::chunker::{build_chunks, prepare_units};
use super::heading::HeadingClassifier;
use super::limiter::RateLimiter;
use super::orchestrator::{Orchestrator, OrchestratorSettings, TranslationStats};
use super::PipelineConfig;

#[derive(Clone, Debug, Default)]
pub struct TranslationReport {
    pub scans: Vec<PartScan>,
    /// Walker units after the global budget.
    pub units: usize,
    /// Paragraph units kept out of the backend for having no letters.
    pub trivial: usize,
    pub chunks: usize,
    /// The global character budget cut the document.
    pub truncated: bool,
    pub stats: TranslationStats,
    pub reinsert: ReinsertReport,
}

/// Whole-document run: walk, protect, chunk, translate, write back.
pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    backend: Arc<dyn TranslationBackend>,
    cache: Arc<TranslationCache>,
    limiter: Arc<RateLimiter>,
}

impl TranslatorPipeline {
    pub fn new(cfg: PipelineConfig, backend: Arc<dyn TranslationBackend>) -> Self {
        let cache = Arc::new(TranslationCache::new(cfg.limits.cache_capacity));
        let limiter = Arc::new(RateLimiter::new(cfg.limits.min_request_interval));
        Self {
            cfg,
            backend,
            cache,
            limiter,
        }
    }

    /// Builds the configured backend; fails on unknown engines or missing keys.
    pub fn from_config(cfg: PipelineConfig) -> Result<Self, ConfigError> {
        let backend: Arc<dyn TranslationBackend> = Arc::from(backends::from_config(&cfg.engine)?);
        Ok(Self::new(cfg, backend))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn translate_docx(
        &self,
        input: &Path,
        output: &Path,
        on_unit: impl FnMut(usize, usize),
        on_stats: impl FnMut(&TranslationStats),
    ) -> anyhow::Result<TranslationReport> {
        log::info!("read DOCX: {}", input.display());
        let mut doc = WordDocument::open(input)?;
        let report = self.translate_document(&mut doc, on_unit, on_stats)?;
        doc.save(output)
            .with_context(|| format!("write output: {}", output.display()))?;
        log::info!("saved {}", output.display());
        Ok(report)
    }

    /// Translates `doc` in place. `on_stats` runs after every chunk with the
    /// counters so far; `on_unit(processed, total)` runs once per walker unit
    /// whose text was written back.
    pub fn translate_document(
        &self,
        doc: &mut WordDocument,
        mut on_unit: impl FnMut(usize, usize),
        mut on_stats: impl FnMut(&TranslationStats),
    ) -> anyhow::Result<TranslationReport> {
        let (units, scans) = collect_units(doc);
        let budget = apply_char_budget(units, self.cfg.max_total_chars);
        if budget.truncated {
            log::info!(
                "character budget reached: {} units kept, {} text nodes cleared",
                budget.units.len(),
                budget.cleared.len()
            );
        }
        log::info!("translation units: {}", budget.units.len());

        let prepared = prepare_units(&budget.units, &HeadingClassifier::new(&doc.styles));
        let (trivial, to_send): (Vec<&ProtectedUnit>, Vec<&ProtectedUnit>) =
            prepared.iter().partition(|p| is_trivial_text(&p.text));
        let chunks = build_chunks(to_send.into_iter().cloned().collect(), self.cfg.max_chars_per_chunk);

        let mut orch = Orchestrator::with_services(
            self.backend.clone(),
            self.cache.clone(),
            self.limiter.clone(),
            OrchestratorSettings::from_config(&self.cfg),
        );
        // Texts keep their placeholders until split into segments.
        let mut translated = orch.translate_protected(&chunks, |done, total, stats| {
            log::debug!("chunk {done}/{total} translated");
            on_stats(stats);
        });
        for p in &trivial {
            let text = if self.cfg.localize_numerals {
                localize_digits_outside_placeholders(&p.text, &self.cfg.target_lang)
            } else {
                p.text.clone()
            };
            translated.insert(p.id.clone(), text);
        }

        let by_id: HashMap<&str, &TranslationUnit> =
            budget.units.iter().map(|u| (u.id.as_str(), u)).collect();
        let total = budget.units.len();
        let mut processed = 0usize;
        let mut reinserter = Reinserter::new(&self.cfg.target_lang, self.cfg.typography.clone());
        for p in &prepared {
            let text = translated.get(&p.id).unwrap_or(&p.text);
            let members: Vec<&TranslationUnit> = p
                .members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let pieces = split_segments(text);
            if pieces.len() == members.len() {
                for (unit, piece) in members.iter().zip(pieces) {
                    let piece = restore(piece, &p.placeholders);
                    if reinserter.apply(doc, unit, &piece, p.heading) {
                        processed += 1;
                        on_unit(processed, total);
                    }
                }
            } else {
                log::warn!(
                    "{}: expected {} segments, got {}; spreading over the whole paragraph",
                    p.id,
                    members.len(),
                    pieces.len()
                );
                let Some(combined) = combine_members(&members) else {
                    continue;
                };
                let whole = restore(&strip_segments(text), &p.placeholders);
                if reinserter.apply(doc, &combined, &whole, p.heading) {
                    processed += members.len();
                    on_unit(processed.min(total), total);
                }
            }
        }
        reinserter.clear(doc, &budget.cleared);

        let reinsert = reinserter.into_report();
        if !reinsert.failures.is_empty() {
            log::warn!("{} reinsertion steps failed", reinsert.failures.len());
        }
        Ok(TranslationReport {
            scans,
            units: total,
            trivial: trivial.len(),
            chunks: chunks.len(),
            truncated: budget.truncated,
            stats: orch.stats(),
            reinsert,
        })
    }
}

/// One unit spanning every member's text nodes and runs.
fn combine_members(members: &[&TranslationUnit]) -> Option<TranslationUnit> {
    let (first, rest) = members.split_first()?;
    let mut combined = (*first).clone();
    for m in rest {
        combined.text.push_str(&m.text);
        combined.nodes.extend(m.nodes.iter().cloned());
        combined.runs.extend(m.runs.iter().copied());
        combined.snapshot.runs.extend(m.snapshot.runs.iter().cloned());
    }
    Some(combined)
}

/// The paragraph units a run would send, without contacting a backend.
pub fn dump_units(doc: &WordDocument, max_total_chars: Option<usize>) -> Vec<UnitDump> {
    let (units, _) = collect_units(doc);
    let budget = apply_char_budget(units, max_total_chars);
    let by_id: HashMap<&str, &TranslationUnit> = budget.units.iter().map(|u| (u.id.as_str(), u)).collect();
    prepare_units(&budget.units, &HeadingClassifier::new(&doc.styles))
        .into_iter()
        .map(|p| {
            let first = p.members.first().and_then(|id| by_id.get(id.as_str()));
            let part = first
                .and_then(|u| doc.parts.get(u.part))
                .map(|part| part.name.clone())
                .unwrap_or_default();
            let container = match first {
                Some(u) if u.textbox.is_some() => "textbox",
                Some(u) if u.cell.is_some() => "table",
                _ => "body",
            };
            UnitDump {
                id: p.id,
                part,
                style: p.style,
                heading: p.heading,
                container,
                text: p.source_text,
            }
        })
        .collect()
}

pub fn write_unit_dump(input: &Path, out: &Path, max_total_chars: Option<usize>) -> anyhow::Result<usize> {
    let doc = WordDocument::open(input)?;
    let dump = dump_units(&doc, max_total_chars);
    let json = serde_json::to_string_pretty(&dump).context("serialize units")?;
    std::fs::write(out, json).with_context(|| format!("write units: {}", out.display()))?;
    Ok(dump.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backends::testing::ScriptedBackend;
    use crate::backends::EchoBackend;
    use crate::config::AppConfig;
    use crate::docx::document::fixtures::docx_with_body;
    use crate::docx::package::DocxPackage;
    use crate::pipeline::config::CliOverrides;

    fn config(lang: &str) -> PipelineConfig {
        let args = CliOverrides {
            engine: Some("echo".into()),
            target_lang: Some(lang.into()),
            ..CliOverrides::default()
        };
        let mut cfg = PipelineConfig::from_app_config(&AppConfig::default(), None, args).expect("config");
        cfg.limits.min_request_interval = Duration::ZERO;
        cfg.limits.backoff_unit = Duration::ZERO;
        cfg
    }

    fn open(bytes: &[u8]) -> WordDocument {
        WordDocument::from_package(DocxPackage::from_bytes(bytes).expect("zip")).expect("open")
    }

    /// Paragraph texts of the body part, in order.
    fn body_texts(doc: &WordDocument) -> Vec<String> {
        let (units, _) = collect_units(doc);
        let mut out: Vec<String> = Vec::new();
        let mut last = None;
        for u in units.iter().filter(|u| u.part == 0) {
            if last == Some(u.paragraph) {
                if let Some(s) = out.last_mut() {
                    s.push_str(&u.text);
                }
            } else {
                out.push(u.text.clone());
            }
            last = Some(u.paragraph);
        }
        out
    }

    const BODY: &str = r#"<w:p><w:r><w:t xml:space="preserve">Mail a@example.com </w:t></w:r><w:hyperlink r:id="rId9"><w:r><w:t>or b@example.org</w:t></w:r></w:hyperlink></w:p><w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Chapter 5 of 10</w:t></w:r></w:p><w:p><w:r><w:t>* * *</w:t></w:r></w:p>"#;

    #[test]
    fn echo_run_keeps_text_and_localizes_heading_digits() {
        let pipeline = TranslatorPipeline::new(config("hi"), Arc::new(EchoBackend::new()));
        let mut doc = open(&docx_with_body(BODY));
        let mut calls: Vec<(usize, usize)> = Vec::new();
        let report = pipeline
            .translate_document(&mut doc, |p, t| calls.push((p, t)), |_| {})
            .expect("translate");

        let reopened = open(&doc.to_bytes().expect("bytes"));
        assert_eq!(
            body_texts(&reopened),
            vec!["Mail a@example.com or b@example.org", "Chapter ५ of १०", "* * *"]
        );
        // Body members, heading, separator, header, footer.
        assert_eq!(report.units, 6);
        assert_eq!(report.trivial, 1);
        assert_eq!(calls.len(), 6);
        assert_eq!(calls.last(), Some(&(6, 6)));
        assert!(report.reinsert.failures.is_empty());
        assert_eq!(report.stats.fallback_units, 0);
    }

    #[test]
    fn lost_segment_markers_spread_over_the_paragraph() {
        let reply = r#"[{"id":"P0","text":"Mail <EMAIL_0> or <EMAIL_1>"}]"#;
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(reply.to_string())]));
        let pipeline = TranslatorPipeline::new(config("fr"), backend.clone());
        let body = r#"<w:p><w:r><w:t xml:space="preserve">Mail a@example.com </w:t></w:r><w:hyperlink r:id="rId9"><w:r><w:t>or b@example.org</w:t></w:r></w:hyperlink></w:p>"#;
        let mut doc = open(&docx_with_body(body));
        let report = pipeline.translate_document(&mut doc, |_, _| {}, |_| {}).expect("translate");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(report.reinsert.applied, 3);
        let reopened = open(&doc.to_bytes().expect("bytes"));
        assert_eq!(body_texts(&reopened), vec!["Mail a@example.com or b@example.org"]);
    }

    #[test]
    fn budget_clears_text_past_the_cut() {
        let mut cfg = config("fr");
        cfg.max_total_chars = Some(8);
        let pipeline = TranslatorPipeline::new(cfg, Arc::new(EchoBackend::new()));
        let body = r#"<w:p><w:r><w:t>First one</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r></w:p>"#;
        let mut doc = open(&docx_with_body(body));
        let report = pipeline.translate_document(&mut doc, |_, _| {}, |_| {}).expect("translate");
        assert!(report.truncated);
        let reopened = open(&doc.to_bytes().expect("bytes"));
        let texts = body_texts(&reopened);
        assert_eq!(texts[0], "First on");
        assert!(texts.iter().skip(1).all(|t| t.is_empty()), "{texts:?}");
    }

    #[test]
    fn translate_docx_writes_output_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.docx");
        let output = dir.path().join("in_translated.docx");
        std::fs::write(&input, docx_with_body(BODY)).expect("write input");
        let pipeline = TranslatorPipeline::new(config("fr"), Arc::new(EchoBackend::new()));
        pipeline.translate_docx(&input, &output, |_, _| {}, |_| {}).expect("translate");
        let doc = WordDocument::open(&output).expect("reopen");
        assert_eq!(body_texts(&doc)[1], "Chapter 5 of 10");

        let dump_path = dir.path().join("units.json");
        assert_eq!(write_unit_dump(&input, &dump_path, None).expect("dump"), 5);
        let dumped: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&dump_path).expect("read")).expect("json");
        assert_eq!(dumped[0]["text"], "Mail a@example.com or b@example.org");
        assert_eq!(dumped[1]["heading"], true);
        assert_eq!(dumped[0]["part"], "word/document.xml");
        assert_eq!(dumped[0]["container"], "body");
    }

    #[test]
    fn dump_names_table_and_textbox_containers() {
        let body = r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell text</w:t></w:r></w:p></w:tc></w:tr></w:tbl><w:p><w:r><w:drawing><wps:txbx xmlns:wps="urn:wps"><w:txbxContent><w:p><w:r><w:t>Box text</w:t></w:r></w:p></w:txbxContent></wps:txbx></w:drawing></w:r></w:p>"#;
        let doc = open(&docx_with_body(body));
        let dump = dump_units(&doc, None);
        let find = |text: &str| dump.iter().find(|d| d.text == text).map(|d| d.container);
        assert_eq!(find("Cell text"), Some("table"));
        assert_eq!(find("Box text"), Some("textbox"));
    }

    #[test]
    fn literal_segment_marker_in_source_survives() {
        let pipeline = TranslatorPipeline::new(config("fr"), Arc::new(EchoBackend::new()));
        let body = r#"<w:p><w:r><w:t>see &lt;SEG_1&gt; here</w:t></w:r></w:p>"#;
        let mut doc = open(&docx_with_body(body));
        pipeline.translate_document(&mut doc, |_, _| {}, |_| {}).expect("translate");
        let reopened = open(&doc.to_bytes().expect("bytes"));
        assert_eq!(body_texts(&reopened), vec!["see <SEG_1> here"]);
    }

    #[test]
    fn stats_are_reported_per_chunk() {
        let mut cfg = config("fr");
        cfg.max_chars_per_chunk = 12;
        let pipeline = TranslatorPipeline::new(cfg, Arc::new(EchoBackend::new()));
        let body = r#"<w:p><w:r><w:t>First paragraph</w:t></w:r></w:p><w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>"#;
        let mut doc = open(&docx_with_body(body));
        let mut calls: Vec<usize> = Vec::new();
        let report = pipeline
            .translate_document(&mut doc, |_, _| {}, |s| calls.push(s.api_calls))
            .expect("translate");
        assert!(calls.len() >= 2, "{calls:?}");
        assert!(calls.windows(2).all(|w| w[0] <= w[1]), "{calls:?}");
        assert_eq!(calls.last().copied(), Some(report.stats.api_calls));
    }
}
