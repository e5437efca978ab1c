use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{invoke_backend, TranslationBackend};
use crate::error::BackendError;
use crate::guard::restore;
use crate::ir::{Chunk, ProtectedUnit};
use crate::textutil::{localize_digits_outside_placeholders, needs_digit_localization};

use super::cache::{cache_key, BatchTranslation, TranslationCache};
use super::config::{Limits, PipelineConfig};
use super::limiter::RateLimiter;
use super::prompts::{build_batch_prompt, WireItem};
use super::response::parse_response;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub target_lang: String,
    pub temperature: f32,
    pub localize_numerals: bool,
    pub limits: Limits,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            target_lang: cfg.target_lang.clone(),
            temperature: cfg.temperature,
            localize_numerals: cfg.localize_numerals,
            limits: cfg.limits.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TranslationStats {
    pub api_calls: usize,
    pub cache_hits: usize,
    pub chunks: usize,
    pub bisections: usize,
    pub fallback_units: usize,
}

/// Drives chunks through the backend: cache lookup, rate-limited calls,
/// retries with linear backoff, then bisection down to single units.
pub struct Orchestrator {
    backend: Arc<dyn TranslationBackend>,
    cache: Arc<TranslationCache>,
    limiter: Arc<RateLimiter>,
    settings: OrchestratorSettings,
    stats: TranslationStats,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn TranslationBackend>, settings: OrchestratorSettings) -> Self {
        let cache = Arc::new(TranslationCache::new(settings.limits.cache_capacity));
        let limiter = Arc::new(RateLimiter::new(settings.limits.min_request_interval));
        Self::with_services(backend, cache, limiter, settings)
    }

    /// Shares a cache and limiter with other orchestrators.
    pub fn with_services(
        backend: Arc<dyn TranslationBackend>,
        cache: Arc<TranslationCache>,
        limiter: Arc<RateLimiter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            settings,
            stats: TranslationStats::default(),
        }
    }

    pub fn stats(&self) -> TranslationStats {
        self.stats
    }

    /// Translates every chunk and returns restored text per unit id. Never
    /// fails: units that cannot be translated keep their source text.
    /// `on_chunk(done, total, stats)` runs after each top-level chunk.
    pub fn translate(
        &mut self,
        chunks: &[Chunk],
        on_chunk: impl FnMut(usize, usize, &TranslationStats),
    ) -> HashMap<String, String> {
        let mut out = self.translate_protected(chunks, on_chunk);
        for u in chunks.iter().flat_map(|c| c.units.iter()) {
            if let Some(text) = out.get_mut(&u.id) {
                *text = restore(text, &u.placeholders);
            }
        }
        out
    }

    /// Like [`translate`](Self::translate), but the texts still carry the
    /// units' placeholders.
    pub fn translate_protected(
        &mut self,
        chunks: &[Chunk],
        mut on_chunk: impl FnMut(usize, usize, &TranslationStats),
    ) -> HashMap<String, String> {
        let mut out: HashMap<String, String> = HashMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            self.stats.chunks += 1;
            self.translate_units(&chunk.units, &mut out);
            on_chunk(i + 1, chunks.len(), &self.stats);
        }
        log::info!(
            "translated {} chunks: {} calls, {} cache hits, {} bisections, {} units left in source",
            self.stats.chunks,
            self.stats.api_calls,
            self.stats.cache_hits,
            self.stats.bisections,
            self.stats.fallback_units
        );
        out
    }

    fn translate_units(&mut self, units: &[ProtectedUnit], out: &mut HashMap<String, String>) {
        if units.is_empty() {
            return;
        }
        match self.translate_batch(units) {
            Ok(map) => {
                for u in units {
                    let text = map.get(&u.id).unwrap_or(&u.text);
                    out.insert(u.id.clone(), text.clone());
                }
            }
            Err(e) if units.len() == 1 => {
                let u = &units[0];
                log::warn!("{}: translation failed, keeping source text: {e}", u.id);
                self.stats.fallback_units += 1;
                out.insert(u.id.clone(), u.text.clone());
            }
            Err(e) => {
                let mid = units.len() / 2;
                log::warn!(
                    "chunk {}..{} failed ({e}), splitting {} units in two",
                    units[0].id,
                    units[units.len() - 1].id,
                    units.len()
                );
                self.stats.bisections += 1;
                self.translate_units(&units[..mid], out);
                self.translate_units(&units[mid..], out);
            }
        }
    }

    /// Placeholdered translations for one batch, from cache or backend.
    fn translate_batch(&mut self, units: &[ProtectedUnit]) -> Result<BatchTranslation, BackendError> {
        let items: Vec<WireItem> = units
            .iter()
            .map(|u| WireItem {
                id: u.id.clone(),
                text: u.text.clone(),
            })
            .collect();
        let projection: Vec<(&str, &str)> = items
            .iter()
            .map(|it| (it.id.as_str(), it.text.as_str()))
            .collect();
        let key = cache_key(
            self.backend.engine(),
            self.backend.model(),
            self.settings.temperature,
            &self.settings.target_lang,
            &projection,
        );
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("cache hit for {} units", items.len());
            self.stats.cache_hits += 1;
            return Ok(hit);
        }

        let payload = build_batch_prompt(&items, &self.settings.target_lang);
        let attempts = self.settings.limits.retry_attempts.max(1);
        let mut last_err = BackendError::EmptyResponse;
        for attempt in 0..attempts {
            match self.call_once(&payload, &items) {
                Ok(map) => {
                    self.cache.insert(key, map.clone());
                    return Ok(map);
                }
                Err(e) => {
                    log::warn!("attempt {}/{attempts} failed: {e}", attempt + 1);
                    last_err = e;
                    if attempt + 1 < attempts {
                        std::thread::sleep(backoff(self.settings.limits.backoff_unit, attempt));
                    }
                }
            }
        }
        Err(last_err)
    }

    fn call_once(&mut self, payload: &str, items: &[WireItem]) -> Result<BatchTranslation, BackendError> {
        self.limiter.wait();
        self.stats.api_calls += 1;
        let raw = invoke_backend(self.backend.as_ref(), payload, self.settings.temperature)?;
        let reconciled = parse_response(&raw, items)?;
        if !reconciled.missing.is_empty() {
            log::warn!(
                "reply left out {} ids, keeping source: {}",
                reconciled.missing.len(),
                reconciled.missing.join(",")
            );
        }
        if reconciled.dropped > 0 {
            log::warn!("reply carried {} unknown or repeated ids", reconciled.dropped);
        }
        let mut map = reconciled.map;
        let lang = &self.settings.target_lang;
        if self.settings.localize_numerals && needs_digit_localization(lang) {
            for text in map.values_mut() {
                *text = localize_digits_outside_placeholders(text, lang);
            }
        }
        Ok(map)
    }
}

fn backoff(unit: Duration, attempt: u32) -> Duration {
    unit * (1 + 2 * attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing::ScriptedBackend;
    use crate::backends::EchoBackend;
    use crate::guard::{protect, PlaceholderMap};

    fn settings(lang: &str) -> OrchestratorSettings {
        OrchestratorSettings {
            target_lang: lang.to_string(),
            temperature: 0.5,
            localize_numerals: true,
            limits: Limits {
                min_request_interval: Duration::ZERO,
                cache_capacity: 100,
                retry_attempts: 3,
                backoff_unit: Duration::ZERO,
            },
        }
    }

    fn plain(id: &str, text: &str) -> ProtectedUnit {
        ProtectedUnit {
            id: id.to_string(),
            members: vec![id.to_string()],
            style: None,
            source_text: text.to_string(),
            text: text.to_string(),
            placeholders: PlaceholderMap::default(),
            heading: false,
            ends_section: false,
        }
    }

    fn down() -> Result<String, BackendError> {
        Err(BackendError::RequestFailed("connection reset".into()))
    }

    #[test]
    fn backoff_grows_linearly() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff(unit, 0), Duration::from_secs(1));
        assert_eq!(backoff(unit, 1), Duration::from_secs(3));
        assert_eq!(backoff(unit, 2), Duration::from_secs(5));
    }

    #[test]
    fn failing_half_falls_back_after_bisection() {
        let script = vec![
            down(),
            down(),
            down(),
            Ok(r#"[{"id":"P0","text":"पहला"}]"#.to_string()),
            down(),
            down(),
            down(),
        ];
        let backend = Arc::new(ScriptedBackend::new(script));
        let mut orch = Orchestrator::new(backend.clone(), settings("hi"));
        let chunk = Chunk {
            units: vec![plain("P0", "First"), plain("P1", "Second")],
        };
        let out = orch.translate(&[chunk], |_, _, _| {});
        assert_eq!(out["P0"], "पहला");
        assert_eq!(out["P1"], "Second");
        assert_eq!(backend.call_count(), 7);
        let stats = orch.stats();
        assert_eq!(stats.bisections, 1);
        assert_eq!(stats.fallback_units, 1);
        assert_eq!(stats.api_calls, 7);
    }

    #[test]
    fn repeated_batch_is_served_from_cache() {
        let reply = r#"[{"id":"P0","text":"नमस्ते"}]"#.to_string();
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(reply)]));
        let mut orch = Orchestrator::new(backend.clone(), settings("hi"));
        let chunk = Chunk {
            units: vec![plain("P0", "Hello")],
        };
        let first = orch.translate(std::slice::from_ref(&chunk), |_, _, _| {});
        let second = orch.translate(std::slice::from_ref(&chunk), |_, _, _| {});
        assert_eq!(first, second);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(orch.stats().cache_hits, 1);
    }

    #[test]
    fn output_ids_match_request_ids() {
        let reply = r#"Here: [{"id":"P2","text":"दो"},{"id":"X9","text":"stray"},{"id":"P2","text":"again"}]"#;
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(reply.to_string())]));
        let mut orch = Orchestrator::new(backend, settings("hi"));
        let chunk = Chunk {
            units: vec![plain("P1", "One"), plain("P2", "Two")],
        };
        let out = orch.translate(&[chunk], |_, _, _| {});
        let mut keys: Vec<&String> = out.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["P1", "P2"]);
        assert_eq!(out["P1"], "One");
        assert_eq!(out["P2"], "दो");
    }

    #[test]
    fn digits_are_localized_for_hindi() {
        let reply = r#"[{"id":"P0","text":"अध्याय 12"}]"#;
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(reply.to_string())]));
        let mut orch = Orchestrator::new(backend, settings("hi"));
        let out = orch.translate(&[Chunk { units: vec![plain("P0", "Chapter 12")] }], |_, _, _| {});
        assert_eq!(out["P0"], "अध्याय १२");
    }

    #[test]
    fn echo_round_trip_restores_protected_values() {
        let source = "Contact us at test@example.com or call +1-555-0100.";
        let p = protect(source, &[]);
        assert_eq!(p.map.len(), 2);
        let unit = ProtectedUnit {
            id: "P0".into(),
            members: vec!["P0".into()],
            style: None,
            source_text: source.into(),
            text: p.text.clone(),
            placeholders: p.map.clone(),
            heading: false,
            ends_section: false,
        };
        let mut s = settings("fr");
        s.localize_numerals = false;
        let mut orch = Orchestrator::new(Arc::new(EchoBackend::new()), s);
        let mut seen = Vec::new();
        let out = orch.translate(&[Chunk { units: vec![unit] }], |done, total, stats| seen.push((done, total, stats.api_calls)));
        assert_eq!(out["P0"], source);
        assert_eq!(seen, vec![(1, 1, 1)]);
    }

    #[test]
    fn chunk_callback_sees_running_counters() {
        let reply = |id: &str| -> Result<String, BackendError> { Ok(format!(r#"[{{"id":"{id}","text":"t"}}]"#)) };
        let backend = Arc::new(ScriptedBackend::new(vec![reply("H0"), reply("H1")]));
        let mut orch = Orchestrator::new(backend, settings("fr"));
        let chunks = vec![
            Chunk { units: vec![plain("H0", "Title")] },
            Chunk { units: vec![plain("H1", "Subtitle")] },
            Chunk { units: vec![plain("H0", "Title")] },
        ];
        let mut seen = Vec::new();
        orch.translate(&chunks, |done, _, stats| seen.push((done, stats.api_calls, stats.cache_hits)));
        assert_eq!(seen, vec![(1, 1, 0), (2, 2, 0), (3, 2, 1)]);
    }

    #[test]
    fn protected_output_keeps_placeholders() {
        let p = protect("Write to test@example.com", &[]);
        let unit = ProtectedUnit {
            text: p.text.clone(),
            placeholders: p.map.clone(),
            ..plain("P0", "Write to test@example.com")
        };
        let mut s = settings("fr");
        s.localize_numerals = false;
        let mut orch = Orchestrator::new(Arc::new(EchoBackend::new()), s);
        let out = orch.translate_protected(&[Chunk { units: vec![unit] }], |_, _, _| {});
        assert_eq!(out["P0"], "Write to <EMAIL_0>");
    }
}
