use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "docx-translator.toml";
pub const CONFIG_ENV: &str = "DOCX_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub typography: TypographySection,
    /// Per-engine overrides keyed by engine name (`groq`, `gemini`, `echo`).
    #[serde(default)]
    pub engines: HashMap<String, EngineSection>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_chars_per_chunk: Option<usize>,

    /// Cap on translatable characters across the whole document. Text past
    /// the cap is cleared from the output.
    #[serde(default)]
    pub max_total_chars: Option<usize>,

    /// Convert ASCII digits outside protected spans to the target script.
    #[serde(default)]
    pub localize_numerals: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LimitsSection {
    #[serde(default)]
    pub min_request_interval_ms: Option<u64>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_unit_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TypographySection {
    #[serde(default)]
    pub devanagari_font: Option<String>,
    #[serde(default)]
    pub min_font_pt: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineSection {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variables searched, in order, for the API key.
    #[serde(default)]
    pub api_key_env: Option<Vec<String>>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    toml::from_str(text).context("parse config toml")
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let cfg = parse_config(
            r#"
[pipeline]
target_lang = "ar"
engine = "gemini"
temperature = 0.2
max_total_chars = 1000

[limits]
retry_attempts = 5

[typography]
min_font_pt = 12

[engines.gemini]
model = "gemini-2.0-flash"
api_key_env = ["MY_KEY"]
"#,
        )
        .expect("parse");
        assert_eq!(cfg.pipeline.target_lang.as_deref(), Some("ar"));
        assert_eq!(cfg.pipeline.max_total_chars, Some(1000));
        assert_eq!(cfg.pipeline.max_chars_per_chunk, None);
        assert_eq!(cfg.limits.retry_attempts, Some(5));
        assert_eq!(cfg.typography.min_font_pt, Some(12));
        let g = &cfg.engines["gemini"];
        assert_eq!(g.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(g.api_key_env.as_deref(), Some(&["MY_KEY".to_string()][..]));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_config("").expect("parse");
        assert!(cfg.engines.is_empty());
        assert!(cfg.pipeline.engine.is_none());
    }

    #[test]
    fn finds_config_in_parent_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").expect("write");
        let found = find_file_upwards(&nested, DEFAULT_CONFIG_FILE, 4).expect("found");
        assert_eq!(found, dir.path().join(DEFAULT_CONFIG_FILE));
        assert!(find_file_upwards(&nested, "missing.toml", 4).is_none());
    }
}
