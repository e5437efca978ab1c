use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, AppConfig, EngineSection, CONFIG_ENV, DEFAULT_CONFIG_FILE,
};
use crate::docx::apply::Typography;
use crate::error::ConfigError;

pub const ENGINE_GROQ: &str = "groq";
pub const ENGINE_GEMINI: &str = "gemini";
pub const ENGINE_ECHO: &str = "echo";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub name: String,
    pub model: String,
    pub endpoint: String,
    pub api_key_env: Vec<String>,
}

fn builtin_engine(name: &str) -> Option<EngineSettings> {
    let (model, endpoint, keys): (&str, &str, &[&str]) = match name {
        ENGINE_GROQ => (
            "llama-3.3-70b-versatile",
            "https://api.groq.com/openai/v1/chat/completions",
            &["GROQ_API_KEY", "GROQ_KEY"],
        ),
        ENGINE_GEMINI => (
            "gemini-2.5-flash-lite",
            "https://generativelanguage.googleapis.com/v1beta",
            &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        ),
        ENGINE_ECHO => ("echo", "", &[]),
        _ => return None,
    };
    Some(EngineSettings {
        name: name.to_string(),
        model: model.to_string(),
        endpoint: endpoint.to_string(),
        api_key_env: keys.iter().map(|s| s.to_string()).collect(),
    })
}

fn resolve_engine(
    name: &str,
    section: Option<&EngineSection>,
    model_override: Option<String>,
) -> Result<EngineSettings, ConfigError> {
    let name = name.trim().to_ascii_lowercase();
    let mut engine =
        builtin_engine(&name).ok_or_else(|| ConfigError::UnsupportedEngine(name.clone()))?;
    if let Some(sec) = section {
        if let Some(m) = sec.model.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            engine.model = m.to_string();
        }
        if let Some(e) = sec.endpoint.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            engine.endpoint = e.trim_end_matches('/').to_string();
        }
        if let Some(keys) = sec.api_key_env.as_ref().filter(|k| !k.is_empty()) {
            engine.api_key_env = keys.clone();
        }
    }
    if let Some(m) = model_override.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) {
        engine.model = m;
    }
    Ok(engine)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Limits {
    pub min_request_interval: Duration,
    pub cache_capacity: usize,
    pub retry_attempts: u32,
    /// Attempt `n` (0-based) waits `backoff_unit * (1 + 2n)` before retrying.
    pub backoff_unit: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_millis(250),
            cache_capacity: 5000,
            retry_attempts: 3,
            backoff_unit: Duration::from_millis(1000),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub target_lang: Option<String>,
    pub engine: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_chars_per_chunk: Option<usize>,
    pub max_total_chars: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: Option<PathBuf>,
    pub target_lang: String,
    pub engine: EngineSettings,
    pub temperature: f32,
    pub max_chars_per_chunk: usize,
    pub max_total_chars: Option<usize>,
    pub localize_numerals: bool,
    pub limits: Limits,
    pub typography: Typography,
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl PipelineConfig {
    /// Loads the config file (explicit path, env var, or upward search next to
    /// the input) and layers the CLI values on top.
    pub fn from_paths_and_args(input: &Path, args: CliOverrides) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = args
            .config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, DEFAULT_CONFIG_FILE));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                log::info!("config: {}", p.display());
            } else if args.config.is_some() {
                anyhow::bail!("config file not found: {}", p.display());
            }
        }
        let cfg = Self::from_app_config(&file_cfg, cfg_file, args).context("resolve config")?;
        Ok(cfg)
    }

    pub fn from_app_config(
        file_cfg: &AppConfig,
        config_path: Option<PathBuf>,
        args: CliOverrides,
    ) -> Result<Self, ConfigError> {
        let p = &file_cfg.pipeline;
        let target_lang = args
            .target_lang
            .or_else(|| p.target_lang.clone())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "hi".to_string());
        if target_lang.is_empty() {
            return Err(invalid("target_lang", "must not be empty"));
        }

        let engine_name = args
            .engine
            .or_else(|| p.engine.clone())
            .unwrap_or_else(|| ENGINE_GROQ.to_string());
        let section = file_cfg.engines.get(engine_name.trim());
        let engine = resolve_engine(&engine_name, section, args.model)?;

        let temperature = args.temperature.or(p.temperature).unwrap_or(0.5);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("temperature", format!("{temperature} is outside 0..=2")));
        }
        let max_chars_per_chunk = args
            .max_chars_per_chunk
            .or(p.max_chars_per_chunk)
            .unwrap_or(6000);
        if max_chars_per_chunk == 0 {
            return Err(invalid("max_chars_per_chunk", "must be positive"));
        }
        let max_total_chars = args.max_total_chars.or(p.max_total_chars).filter(|n| *n > 0);
        let localize_numerals = p.localize_numerals.unwrap_or(true);

        let defaults = Limits::default();
        let l = &file_cfg.limits;
        let limits = Limits {
            min_request_interval: l
                .min_request_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_request_interval),
            cache_capacity: l.cache_capacity.unwrap_or(defaults.cache_capacity),
            retry_attempts: l.retry_attempts.unwrap_or(defaults.retry_attempts),
            backoff_unit: l
                .backoff_unit_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_unit),
        };
        if limits.retry_attempts == 0 {
            return Err(invalid("retry_attempts", "must be at least 1"));
        }

        let typo_defaults = Typography::default();
        let typography = Typography {
            devanagari_font: file_cfg
                .typography
                .devanagari_font
                .clone()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(typo_defaults.devanagari_font),
            min_font_pt: file_cfg
                .typography
                .min_font_pt
                .unwrap_or(typo_defaults.min_font_pt),
        };

        Ok(Self {
            config_path,
            target_lang,
            engine,
            temperature,
            max_chars_per_chunk,
            max_total_chars,
            localize_numerals,
            limits,
            typography,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILE);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
target_lang = "hi"
# groq | gemini | echo (offline, returns the input unchanged)
engine = "groq"
temperature = 0.5
max_chars_per_chunk = 6000
# Translate at most this many characters; text past the cut is cleared.
# max_total_chars = 20000
localize_numerals = true

[limits]
min_request_interval_ms = 250
cache_capacity = 5000
retry_attempts = 3
backoff_unit_ms = 1000

[typography]
devanagari_font = "Noto Sans Devanagari"
min_font_pt = 11

[engines.groq]
model = "llama-3.3-70b-versatile"
endpoint = "https://api.groq.com/openai/v1/chat/completions"
api_key_env = ["GROQ_API_KEY", "GROQ_KEY"]

[engines.gemini]
model = "gemini-2.5-flash-lite"
endpoint = "https://generativelanguage.googleapis.com/v1beta"
api_key_env = ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn defaults_without_file() {
        let cfg = PipelineConfig::from_app_config(&AppConfig::default(), None, CliOverrides::default())
            .expect("config");
        assert_eq!(cfg.target_lang, "hi");
        assert_eq!(cfg.engine.name, ENGINE_GROQ);
        assert_eq!(cfg.engine.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.max_chars_per_chunk, 6000);
        assert_eq!(cfg.max_total_chars, None);
        assert_eq!(cfg.limits, Limits::default());
        assert!(cfg.localize_numerals);
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse_config(
            "[pipeline]\nengine = \"gemini\"\ntarget_lang = \"ar\"\n[engines.gemini]\nmodel = \"m1\"\n",
        )
        .expect("parse");
        let args = CliOverrides {
            target_lang: Some("fr".into()),
            model: Some("m2".into()),
            ..Default::default()
        };
        let cfg = PipelineConfig::from_app_config(&file, None, args).expect("config");
        assert_eq!(cfg.target_lang, "fr");
        assert_eq!(cfg.engine.name, ENGINE_GEMINI);
        assert_eq!(cfg.engine.model, "m2");
        assert_eq!(cfg.engine.api_key_env, vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"]);
    }

    #[test]
    fn rejects_unknown_engine_and_bad_values() {
        let args = CliOverrides {
            engine: Some("deepl".into()),
            ..Default::default()
        };
        let err = PipelineConfig::from_app_config(&AppConfig::default(), None, args)
            .expect_err("unknown engine");
        assert!(matches!(err, ConfigError::UnsupportedEngine(ref e) if e == "deepl"));

        let args = CliOverrides {
            temperature: Some(3.5),
            ..Default::default()
        };
        let err = PipelineConfig::from_app_config(&AppConfig::default(), None, args)
            .expect_err("bad temperature");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "temperature"));
    }

    #[test]
    fn written_default_config_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let cfg = load_config(&path).expect("load");
        let resolved = PipelineConfig::from_app_config(&cfg, Some(path), CliOverrides::default())
            .expect("resolve");
        assert_eq!(resolved.typography.devanagari_font, "Noto Sans Devanagari");
        assert_eq!(resolved.limits.retry_attempts, 3);
    }
}
