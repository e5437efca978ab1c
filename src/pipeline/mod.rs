pub mod cache;
pub mod chunker;
pub mod config;
pub mod heading;
pub mod limiter;
pub mod orchestrator;
pub mod prompts;
pub mod response;
pub mod translator;

pub use config::{init_default_config, CliOverrides, PipelineConfig};
pub use orchestrator::{Orchestrator, OrchestratorSettings, TranslationStats};
pub use translator::{write_unit_dump, TranslationReport, TranslatorPipeline};
