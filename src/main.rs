use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use docx_translator::pipeline::{
    init_default_config, write_unit_dump, CliOverrides, PipelineConfig, TranslatorPipeline,
};
use docx_translator::progress::{run_in_worker, ConsoleProgress, ProgressTracker};

#[derive(Parser, Debug)]
#[command(name = "docx-translator")]
#[command(about = "DOCX translator (remote LLM backends) with format preservation", long_about = None)]
struct Args {
    /// Generate the default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output .docx (default: <input_stem>_translated.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Config file path (default: search for docx-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target language code (e.g. hi, ar, fr)
    #[arg(long)]
    target_lang: Option<String>,

    /// Translation engine: groq, gemini or echo
    #[arg(long)]
    engine: Option<String>,

    /// Model name for the selected engine
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature (0..=2)
    #[arg(long)]
    temperature: Option<f32>,

    /// Character budget per backend request
    #[arg(long)]
    max_chars_per_chunk: Option<usize>,

    /// Translate at most this many characters of the document
    #[arg(long)]
    max_total_chars: Option<usize>,

    /// Print progress snapshots as JSON lines on stdout
    #[arg(long)]
    progress_json: bool,

    /// Write the collected units as JSON, then exit (no backend calls)
    #[arg(long, value_name = "JSON")]
    dump_units: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  docx-translator <input.docx>\n\nTIPS:\n  - Default config search: docx-translator.toml (upwards), or set DOCX_TRANSLATOR_CONFIG.\n  - API keys are read from GROQ_API_KEY / GEMINI_API_KEY unless the config names others.\n"
            );
            return Ok(());
        }
    };
    let output = match args.output {
        Some(p) => p,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output")
                .to_string();
            input.with_file_name(format!("{stem}_translated.docx"))
        }
    };

    let overrides = CliOverrides {
        config: args.config,
        target_lang: args.target_lang,
        engine: args.engine,
        model: args.model,
        temperature: args.temperature,
        max_chars_per_chunk: args.max_chars_per_chunk,
        max_total_chars: args.max_total_chars,
    };
    let cfg = PipelineConfig::from_paths_and_args(&input, overrides).context("build config")?;

    if let Some(dump) = args.dump_units {
        let n = write_unit_dump(&input, &dump, cfg.max_total_chars)?;
        eprintln!("Wrote {n} units: {}", dump.display());
        return Ok(());
    }

    let console = ConsoleProgress::new(!args.progress_json);
    console.info(format!(
        "Engine: {} ({}), target: {}",
        cfg.engine.name, cfg.engine.model, cfg.target_lang
    ));
    let pipeline = TranslatorPipeline::from_config(cfg).context("create backend")?;

    let tracker = ProgressTracker::new();
    let progress_json = args.progress_json;
    let job_output = output.clone();
    let report = run_in_worker(
        &tracker,
        move |t| {
            pipeline.translate_docx(
                &input,
                &job_output,
                |p, n| t.on_unit(p, n),
                |stats| t.set_counters(stats.api_calls, stats.cache_hits),
            )
        },
        |snap| {
            if progress_json {
                if let Ok(line) = serde_json::to_string(snap) {
                    let mut stdout = std::io::stdout().lock();
                    let _ = writeln!(stdout, "{line}");
                    let _ = stdout.flush();
                }
            } else {
                console.snapshot(snap);
            }
        },
    )?;

    console.info(format!(
        "Done: {} units, {} chunks, {} calls, {} cache hits, {} left untranslated, {} reinsertion failures -> {}",
        report.units,
        report.chunks,
        report.stats.api_calls,
        report.stats.cache_hits,
        report.stats.fallback_units,
        report.reinsert.failures.len(),
        output.display()
    ));
    Ok(())
}
