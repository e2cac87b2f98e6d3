use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use globset::Glob;
use memmap2::Mmap;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vetpdf_core::config::{Config, ScanSection};
use vetpdf_core::report::{self, InputSummary, Report};
use vetpdf_core::{Engine, EngineConfig, EngineFailure};
use vetpdf_detectors::{default_engine, CATALOGUE_VERSION};
use vetpdf_pdf::RawDocument;
use walkdir::WalkDir;

const WARN_PDF_BYTES: u64 = 50 * 1024 * 1024;
const MAX_PDF_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const MAX_BATCH_FILES: usize = 10_000;
const MAX_BATCH_BYTES: u64 = 50 * 1024 * 1024 * 1024;
const MAX_WALK_DEPTH: usize = 10;
const EXIT_ENGINE_FAILURE: u8 = 3;
const LOG_ENV: &str = "VETPDF_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "vetpdf", version, about = "Static PDF malware triage")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Scan a PDF, or every matching file under a directory")]
    Scan {
        #[arg(value_name = "PDF", required_unless_present = "path", conflicts_with = "path")]
        pdf: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        path: Option<PathBuf>,
        #[arg(long, default_value = "*.pdf")]
        glob: String,
        #[arg(long, conflicts_with = "jsonl")]
        json: bool,
        #[arg(long)]
        jsonl: bool,
        #[command(flatten)]
        settings: SettingsArgs,
        #[command(flatten)]
        limits: LimitArgs,
        #[arg(long, help = "Run checks and batch files on the calling thread only")]
        sequential: bool,
    },
    #[command(about = "Print the effective configuration as TOML")]
    ExplainConfig {
        #[command(flatten)]
        settings: SettingsArgs,
        #[command(flatten)]
        limits: LimitArgs,
    },
}

#[derive(clap::Args)]
struct SettingsArgs {
    #[arg(long, value_name = "FILE", help = "TOML or YAML configuration file")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "NAME", requires = "config")]
    profile: Option<String>,
}

#[derive(clap::Args)]
struct LimitArgs {
    #[arg(long)]
    max_decode_bytes: Option<usize>,
    #[arg(long)]
    max_total_decoded_bytes: Option<usize>,
    #[arg(long)]
    max_objects: Option<usize>,
    #[arg(long)]
    max_depth: Option<usize>,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl LimitArgs {
    /// Command-line limits as a config layer, so they pass the same range
    /// checks as file overrides.
    fn as_config(&self) -> Config {
        Config {
            scan: Some(ScanSection {
                max_decode_bytes: self.max_decode_bytes,
                max_total_decoded_bytes: self.max_total_decoded_bytes,
                max_objects: self.max_objects,
                max_depth: self.max_depth,
                timeout_ms: self.timeout_ms,
                ..ScanSection::default()
            }),
            ..Config::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Human,
    Json,
    Jsonl,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ENGINE_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<u8> {
    match args.command {
        Command::Scan { pdf, path, glob, json, jsonl, settings, limits, sequential } => {
            let mut engine_config = load_engine_config(&settings, &limits)?;
            let batch = path.is_some();
            if sequential || batch {
                // Batches parallelise across files instead.
                engine_config.scan.parallel = false;
            }
            let engine = default_engine(engine_config)?;
            let format = if json {
                OutputFormat::Json
            } else if jsonl {
                OutputFormat::Jsonl
            } else {
                OutputFormat::Human
            };
            let reports = match (pdf, path) {
                (Some(pdf), _) => vec![scan_file(&engine, &pdf)],
                (None, Some(dir)) => scan_batch(&engine, &dir, &glob, !sequential)?,
                (None, None) => return Err(anyhow!("either a PDF or --path is required")),
            };
            write_reports(&reports, format, batch)?;
            Ok(worst_exit_code(&reports))
        }
        Command::ExplainConfig { settings, limits } => {
            let engine_config = load_engine_config(&settings, &limits)?;
            let engine = default_engine(engine_config)?;
            let mut out = io::stdout().lock();
            writeln!(out, "# vetpdf check catalogue v{CATALOGUE_VERSION}: {}", engine.detector_ids().join(", "))?;
            out.write_all(toml::to_string(&engine.config().to_file_config())?.as_bytes())?;
            out.flush()?;
            Ok(0)
        }
    }
}

/// Defaults, then the config file and profile, then command-line limits.
/// Logging is installed once the file's level is known.
fn load_engine_config(settings: &SettingsArgs, limits: &LimitArgs) -> Result<EngineConfig> {
    let file = match &settings.config {
        Some(path) => Some(Config::load(path).map_err(|e| anyhow!("config {}: {e:#}", path.display()))?),
        None => None,
    };
    init_logging(file.as_ref().and_then(Config::log_level));
    let mut engine_config = EngineConfig::default();
    if let Some(file) = &file {
        file.apply(&mut engine_config, settings.profile.as_deref())?;
    }
    limits.as_config().apply(&mut engine_config, None)?;
    Ok(engine_config)
}

fn init_logging(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(config_level.unwrap_or(DEFAULT_LOG_LEVEL)));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
}

/// Map a file for scanning. Empty files are not mapped.
fn mmap_file(path: &Path) -> Result<Option<Mmap>> {
    let f = fs::File::open(path)?;
    let size = f.metadata()?.len();
    if size > WARN_PDF_BYTES {
        warn!(
            security = true,
            domain = "cli.input",
            kind = "large_file",
            path = %path.display(),
            bytes_len = size,
            "Large input file"
        );
    }
    if size > MAX_PDF_BYTES {
        warn!(
            security = true,
            domain = "cli.input",
            kind = "mmap_rejected",
            path = %path.display(),
            bytes_len = size,
            max_bytes = MAX_PDF_BYTES,
            "Input exceeds mapping limit"
        );
        return Err(anyhow!("file exceeds max size: {} bytes", size));
    }
    if size == 0 {
        return Ok(None);
    }
    let map = unsafe { Mmap::map(&f).map_err(|e| anyhow!(e))? };
    Ok(Some(map))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Scan one file. Unreadable files become failure reports so a batch
/// still accounts for them.
fn scan_file(engine: &Engine, path: &Path) -> Report {
    let display_path = path.display().to_string();
    let map = match mmap_file(path) {
        Ok(map) => map,
        Err(err) => {
            warn!(path = %display_path, error = %err, "Cannot read input");
            return Report::new(
                InputSummary { path: Some(display_path), sha256: None, length: 0 },
                CATALOGUE_VERSION,
                Err(EngineFailure::Internal(format!("cannot read input: {err:#}"))),
            );
        }
    };
    let bytes = map.as_deref().unwrap_or(&[]);
    let summary = InputSummary {
        path: Some(display_path),
        sha256: Some(sha256_hex(bytes)),
        length: bytes.len() as u64,
    };
    let result = engine.scan_document(RawDocument::new(bytes));
    Report::new(summary, CATALOGUE_VERSION, result)
}

fn collect_batch(dir: &Path, glob: &str) -> Result<Vec<PathBuf>> {
    let matcher = Glob::new(glob)?.compile_matcher();
    let mut total_bytes = 0u64;
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).max_depth(MAX_WALK_DEPTH).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !matcher.is_match(entry.path()) {
            continue;
        }
        if paths.len() >= MAX_BATCH_FILES {
            warn!(
                security = true,
                domain = "cli.batch",
                kind = "batch_file_limit",
                max_files = MAX_BATCH_FILES,
                "Batch file count exceeded"
            );
            return Err(anyhow!("batch file count exceeds limit of {MAX_BATCH_FILES}"));
        }
        if let Ok(meta) = entry.metadata() {
            total_bytes = total_bytes.saturating_add(meta.len());
            if total_bytes > MAX_BATCH_BYTES {
                warn!(
                    security = true,
                    domain = "cli.batch",
                    kind = "batch_size_limit",
                    bytes_len = total_bytes,
                    max_bytes = MAX_BATCH_BYTES,
                    "Batch size exceeded"
                );
                return Err(anyhow!("batch size exceeds limit"));
            }
        }
        paths.push(entry.into_path());
    }
    if paths.is_empty() {
        return Err(anyhow!("no files matched {} in {}", glob, dir.display()));
    }
    paths.sort();
    Ok(paths)
}

fn scan_batch(engine: &Engine, dir: &Path, glob: &str, parallel: bool) -> Result<Vec<Report>> {
    let paths = collect_batch(dir, glob)?;
    let thread_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    info!(files = paths.len(), threads = thread_count, "Scanning batch");
    let indexed: Vec<(usize, &PathBuf)> = paths.iter().enumerate().collect();
    let sequential = || indexed.iter().map(|(idx, path)| (*idx, scan_file(engine, path))).collect::<Vec<_>>();
    let mut reports = if parallel && thread_count > 1 && paths.len() > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(thread_count).build() {
            Ok(pool) => pool.install(|| {
                indexed.par_iter().map(|(idx, path)| (*idx, scan_file(engine, path))).collect::<Vec<_>>()
            }),
            Err(err) => {
                warn!(
                    security = true,
                    domain = "cli.batch",
                    kind = "batch_pool_fallback",
                    error = %err,
                    "Batch worker pool unavailable; scanning sequentially"
                );
                sequential()
            }
        }
    } else {
        sequential()
    };
    reports.sort_by_key(|(idx, _)| *idx);
    debug!(reports = reports.len(), "Batch complete");
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}

fn write_reports(reports: &[Report], format: OutputFormat, batch: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Json if batch => {
            serde_json::to_writer_pretty(&mut out, reports)?;
            out.write_all(b"\n")?;
        }
        OutputFormat::Json => {
            for r in reports {
                report::write_json(r, &mut out)?;
            }
        }
        OutputFormat::Jsonl => {
            for r in reports {
                report::write_jsonl(r, &mut out)?;
            }
        }
        OutputFormat::Human => {
            for r in reports {
                report::write_human(r, &mut out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Engine failures rank above Malicious.
fn worst_exit_code(reports: &[Report]) -> u8 {
    reports
        .iter()
        .map(|r| u8::try_from(r.exit_code()).unwrap_or(EXIT_ENGINE_FAILURE))
        .max()
        .unwrap_or(0)
}
