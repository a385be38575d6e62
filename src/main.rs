//! core-extract command line
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use extract_core_lib::database::{EvidenceDatabase, ProcessLog};
use extract_core_lib::extractors::discovery::{discover_with_fallback, DiscoveryQuery};
use extract_core_lib::extractors::TracingCallbacks;
use extract_core_lib::{
    logging, EvidenceContext, ExtractorError, ExtractorRegistry, ExtractorResult, ExtractorRunner,
    MountedEvidence, RunConfig, RunStatus, Settings,
};

#[derive(Parser)]
#[command(name = "core-extract", version, about = "Forensic artifact extraction and ingestion")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Verbose logging (file:line, thread names)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct EvidenceArgs {
    /// Evidence label (output and database directory name)
    #[arg(long)]
    label: String,

    #[arg(long, default_value_t = 1)]
    evidence_id: i64,

    /// Mounted evidence directory
    #[arg(long)]
    mount: Option<PathBuf>,

    /// Raw image path, for carving tools
    #[arg(long)]
    image: Option<PathBuf>,

    /// Case root (overrides settings)
    #[arg(long)]
    case_root: Option<PathBuf>,

    /// Evidence database (defaults to `{case_root}/evidences/{label}/evidence.sqlite`)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// List registered extractors
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Query the file_list index (falls back to the mounted filesystem)
    Discover {
        #[command(flatten)]
        evidence: EvidenceArgs,
        /// Filename pattern (exact or glob), repeatable
        #[arg(long = "name")]
        names: Vec<String>,
        /// Path pattern (glob or SQL LIKE), repeatable
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long = "ext")]
        extensions: Vec<String>,
        #[arg(long = "partition")]
        partitions: Vec<u32>,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Run an extractor's extraction phase (and optionally ingestion)
    Extract {
        extractor: String,
        #[command(flatten)]
        evidence: EvidenceArgs,
        /// Run configuration as a JSON object
        #[arg(long)]
        config: Option<String>,
        /// Ingest right after a successful extraction
        #[arg(long)]
        ingest: bool,
    },
    /// Ingest a previous extraction's output
    Ingest {
        extractor: String,
        #[command(flatten)]
        evidence: EvidenceArgs,
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Serialize)]
struct ExtractorListing<'a> {
    #[serde(flatten)]
    metadata: &'a extract_core_lib::ExtractorMetadata,
    type_name: &'static str,
}

fn print_json<T: Serialize>(value: &T) -> ExtractorResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn evidence_context(args: &EvidenceArgs, settings: &Settings) -> ExtractorResult<EvidenceContext> {
    let mut context = EvidenceContext::new(args.evidence_id, args.label.clone());
    if let Some(mount) = &args.mount {
        context = context.with_fs(Arc::new(MountedEvidence::open(mount)?));
    }
    if let Some(image) = &args.image {
        context = context.with_source_path(image.clone());
    }
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| case_settings(args, settings).evidence_db_path(&args.label));
    Ok(context.with_database(EvidenceDatabase::new(db_path)?))
}

fn case_settings(args: &EvidenceArgs, settings: &Settings) -> Settings {
    let mut settings = settings.clone();
    if let Some(root) = &args.case_root {
        settings.case_root = root.clone();
    }
    settings
}

fn run_config(json: Option<&str>) -> ExtractorResult<RunConfig> {
    json.map(RunConfig::from_json).unwrap_or_else(|| Ok(RunConfig::new()))
}

fn runner(
    registry: &ExtractorRegistry,
    name: &str,
    args: &EvidenceArgs,
    settings: &Settings,
    config: RunConfig,
) -> ExtractorResult<ExtractorRunner> {
    let extractor = registry
        .get(name)
        .ok_or_else(|| ExtractorError::Config(format!("Unknown extractor: {}", name)))?;
    let context = evidence_context(args, settings)?;
    let output_dir = extractor.get_output_dir(&case_settings(args, settings).case_root, &args.label, Some(&config));

    let mut runner = ExtractorRunner::new(extractor, context.clone(), output_dir).with_config(config);
    if let Some(db) = context.database {
        runner = runner.with_audit(Arc::new(ProcessLog::new(db)));
    }
    Ok(runner)
}

fn run(cli: Cli) -> ExtractorResult<bool> {
    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };
    let registry = ExtractorRegistry::discover();

    match cli.command {
        Command::List { category } => {
            let extractors = match &category {
                Some(c) => registry.get_by_category(c),
                None => registry.get_all(),
            };
            let listing: Vec<ExtractorListing> = extractors
                .iter()
                .map(|e| ExtractorListing { metadata: e.metadata(), type_name: e.type_name() })
                .collect();
            print_json(&listing)?;
            Ok(true)
        }
        Command::Discover { evidence, names, paths, extensions, partitions, include_deleted } => {
            let context = evidence_context(&evidence, &settings)?;
            let fs = context
                .fs
                .clone()
                .ok_or_else(|| ExtractorError::MissingResource("--mount is required for discovery".to_string()))?;
            let mut query = DiscoveryQuery::new()
                .filename_patterns(names)
                .path_patterns(paths)
                .extensions(extensions)
                .exclude_deleted(!include_deleted);
            if !partitions.is_empty() {
                query = query.partitions(partitions);
            }

            let conn = context.database.as_ref().map(|db| db.connect_read_only()).transpose()?;
            let result = discover_with_fallback(conn.as_ref(), fs.as_ref(), evidence.evidence_id, &query, true)?;
            print_json(&result)?;
            Ok(true)
        }
        Command::Extract { extractor, evidence, config, ingest } => {
            let config = run_config(config.as_deref())?;
            let runner = runner(&registry, &extractor, &evidence, &settings, config)?.ingest_after(ingest);
            let report = runner.run(&TracingCallbacks::new(extractor.clone()));
            print_json(&report)?;
            Ok(report.status == RunStatus::Success)
        }
        Command::Ingest { extractor, evidence, config } => {
            let config = run_config(config.as_deref())?;
            let runner = runner(&registry, &extractor, &evidence, &settings, config)?;
            let outcome = runner.run_ingestion(&TracingCallbacks::new(extractor.clone()));
            print_json(&outcome)?;
            Ok(outcome.status == RunStatus::Success)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        logging::init_verbose();
    } else {
        logging::init();
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
