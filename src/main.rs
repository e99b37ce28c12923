use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use autograder_analysis::cache::AnalysisStore;
use autograder_analysis::cache::store::FileStore;
use autograder_analysis::cli::{CacheAction, Cli, Commands, SummaryKind};
use autograder_analysis::config::{Config, ConfigService};
use autograder_analysis::doctor;
use autograder_analysis::error::{AnalysisError, ErrorCode, error_code};
use autograder_analysis::metrics::{JsonlMetrics, MetricsRecorder, NoopMetrics};
use autograder_analysis::models::options::AnalysisOptions;
use autograder_analysis::models::summary::{IndividualAnalysisSummary, PairwiseAnalysisSummary};
use autograder_analysis::models::task::{AnalysisTaskOptions, UserTaskInfo};
use autograder_analysis::service::{AnalysisResults, AnalysisService, KeyFailure};
use autograder_analysis::submissions::manifest::ManifestSource;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        println!("{}", make_error_line(&e));
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify_error(e: &anyhow::Error) -> (String, String) {
    if let Some(ae) = e.downcast_ref::<AnalysisError>() {
        return (ae.code.to_string(), ae.message.clone());
    }
    // Context layers keep the full chain in the message.
    let code = error_code(e).unwrap_or(ErrorCode::IoError);
    (code.to_string(), format!("{e:#}"))
}

fn serialize_output(value: &impl Serialize, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn make_error_line(e: &anyhow::Error) -> String {
    let (code, message) = classify_error(e);
    serde_json::json!({ "error": { "code": code, "message": message } }).to_string()
}

fn print_output(value: &impl Serialize, pretty: bool) -> Result<()> {
    println!("{}", serialize_output(value, pretty)?);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ResultsOutput<'a, T> {
    results: &'a [T],
    pending_count: usize,
    complete: bool,
    #[serde(skip_serializing_if = "no_failures")]
    failures: &'a [KeyFailure],
}

fn no_failures(failures: &&[KeyFailure]) -> bool {
    failures.is_empty()
}

impl<'a, T> From<&'a AnalysisResults<T>> for ResultsOutput<'a, T> {
    fn from(value: &'a AnalysisResults<T>) -> Self {
        Self {
            results: &value.results,
            pending_count: value.pending_count,
            complete: value.is_complete() && !value.has_failures(),
            failures: &value.failures,
        }
    }
}

/// Parse a YAML (or JSON, which is YAML) document.
fn read_document<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what}: {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| {
        AnalysisError::config(format!("Failed to parse {what}: {}", path.display()))
    })
}

fn open_store(config: &Config) -> Result<Arc<dyn AnalysisStore>> {
    Ok(Arc::new(FileStore::new(
        &config.cache_dir,
        config.stale_claim_after(),
    )?))
}

fn build_service(config: &Config, manifest: &Path) -> Result<AnalysisService> {
    let engines = config.build_engines()?;
    let store = open_store(config)?;
    let submissions = Arc::new(ManifestSource::open(manifest)?);
    let metrics: Arc<dyn MetricsRecorder> = match &config.metrics_path {
        Some(path) => Arc::new(JsonlMetrics::new(path)),
        None => Arc::new(NoopMetrics),
    };

    Ok(AnalysisService::new(engines, store, submissions, metrics)
        .with_claim_timeout(config.claim_timeout()))
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;

    // Load configuration
    let config = ConfigService::load(cli.config.as_deref())?;

    // Initialize logging if debug mode (CLI flag or config)
    if cli.debug || config.debug {
        autograder_analysis::logger::init(&config)?;
    }

    // Handle commands that need no analysis service
    match &cli.command {
        Commands::Init { path } => {
            let config_path = if let Some(p) = path {
                ConfigService::generate_at(p)?;
                p.clone()
            } else {
                ConfigService::generate_default()?;
                ConfigService::default_path()
            };
            eprintln!("Configuration file created at: {}", config_path.display());
            return Ok(());
        }
        Commands::Doctor => return cmd_doctor(&config, pretty),
        Commands::ValidateOptions { file } => return cmd_validate_options(file, pretty),
        Commands::Cache {
            action: CacheAction::Clear,
        } => return cmd_cache_clear(&config, pretty),
        _ => {}
    }

    match cli.command {
        Commands::Pairwise {
            manifest,
            ids,
            no_wait,
            requester,
        } => {
            let service = build_service(&config, &manifest)?;
            cmd_pairwise(&service, &ids, !no_wait, &requester, pretty)
        }
        Commands::Individual {
            manifest,
            ids,
            no_wait,
            requester,
        } => {
            let service = build_service(&config, &manifest)?;
            cmd_individual(&service, &ids, !no_wait, &requester, pretty)
        }
        Commands::Summary {
            manifest,
            kind,
            ids,
            precision,
            requester,
        } => {
            let service = build_service(&config, &manifest)?;
            cmd_summary(&service, kind, &ids, precision, &requester, pretty)
        }
        Commands::RunTask { manifest, task } => {
            let service = build_service(&config, &manifest)?;
            cmd_run_task(&service, &task, pretty)
        }
        Commands::Init { .. }
        | Commands::Doctor
        | Commands::ValidateOptions { .. }
        | Commands::Cache { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_pairwise(
    service: &AnalysisService,
    ids: &[String],
    wait: bool,
    requester: &str,
    pretty: bool,
) -> Result<()> {
    let results = service.pairwise_analysis(ids, wait, requester)?;
    print_output(&ResultsOutput::from(&results), pretty)?;
    if !results.is_complete() && !wait {
        // Background work dies with the process; finish it before exiting.
        service.pairwise_analysis(ids, true, requester)?;
    }
    Ok(())
}

fn cmd_individual(
    service: &AnalysisService,
    ids: &[String],
    wait: bool,
    requester: &str,
    pretty: bool,
) -> Result<()> {
    let results = service.individual_analysis(ids, wait, requester)?;
    print_output(&ResultsOutput::from(&results), pretty)?;
    if !results.is_complete() && !wait {
        service.individual_analysis(ids, true, requester)?;
    }
    Ok(())
}

fn cmd_summary(
    service: &AnalysisService,
    kind: SummaryKind,
    ids: &[String],
    precision: Option<u32>,
    requester: &str,
    pretty: bool,
) -> Result<()> {
    match kind {
        SummaryKind::Pairwise => {
            let results = service.pairwise_analysis(ids, true, requester)?;
            let mut summary = PairwiseAnalysisSummary::new(&results.results, results.pending_count);
            if let Some(precision) = precision {
                summary.round_with_precision(precision);
            }
            print_output(&summary, pretty)
        }
        SummaryKind::Individual => {
            let results = service.individual_analysis(ids, true, requester)?;
            let mut summary =
                IndividualAnalysisSummary::new(&results.results, results.pending_count);
            if let Some(precision) = precision {
                summary.round_with_precision(precision);
            }
            print_output(&summary, pretty)
        }
    }
}

fn cmd_validate_options(file: &Path, pretty: bool) -> Result<()> {
    let mut options: AnalysisOptions = read_document(file, "analysis options")?;
    options.validate()?;
    print_output(&options, pretty)
}

fn cmd_run_task(service: &AnalysisService, task_path: &Path, pretty: bool) -> Result<()> {
    let task: UserTaskInfo = read_document(task_path, "task definition")?;
    task.validate()?;
    if task.disabled {
        return print_output(
            &serde_json::json!({ "task": task.name, "disabled": true }),
            pretty,
        );
    }

    let options = AnalysisTaskOptions::from_task(&task)?;
    let requester = task.name.as_str();
    if options.individual {
        cmd_individual(service, &options.submission_ids, options.wait, requester, pretty)
    } else {
        cmd_pairwise(service, &options.submission_ids, options.wait, requester, pretty)
    }
}

fn cmd_cache_clear(config: &Config, pretty: bool) -> Result<()> {
    open_store(config)?.clear()?;
    print_output(
        &serde_json::json!({ "cleared": config.cache_dir.display().to_string() }),
        pretty,
    )
}

fn cmd_doctor(config: &Config, pretty: bool) -> Result<()> {
    let engines = config.build_engines()?;
    let report = doctor::run_doctor(&engines);
    print_output(&report, pretty)
}
