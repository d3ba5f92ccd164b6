//! modelflow - latest-approved model batch inference
//!
//! The `modelflow` command selects the newest approved model package of a
//! group and drives the fetch → create-model → transform pipeline over it.
//!
//! ## Commands
//!
//! - `select`: Print the latest approved package of a group
//! - `definition`: Print the pipeline definition as JSON
//! - `run`: Execute the pipeline against local dry-run collaborators
//! - `verdict`: Re-evaluate a run from its exported event log

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use modelflow_core::{
    init_tracing, standard_pipeline, ModelPackageRecord, PipelineConfig, PipelineDefinition,
    RegistrySelector, BATCH_DATA_PARAM,
};
use modelflow_exec::{
    dry_run_collaborators, NodeStatus, PipelineRunResult, PipelineRunner, RunOptions, RunVerdict,
};
use modelflow_state::fakes::MemoryRunLedger;
use modelflow_state::{JsonFileModelRegistry, RunEvent, RunId, RunLedger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "modelflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch inference with the latest approved model", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where pipeline configuration comes from.
///
/// The TOML file is read first, then `MODELFLOW_*` variables, then flags.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Pipeline config file (TOML)
    #[arg(long, env = "MODELFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Model package group to select from
    #[arg(long)]
    group: Option<String>,

    /// Seconds to wait for the fetch callback
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the latest approved model package of a group
    Select {
        /// Registry export (JSON array of model packages)
        #[arg(long)]
        registry: PathBuf,

        /// Model package group
        #[arg(long)]
        group: String,
    },

    /// Print the pipeline definition as JSON
    Definition {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the pipeline with dry-run model hosting and transform
    Run {
        /// Registry export (JSON array of model packages)
        #[arg(long)]
        registry: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        /// Override the BatchData parameter for this run
        #[arg(long)]
        batch_data: Option<String>,

        /// Write the recorded run events to a JSON file
        #[arg(long)]
        events_out: Option<PathBuf>,
    },

    /// Evaluate a run from an exported event log
    Verdict {
        /// Events file written by `run --events-out`
        #[arg(long)]
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Select { registry, group } => cmd_select(&registry, &group).await,
        Commands::Definition { config, output } => cmd_definition(&config, output.as_deref()),
        Commands::Run {
            registry,
            config,
            batch_data,
            events_out,
        } => {
            cmd_run(
                &registry,
                &config,
                batch_data.as_deref(),
                events_out.as_deref(),
            )
            .await
        }
        Commands::Verdict { events } => cmd_verdict(&events),
    }
}

/// Build the effective config from file, environment and flags.
fn resolve_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let mut config = PipelineConfig::new("", "");
            config.apply_env()?;
            config
        }
    };
    config.apply_overrides(|key| match key {
        "BUCKET" => args.bucket.clone(),
        "MODEL_PACKAGE_GROUP" => args.group.clone(),
        "CALLBACK_TIMEOUT_SECS" => args.timeout_secs.map(|s| s.to_string()),
        _ => None,
    })?;
    config.validate().context("Invalid pipeline config")?;
    Ok(config)
}

async fn select_from_file(registry: &Path, group: &str) -> Result<ModelPackageRecord> {
    let selector = RegistrySelector::new(Arc::new(JsonFileModelRegistry::new(registry)));
    let record = selector
        .select_latest_approved(group)
        .await
        .with_context(|| format!("No model selected from group {}", group))?;
    Ok(record)
}

async fn cmd_select(registry: &Path, group: &str) -> Result<()> {
    let record = select_from_file(registry, group).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn build_definition(args: &ConfigArgs) -> Result<(PipelineConfig, PipelineDefinition)> {
    let config = resolve_config(args)?;
    let definition = standard_pipeline(&config).context("Failed to build pipeline definition")?;
    Ok((config, definition))
}

fn cmd_definition(args: &ConfigArgs, output: Option<&Path>) -> Result<()> {
    let (_, definition) = build_definition(args)?;
    let json = definition.to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Definition written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Execute one dry run and return its result with the recorded events.
async fn run_dry(
    registry: &Path,
    args: &ConfigArgs,
    batch_data: Option<&str>,
    cancel: CancellationToken,
) -> Result<(PipelineRunResult, Vec<RunEvent>)> {
    let (config, definition) = build_definition(args)?;

    let ledger = Arc::new(MemoryRunLedger::new());
    let collaborators = dry_run_collaborators(
        Arc::new(JsonFileModelRegistry::new(registry)),
        &config.model_name_prefix,
    );
    let runner = PipelineRunner::new(ledger.clone(), collaborators);

    let mut options = RunOptions::default()
        .with_cancel(cancel)
        .with_tag("mode", "dry-run")
        .with_tag("region", &config.region);
    if let Some(location) = batch_data {
        options = options.with_override(BATCH_DATA_PARAM, location);
    }

    let result = runner
        .run(&definition, options)
        .await
        .context("Pipeline failed to run")?;
    let events = ledger.get_events(&RunId(result.run_id.clone())).await?;
    Ok((result, events))
}

async fn cmd_run(
    registry: &Path,
    args: &ConfigArgs,
    batch_data: Option<&str>,
    events_out: Option<&Path>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let (result, events) = run_dry(registry, args, batch_data, cancel).await?;
    info!(run_id = %result.run_id, status = ?result.status, "Run finished");

    // Print results
    println!("Run ID: {}", result.run_id);
    println!("Status: {}", if result.success() { "✓ COMPLETED" } else { "✗ NOT COMPLETED" });
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for node in &result.nodes {
        let mark = match node.status {
            NodeStatus::Succeeded => "✓",
            NodeStatus::Failed | NodeStatus::Cancelled => "✗",
            NodeStatus::Skipped => "-",
        };
        match &node.failure {
            Some(failure) => println!(
                "  {} {} ({}ms, {}: {})",
                mark, node.node, node.duration_ms, failure.kind, failure.message
            ),
            None => println!("  {} {} ({}ms)", mark, node.node, node.duration_ms),
        }
        for (name, value) in &node.outputs {
            println!("      {} = {}", name, value);
        }
    }

    if let Some(path) = events_out {
        std::fs::write(path, serde_json::to_string_pretty(&events)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!();
        println!("Events written to {}", path.display());
    }

    let verdict = RunVerdict::evaluate(&events);
    print_verdict(&verdict);

    if result.success() && verdict.passed {
        Ok(())
    } else {
        anyhow::bail!("Pipeline run did not complete")
    }
}

fn load_events(path: &Path) -> Result<Vec<RunEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let events: Vec<RunEvent> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed event log {}", path.display()))?;
    Ok(events)
}

fn cmd_verdict(path: &Path) -> Result<()> {
    let mut events = load_events(path)?;
    events.sort_by_key(|e| e.seq);
    let verdict = RunVerdict::evaluate(&events);
    print_verdict(&verdict);
    if verdict.passed {
        Ok(())
    } else {
        anyhow::bail!("{}", verdict.message)
    }
}

fn print_verdict(verdict: &RunVerdict) {
    println!();
    println!("Verdict: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use modelflow_core::{ApprovalStatus, ErrorKind, FETCH_NODE};
    use modelflow_state::RunStatus;

    fn write_registry(dir: &Path, records: &[ModelPackageRecord]) -> PathBuf {
        let path = dir.join("registry.json");
        std::fs::write(&path, serde_json::to_string(records).unwrap()).unwrap();
        path
    }

    fn record(arn: &str, secs: i64, status: ApprovalStatus) -> ModelPackageRecord {
        ModelPackageRecord {
            arn: arn.to_string(),
            group_name: "churn-models".to_string(),
            creation_time: Utc.timestamp_opt(secs, 0).unwrap(),
            approval_status: status,
            image_uri: format!("registry/xgboost:{}", secs),
            model_data_url: format!("s3://ml-artifacts/models/{}/model.tar.gz", secs),
        }
    }

    fn args(group: &str) -> ConfigArgs {
        ConfigArgs {
            bucket: Some("ml-artifacts".to_string()),
            group: Some(group.to_string()),
            ..ConfigArgs::default()
        }
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "modelflow",
            "--verbose",
            "run",
            "--registry",
            "registry.json",
            "--bucket",
            "ml-artifacts",
            "--group",
            "churn-models",
            "--timeout-secs",
            "30",
            "--batch-data",
            "s3://elsewhere/in",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                config, batch_data, ..
            } => {
                assert_eq!(config.timeout_secs, Some(30));
                assert_eq!(batch_data.as_deref(), Some("s3://elsewhere/in"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_resolve_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelflow.toml");
        std::fs::write(
            &path,
            "bucket = \"from-file\"\nmodel_package_group = \"file-group\"\ncallback_timeout_secs = 120\n",
        )
        .unwrap();

        let config = resolve_config(&ConfigArgs {
            config: Some(path),
            group: Some("flag-group".to_string()),
            ..ConfigArgs::default()
        })
        .unwrap();
        assert_eq!(config.bucket, "from-file");
        assert_eq!(config.model_package_group, "flag-group");
        assert_eq!(config.callback_timeout_secs, 120);
    }

    #[test]
    fn test_resolve_config_flag_fills_bucket_missing_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelflow.toml");
        std::fs::write(&path, "model_package_group = \"file-group\"\n").unwrap();

        let config = resolve_config(&ConfigArgs {
            config: Some(path.clone()),
            bucket: Some("flag-bucket".to_string()),
            ..ConfigArgs::default()
        })
        .unwrap();
        assert_eq!(config.bucket, "flag-bucket");
        assert_eq!(config.model_package_group, "file-group");

        let err = resolve_config(&ConfigArgs {
            config: Some(path),
            ..ConfigArgs::default()
        })
        .unwrap_err();
        assert!(format!("{:#}", err).contains("bucket is empty"));
    }

    #[test]
    fn test_resolve_config_rejects_zero_timeout() {
        let err = resolve_config(&ConfigArgs {
            timeout_secs: Some(0),
            ..args("churn-models")
        })
        .unwrap_err();
        assert!(format!("{:#}", err).contains("callback_timeout_secs"));
    }

    #[tokio::test]
    async fn test_select_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = write_registry(
            dir.path(),
            &[
                record("A", 10, ApprovalStatus::Approved),
                record("B", 20, ApprovalStatus::Rejected),
                record("C", 15, ApprovalStatus::Approved),
            ],
        );

        let selected = select_from_file(&registry, "churn-models").await.unwrap();
        assert_eq!(selected.arn, "C");

        let err = select_from_file(&registry, "fraud-models").await.unwrap_err();
        assert!(format!("{:#}", err).contains("fraud-models"));
    }

    #[tokio::test]
    async fn test_run_dry_completes_and_exports_events() {
        let dir = tempfile::tempdir().unwrap();
        let registry = write_registry(dir.path(), &[record("A", 10, ApprovalStatus::Approved)]);

        let (result, events) = run_dry(
            &registry,
            &args("churn-models"),
            Some("s3://elsewhere/in"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(RunVerdict::evaluate(&events).passed);

        let path = dir.path().join("events.json");
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();
        assert_eq!(load_events(&path).unwrap().len(), events.len());
        assert!(cmd_verdict(&path).is_ok());
    }

    #[test]
    fn test_verdict_rejects_empty_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, "[]").unwrap();

        let err = cmd_verdict(&path).unwrap_err();
        assert!(err.to_string().contains("violation"));
    }

    #[tokio::test]
    async fn test_run_dry_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = write_registry(dir.path(), &[record("A", 10, ApprovalStatus::Rejected)]);

        let (result, events) = run_dry(
            &registry,
            &args("churn-models"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_node().unwrap().node, FETCH_NODE);
        assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));

        let path = dir.path().join("events.json");
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();
        assert!(cmd_verdict(&path).is_err());
    }

    #[test]
    fn test_definition_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("definition.json");
        cmd_definition(&args("churn-models"), Some(&path)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let definition: PipelineDefinition = serde_json::from_str(&raw).unwrap();
        assert_eq!(definition.nodes.len(), 3);
        assert_eq!(definition.parameters[0].name, BATCH_DATA_PARAM);
    }
}
