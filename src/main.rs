//! # Kafka Perf Sweep - Main Entry Point
//!
//! Dispatches the three subcommands:
//!
//! - `run`: load the specification and connection config, pick the real or
//!   mock driver, execute the sweep and (unless `--no-report`) write reports
//! - `report`: regenerate reports for an existing run directory
//! - `cleanup`: delete leftover test topics matching a glob
//!
//! Configuration and environment problems abort before any test case runs
//! and exit non-zero; failures inside a test case are recorded in its result
//! and the sweep continues.

use anyhow::{bail, Context, Result};
use clap::Parser;
use kafka_perf_sweep::{
    cli::{CleanupArgs, Cli, Command, ReportArgs, RunArgs},
    compare,
    driver::ClusterDriver,
    logging::init_logging,
    report::{self, ReportOptions},
    utils::{generate_run_tag, glob_to_regex, sanitize_resource_name},
    ConnectionConfig, ExecutorSettings, KafkaCliDriver, MockDriver, ResultsManager,
    RunnerSettings, SweepRunner, TestCaseExecutor, TestSpecification,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(2);
        }
    };

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Report(args) => report_command(args),
        Command::Cleanup(args) => cleanup(args).await,
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        // Flush the file writer before exiting.
        drop(guard);
        std::process::exit(1);
    }
    drop(guard);
}

fn load_connection_config(path: Option<&Path>) -> Result<ConnectionConfig> {
    match path {
        Some(path) => ConnectionConfig::from_file(path)
            .with_context(|| format!("Failed to load connection config {}", path.display())),
        None => Ok(ConnectionConfig::default()),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!("Starting Kafka Perf Sweep v{}", kafka_perf_sweep::VERSION);

    let spec = TestSpecification::from_file(&args.spec)
        .with_context(|| format!("Failed to load test specification {}", args.spec.display()))?;
    let config = load_connection_config(args.config.as_deref())?;

    let driver: Arc<dyn ClusterDriver> = if args.mock {
        warn!("Mock mode: no cluster will be contacted, all results are synthetic");
        Arc::new(MockDriver::new(args.mock_profile()))
    } else {
        Arc::new(KafkaCliDriver::new(config)?)
    };
    info!("Cluster driver: {}", driver.name());

    if args.skip_env_check {
        warn!("Skipping environment check");
    } else {
        driver
            .check_environment()
            .await
            .context("Environment check failed")?;
    }

    let test_name = sanitize_resource_name(&args.resolved_test_name());
    let run_dir = args.output_dir.join(&test_name);
    let results = ResultsManager::new(&run_dir)?;
    info!("Writing results to {}", run_dir.display());

    let executor = TestCaseExecutor::new(
        driver,
        ExecutorSettings {
            run_dir: run_dir.clone(),
            run_tag: generate_run_tag(),
            process_grace: args.process_grace,
            topic_settle: args.topic_settle,
        },
    );
    let settings = RunnerSettings {
        test_name: test_name.clone(),
        axis_mode: args.axis_mode,
        inter_test_pause: args.inter_test_pause,
        mock: args.mock,
    };

    let outcome = SweepRunner::new(spec, executor, results, settings).run().await?;
    info!(
        "{} of {} combinations executed ({} failed, {} skipped)",
        outcome.executed,
        outcome.total_combinations,
        outcome.failed,
        outcome.skipped.len()
    );

    if args.no_report {
        return Ok(());
    }
    if outcome.executed == 0 {
        warn!("No test cases were executed; skipping report generation");
        return Ok(());
    }

    let options = ReportOptions {
        output_dir: outcome.run_dir.join("reports"),
        test_name,
        text: true,
        csv: true,
        plots: true,
    };
    report::generate_for_run(&outcome.run_dir, &options)?;
    Ok(())
}

fn report_command(args: ReportArgs) -> Result<()> {
    if !args.compare.is_empty() {
        return compare_command(&args);
    }

    let run_dir: PathBuf = match &args.test_name {
        Some(name) => args.results_dir.join(name),
        None => ResultsManager::latest_run_dir(&args.results_dir)?,
    };
    if !run_dir.is_dir() {
        bail!("Run directory {} does not exist", run_dir.display());
    }

    let test_name = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let options = ReportOptions {
        output_dir: args
            .output_dir
            .clone()
            .unwrap_or_else(|| run_dir.join("reports")),
        test_name,
        text: !args.no_report,
        csv: !args.no_csv,
        plots: !args.no_plots,
    };

    let artifacts = report::generate_for_run(&run_dir, &options)?;
    for path in &artifacts.written {
        info!("  {}", path.display());
    }
    Ok(())
}

fn compare_command(args: &ReportArgs) -> Result<()> {
    let run_dirs: Vec<PathBuf> = args
        .compare
        .iter()
        .map(|run| compare::resolve_run_dir(&args.results_dir, run))
        .collect();
    for run_dir in &run_dirs {
        if !run_dir.is_dir() {
            bail!("Run directory {} does not exist", run_dir.display());
        }
    }

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.results_dir.join("comparison"));
    let artifacts = compare::generate_comparison(&run_dirs, &output_dir, !args.no_plots)?;
    for path in &artifacts.written {
        info!("  {}", path.display());
    }
    Ok(())
}

async fn cleanup(args: CleanupArgs) -> Result<()> {
    let config = load_connection_config(args.config.as_deref())?;
    let driver = KafkaCliDriver::new(config)?;
    let matcher = glob_to_regex(&args.pattern)?;

    let topics: Vec<String> = driver
        .list_topics()
        .await?
        .into_iter()
        .filter(|t| matcher.is_match(t))
        .collect();

    if topics.is_empty() {
        info!("No topics match '{}'", args.pattern);
        return Ok(());
    }

    info!("{} topics match '{}'", topics.len(), args.pattern);
    let mut failures = 0usize;
    for topic in &topics {
        if args.dry_run {
            info!("  would delete {}", topic);
            continue;
        }
        match driver.delete_topic(topic).await {
            Ok(()) => info!("  deleted {}", topic),
            Err(e) => {
                warn!("  {:#}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} topics could not be deleted", failures, topics.len());
    }
    Ok(())
}
