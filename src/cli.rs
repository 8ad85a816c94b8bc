use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::mock::MockProfile;
use crate::sweep::AxisMode;

/// Kafka Perf Sweep - run the Kafka performance tools across a parameter space
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true, help_heading = "Logging")]
    pub verbose: u8,

    /// Only print warnings and errors
    #[clap(short = 'q', long, global = true, conflicts_with = "verbose", help_heading = "Logging")]
    pub quiet: bool,

    /// Also write plain-text logs to this file
    #[clap(long, global = true, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a parameter sweep and persist one result per test case
    Run(RunArgs),

    /// Generate the text report, CSV files and charts for a finished sweep
    Report(ReportArgs),

    /// Delete leftover test topics from the cluster
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON test specification
    #[clap(long, help_heading = "Core Options")]
    pub spec: PathBuf,

    /// YAML connection config (Kafka home, bootstrap servers, security)
    #[clap(long, help_heading = "Core Options")]
    pub config: Option<PathBuf>,

    /// Name of the run directory under the output directory
    #[clap(long, help_heading = "Core Options")]
    pub test_name: Option<String>,

    /// Directory holding one sub-directory per sweep
    #[clap(long, default_value = crate::defaults::RESULTS_DIR, help_heading = "Core Options")]
    pub output_dir: PathBuf,

    /// Which axes participate in the cartesian product
    #[clap(long, value_enum, default_value_t = AxisMode::Full, help_heading = "Core Options")]
    pub axis_mode: AxisMode,

    /// Generate synthetic logs instead of contacting a cluster
    #[clap(long, alias = "debug", help_heading = "Mock Data")]
    pub mock: bool,

    /// Seed for the synthetic logs
    #[clap(long, default_value_t = crate::defaults::MOCK_SEED, help_heading = "Mock Data")]
    pub mock_seed: u64,

    /// Requested throughput at which the synthetic cluster saturates
    #[clap(long, default_value_t = crate::defaults::MOCK_KNEE_MB_PER_SEC, help_heading = "Mock Data")]
    pub mock_knee_mb_per_sec: f64,

    /// Achieved/requested throughput of a saturated synthetic cluster
    #[clap(long, default_value_t = crate::defaults::MOCK_SATURATED_RATIO, help_heading = "Mock Data")]
    pub mock_saturated_ratio: f64,

    /// Pause between consecutive test cases (e.g. "10s", "500ms")
    #[clap(long, value_parser = parse_duration, default_value = "10s", help_heading = "Timing")]
    pub inter_test_pause: Duration,

    /// Pause between topic creation and client launch
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Timing")]
    pub topic_settle: Duration,

    /// Time a client may run past the test duration before it is killed
    #[clap(long, value_parser = parse_duration, default_value = "120s", help_heading = "Timing")]
    pub process_grace: Duration,

    /// Do not verify the Kafka scripts and cluster before starting
    #[clap(long, default_value_t = false)]
    pub skip_env_check: bool,

    /// Do not generate reports after the sweep
    #[clap(long, default_value_t = false)]
    pub no_report: bool,
}

impl RunArgs {
    pub fn mock_profile(&self) -> MockProfile {
        MockProfile {
            seed: self.mock_seed,
            knee_mb_per_sec: self.mock_knee_mb_per_sec,
            saturated_ratio: self.mock_saturated_ratio,
        }
    }

    /// Explicit test name, or one derived from the spec file and the clock
    pub fn resolved_test_name(&self) -> String {
        match &self.test_name {
            Some(name) => name.clone(),
            None => {
                let stem = self
                    .spec
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "sweep".to_string());
                format!("{}-{}", stem, chrono::Local::now().format("%Y%m%d-%H%M%S"))
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Run directory name; the most recently modified one when omitted
    #[clap(long)]
    pub test_name: Option<String>,

    /// Directory holding one sub-directory per sweep
    #[clap(long, default_value = crate::defaults::RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Where to write the reports (default: <run dir>/reports)
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    /// Skip the SVG charts
    #[clap(long, default_value_t = false)]
    pub no_plots: bool,

    /// Skip the text summary
    #[clap(long, default_value_t = false)]
    pub no_report: bool,

    /// Skip the CSV files
    #[clap(long, default_value_t = false)]
    pub no_csv: bool,

    /// Compare several runs instead of reporting on one (paths or run names)
    #[clap(long, num_args = 2.., value_name = "RUN_DIR", conflicts_with = "test_name")]
    pub compare: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// YAML connection config
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Glob selecting the topics to delete
    #[clap(long, default_value = crate::defaults::CLEANUP_PATTERN)]
    pub pattern: String,

    /// List matching topics without deleting them
    #[clap(long, default_value_t = false)]
    pub dry_run: bool,
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_secs_f64(num / 1000.0),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
