//! # Kafka Perf Sweep Library
//!
//! A parameter-sweep harness around the Apache Kafka performance tools
//! (`kafka-producer-perf-test.sh`, `kafka-consumer-perf-test.sh`). A JSON
//! test specification names a set of values per axis; the harness runs one
//! test case per point of their cartesian product, collects the tools' output
//! and turns it into persisted results, a text report, CSV files and charts.
//!
//! ## Architecture Overview
//!
//! - `spec`: loading and validating the test specification
//! - `sweep`: enumerating parameter combinations and deriving record rates
//! - `skip`: the early-termination rule for saturated configurations
//! - `driver`: the `ClusterDriver` seam and the Kafka CLI implementation
//! - `mock`: a deterministic driver that writes synthetic tool output
//! - `executor`: one test case (topic, producers, consumers, teardown)
//! - `runner`: the sequential sweep loop
//! - `parser` / `metrics`: reading tool output into typed metrics
//! - `results`: persistence and cross-case aggregation
//! - `report` / `chart`: text, CSV and SVG artifacts
//! - `config`, `cli`, `logging`, `utils`: the ambient plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kafka_perf_sweep::{
//!     AxisMode, ExecutorSettings, MockDriver, MockProfile, ResultsManager, RunnerSettings,
//!     SweepRunner, TestCaseExecutor, TestSpecification,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let spec = TestSpecification::from_file("sweep.json")?;
//!     let results = ResultsManager::new(Path::new("results/demo"))?;
//!     let executor = TestCaseExecutor::new(
//!         Arc::new(MockDriver::new(MockProfile::default())),
//!         ExecutorSettings {
//!             run_dir: results.run_dir().to_path_buf(),
//!             run_tag: "demo".to_string(),
//!             process_grace: Duration::from_secs(120),
//!             topic_settle: Duration::ZERO,
//!         },
//!     );
//!     let settings = RunnerSettings {
//!         test_name: "demo".to_string(),
//!         axis_mode: AxisMode::Full,
//!         inter_test_pause: Duration::ZERO,
//!         mock: true,
//!     };
//!     let outcome = SweepRunner::new(spec, executor, results, settings).run().await?;
//!     println!("{} cases executed", outcome.executed);
//!     Ok(())
//! }
//! ```

pub mod chart;

/// Command-line interface
///
/// Subcommands `run`, `report` (optionally `--compare` across runs) and `cleanup`,
/// plus human-readable duration parsing ("10s", "500ms", "5m").
pub mod cli;

/// Cross-run comparison: throughput, scaling efficiency and limits per run
pub mod compare;

/// YAML connection config and Kafka `.properties` rendering
pub mod config;

/// The cluster seam
///
/// `ClusterDriver` is the only place that touches Kafka. The real
/// implementation shells out to the Kafka scripts with a watchdog per
/// process; the mock implementation lives in `mock`.
pub mod driver;

pub mod executor;
pub mod logging;

/// Typed producer/consumer metrics and the per-case summary
pub mod metrics;

pub mod mock;

/// Parsers for the Kafka perf tools' output
///
/// Every field is extracted independently; anything missing or malformed
/// becomes `None` rather than an error.
pub mod parser;

pub mod report;

/// Result persistence and aggregation
///
/// One JSON document per test case, a sweep summary, and the cross-case
/// groupings the report is built from.
pub mod results;

pub mod runner;
pub mod skip;
pub mod spec;
pub mod sweep;
pub mod utils;

pub use config::ConnectionConfig;
pub use driver::{ClusterDriver, KafkaCliDriver, ProcessOutcome};
pub use executor::{ExecutorSettings, TestCaseExecutor};
pub use metrics::{CaseSummary, ConsumerMetrics, ProducerMetrics};
pub use mock::{MockDriver, MockProfile};
pub use results::{ResultsManager, TestResult, TestStatus};
pub use runner::{RunnerSettings, SweepOutcome, SweepRunner};
pub use skip::{SkipCondition, SkipTracker};
pub use spec::{SpecError, TestSpecification};
pub use sweep::{AxisMode, ParameterCombination};

/// The current version of the harness, recorded in every sweep summary
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Axis defaults apply when the test specification omits an axis; the rest
/// back the CLI flags.
pub mod defaults {
    use std::time::Duration;

    pub const NUM_PRODUCERS: u32 = 6;
    pub const NUM_PARTITIONS: u32 = 36;
    pub const REPLICATION_FACTOR: u32 = 3;
    pub const DURATION_SEC: u64 = 300;
    pub const RECORD_SIZE_BYTE: u64 = 1024;
    pub const CONSUMER_GROUP_SIZE: u32 = 6;

    /// Added to the test duration for the consumer's `--timeout`
    pub const CONSUMER_TIMEOUT_GRACE_MS: u64 = 10_000;

    /// Rough footprint of one perf-tool JVM, used for the pre-flight memory check
    pub const MEMORY_PER_CLIENT_BYTES: u64 = 256 * 1024 * 1024;

    pub const RESULTS_DIR: &str = "./results";
    pub const INTER_TEST_PAUSE: Duration = Duration::from_secs(10);
    pub const TOPIC_SETTLE: Duration = Duration::from_secs(5);

    /// Watchdog slack on top of the test duration
    pub const PROCESS_GRACE: Duration = Duration::from_secs(120);

    pub const MOCK_SEED: u64 = 42;
    pub const MOCK_KNEE_MB_PER_SEC: f64 = 200.0;
    pub const MOCK_SATURATED_RATIO: f64 = 0.80;

    pub const BOOTSTRAP_SERVERS: &str = "localhost:9092";
    pub const JAVA_HEAP_OPTS: &str = "-Xms1G -Xmx3584m";

    /// Topic glob for `cleanup`; every topic the harness creates starts with "perf-"
    pub const CLEANUP_PATTERN: &str = "perf-*";
}
