//! Persistence of test results and their cross-case aggregation.
//!
//! A [`TestResult`] is written as soon as its test case finishes and is the
//! permanent record of the sweep. Everything the report shows is rebuilt
//! from those files by [`AggregatedReport::build`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::driver::ProcessOutcome;
use crate::metrics::{CaseSummary, ConsumerMetrics, ProducerMetrics};
use crate::parser::{parse_consumer_log, parse_producer_log};
use crate::sweep::{ConfigurationKey, ParameterCombination};
use crate::utils::calculate_stats;

/// Suffix of every per-test result file
pub const RESULT_FILE_SUFFIX: &str = "-result.json";

/// Name of the run-level summary file
pub const SWEEP_SUMMARY_FILE: &str = "sweep_summary.json";

/// Outcome of a whole test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TestStatus {
    Completed,
    Failed { reason: String },
}

impl TestStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TestStatus::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestStatus::Completed => "completed",
            TestStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRun {
    pub index: u32,
    /// Relative to the run directory
    pub log_file: PathBuf,
    pub outcome: ProcessOutcome,
    pub metrics: ProducerMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRun {
    pub group_index: u32,
    pub member_index: u32,
    pub group_id: String,
    /// Relative to the run directory
    pub log_file: PathBuf,
    pub outcome: ProcessOutcome,
    pub metrics: ConsumerMetrics,
}

/// Everything known about one executed combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub run_tag: String,
    pub topic: String,
    pub combination: ParameterCombination,
    pub status: TestStatus,
    /// Set when the metrics were fabricated by the mock driver
    pub mock: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub producers: Vec<ProducerRun>,
    pub consumers: Vec<ConsumerRun>,
    pub summary: CaseSummary,
}

impl TestResult {
    pub fn new(
        test_id: String,
        run_tag: String,
        topic: String,
        combination: ParameterCombination,
        mock: bool,
    ) -> Self {
        let summary = CaseSummary {
            requested_mb_per_sec: combination.expected_mb_per_sec(),
            ..CaseSummary::default()
        };
        Self {
            test_id,
            run_tag,
            topic,
            combination,
            status: TestStatus::Completed,
            mock,
            started_at: Utc::now(),
            finished_at: None,
            producers: Vec::new(),
            consumers: Vec::new(),
            summary,
        }
    }

    pub fn file_name(test_id: &str) -> String {
        format!("{}{}", test_id, RESULT_FILE_SUFFIX)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TestStatus::Failed {
            reason: reason.into(),
        };
        self.finished_at = Some(Utc::now());
    }

    /// Parse every referenced log again, relative to `run_dir`
    pub fn reparse(&self, run_dir: &Path) -> (Vec<ProducerMetrics>, Vec<ConsumerMetrics>) {
        let producers = self
            .producers
            .iter()
            .map(|run| parse_producer_log(&run_dir.join(&run.log_file)))
            .collect();
        let consumers = self
            .consumers
            .iter()
            .map(|run| parse_consumer_log(&run_dir.join(&run.log_file)))
            .collect();
        (producers, consumers)
    }

    /// Parse all logs and compute the case summary
    pub fn finalize(&mut self, run_dir: &Path) {
        let (producer_metrics, consumer_metrics) = self.reparse(run_dir);
        for (run, metrics) in self.producers.iter_mut().zip(producer_metrics) {
            run.metrics = metrics;
        }
        for (run, metrics) in self.consumers.iter_mut().zip(consumer_metrics) {
            run.metrics = metrics;
        }

        let failed_processes = self
            .producers
            .iter()
            .map(|r| &r.outcome)
            .chain(self.consumers.iter().map(|r| &r.outcome))
            .filter(|o| !o.is_success())
            .count();

        let producers: Vec<ProducerMetrics> =
            self.producers.iter().map(|r| r.metrics.clone()).collect();
        let consumers: Vec<ConsumerMetrics> =
            self.consumers.iter().map(|r| r.metrics.clone()).collect();
        self.summary = CaseSummary::from_metrics(
            self.combination.expected_mb_per_sec(),
            &producers,
            &consumers,
            failed_processes,
        );
        self.finished_at = Some(Utc::now());
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub memory_gb: f64,
    pub rust_version: String,
    pub tool_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            memory_gb: crate::utils::get_total_memory_bytes() as f64 / (1024.0 * 1024.0 * 1024.0),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

/// A combination the skip condition ruled out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCase {
    pub configuration: ConfigurationKey,
    pub throughput_mb_per_sec: f64,
}

/// Run-level bookkeeping written next to the per-test results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub version: String,
    pub test_name: String,
    pub run_tag: String,
    pub mock: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_combinations: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: Vec<SkippedCase>,
    pub system_info: SystemInfo,
}

/// Writes results into a run directory as they arrive
pub struct ResultsManager {
    run_dir: PathBuf,
    results: Vec<TestResult>,
}

impl ResultsManager {
    /// Create the run directory if needed
    pub fn new(run_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(run_dir)
            .with_context(|| format!("Failed to create results directory {}", run_dir.display()))?;
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            results: Vec::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Persist one result as `<test_id>-result.json`
    pub fn add_result(&mut self, result: TestResult) -> Result<PathBuf> {
        let path = self.run_dir.join(TestResult::file_name(&result.test_id));
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved {}", path.display());
        self.results.push(result);
        Ok(path)
    }

    /// Write `sweep_summary.json`
    pub fn finalize(&self, summary: &SweepSummary) -> Result<PathBuf> {
        let path = self.run_dir.join(SWEEP_SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Results written to: {}", self.run_dir.display());
        Ok(path)
    }

    /// Load every `*-result.json` in a run directory, ordered by test id
    ///
    /// Files that do not deserialize are skipped with a warning.
    pub fn load_results(run_dir: &Path) -> Result<Vec<TestResult>> {
        let entries = std::fs::read_dir(run_dir)
            .with_context(|| format!("Failed to read results directory {}", run_dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.ends_with(RESULT_FILE_SUFFIX))
            })
            .collect();
        paths.sort();

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let loaded = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| serde_json::from_str::<TestResult>(&text).map_err(anyhow::Error::from));
            match loaded {
                Ok(result) => results.push(result),
                Err(e) => warn!("Skipping unreadable result {}: {}", path.display(), e),
            }
        }
        Ok(results)
    }

    /// Most recently modified run directory under `results_dir`
    pub fn latest_run_dir(results_dir: &Path) -> Result<PathBuf> {
        let entries = std::fs::read_dir(results_dir)
            .with_context(|| format!("Failed to read {}", results_dir.display()))?;
        let latest = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, e.path()))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        match latest {
            Some((_, path)) => Ok(path),
            None => bail!("No test runs found in {}", results_dir.display()),
        }
    }
}

/// Mean, spread and range of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let (mean, min, max, std_dev) = calculate_stats(values);
        Some(Self {
            count: values.len(),
            mean,
            std_dev,
            min,
            max,
        })
    }

    pub fn from_present<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<Self> {
        let present: Vec<f64> = values.into_iter().flatten().collect();
        Self::from_values(&present)
    }
}

/// One producer process, flattened for tables and charts
#[derive(Debug, Clone, Serialize)]
pub struct ProducerRow {
    pub test_id: String,
    pub configured_mb_per_sec: f64,
    pub key: ConfigurationKey,
    pub producer_props: String,
    pub producer_index: u32,
    pub outcome: String,
    pub metrics: ProducerMetrics,
}

/// One consumer process, flattened for tables and charts
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerRow {
    pub test_id: String,
    pub configured_mb_per_sec: f64,
    pub key: ConfigurationKey,
    pub group_index: u32,
    pub member_index: u32,
    pub group_id: String,
    pub outcome: String,
    pub metrics: ConsumerMetrics,
}

/// One test case
#[derive(Debug, Clone, Serialize)]
pub struct CaseRow {
    pub test_id: String,
    pub configured_mb_per_sec: f64,
    pub key: ConfigurationKey,
    pub producer_props: String,
    pub consumer_props: String,
    pub status: TestStatus,
    pub mock: bool,
    pub summary: CaseSummary,
}

/// All cases sharing everything but throughput, ordered by throughput
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationGroup {
    pub key: ConfigurationKey,
    pub producer_props: String,
    pub consumer_props: String,
    pub cases: Vec<CaseRow>,
}

/// All producers that ran at one configured throughput
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputTier {
    pub configured_mb_per_sec: f64,
    pub cases: usize,
    pub producer_mb_per_sec: Option<SeriesStats>,
    pub avg_latency_ms: Option<SeriesStats>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub p999_latency_ms: Option<f64>,
    /// Mean of the per-case sent/requested ratios
    pub efficiency: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    pub tests: usize,
    pub completed: usize,
    pub failed: usize,
    pub mock_tests: usize,
    pub producer_processes: usize,
    pub consumer_processes: usize,
    pub failed_processes: usize,
}

/// Read-only view over a set of persisted results
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedReport {
    pub totals: Totals,
    pub producers: Vec<ProducerRow>,
    pub consumers: Vec<ConsumerRow>,
    pub cases: Vec<CaseRow>,
    pub groups: Vec<ConfigurationGroup>,
    pub tiers: Vec<ThroughputTier>,
}

impl AggregatedReport {
    pub fn build(results: &[TestResult]) -> Self {
        let mut totals = Totals::default();
        let mut producers = Vec::new();
        let mut consumers = Vec::new();
        let mut cases = Vec::new();

        for result in results {
            let key = result.combination.configuration_key();
            let configured = result.combination.throughput_mb_per_sec;

            totals.tests += 1;
            if result.status.is_completed() {
                totals.completed += 1;
            } else {
                totals.failed += 1;
            }
            if result.mock {
                totals.mock_tests += 1;
            }
            totals.producer_processes += result.producers.len();
            totals.consumer_processes += result.consumers.len();
            totals.failed_processes += result.summary.failed_processes;

            for run in &result.producers {
                producers.push(ProducerRow {
                    test_id: result.test_id.clone(),
                    configured_mb_per_sec: configured,
                    key: key.clone(),
                    producer_props: result.combination.client_props.producer.clone(),
                    producer_index: run.index,
                    outcome: run.outcome.describe(),
                    metrics: run.metrics.clone(),
                });
            }
            for run in &result.consumers {
                consumers.push(ConsumerRow {
                    test_id: result.test_id.clone(),
                    configured_mb_per_sec: configured,
                    key: key.clone(),
                    group_index: run.group_index,
                    member_index: run.member_index,
                    group_id: run.group_id.clone(),
                    outcome: run.outcome.describe(),
                    metrics: run.metrics.clone(),
                });
            }
            cases.push(CaseRow {
                test_id: result.test_id.clone(),
                configured_mb_per_sec: configured,
                key,
                producer_props: result.combination.client_props.producer.clone(),
                consumer_props: result.combination.client_props.consumer.clone(),
                status: result.status.clone(),
                mock: result.mock,
                summary: result.summary.clone(),
            });
        }

        let groups = Self::group_by_configuration(&cases);
        let tiers = Self::tiers(&cases, &producers);

        Self {
            totals,
            producers,
            consumers,
            cases,
            groups,
            tiers,
        }
    }

    fn group_by_configuration(cases: &[CaseRow]) -> Vec<ConfigurationGroup> {
        let mut grouped: BTreeMap<ConfigurationKey, Vec<CaseRow>> = BTreeMap::new();
        for case in cases {
            grouped.entry(case.key.clone()).or_default().push(case.clone());
        }
        grouped
            .into_iter()
            .map(|(key, mut cases)| {
                cases.sort_by(|a, b| a.configured_mb_per_sec.total_cmp(&b.configured_mb_per_sec));
                ConfigurationGroup {
                    producer_props: cases[0].producer_props.clone(),
                    consumer_props: cases[0].consumer_props.clone(),
                    key,
                    cases,
                }
            })
            .collect()
    }

    fn tiers(cases: &[CaseRow], producers: &[ProducerRow]) -> Vec<ThroughputTier> {
        let mut levels: Vec<f64> = cases.iter().map(|c| c.configured_mb_per_sec).collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup();

        levels
            .into_iter()
            .map(|level| {
                let tier_cases: Vec<&CaseRow> = cases
                    .iter()
                    .filter(|c| c.configured_mb_per_sec == level)
                    .collect();
                let tier_producers: Vec<&ProducerMetrics> = producers
                    .iter()
                    .filter(|p| p.configured_mb_per_sec == level)
                    .map(|p| &p.metrics)
                    .collect();
                let mean = |f: fn(&ProducerMetrics) -> Option<f64>| {
                    crate::utils::mean_of_present(tier_producers.iter().map(|m| f(m)))
                };

                ThroughputTier {
                    configured_mb_per_sec: level,
                    cases: tier_cases.len(),
                    producer_mb_per_sec: SeriesStats::from_present(
                        tier_producers.iter().map(|m| m.mb_per_sec),
                    ),
                    avg_latency_ms: SeriesStats::from_present(
                        tier_producers.iter().map(|m| m.avg_latency_ms),
                    ),
                    p50_latency_ms: mean(|m| m.p50_latency_ms),
                    p95_latency_ms: mean(|m| m.p95_latency_ms),
                    p99_latency_ms: mean(|m| m.p99_latency_ms),
                    p999_latency_ms: mean(|m| m.p999_latency_ms),
                    efficiency: crate::utils::mean_of_present(
                        tier_cases.iter().map(|c| c.summary.sent_div_requested_mb_per_sec),
                    ),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TestSpecification;
    use crate::sweep::{enumerate, AxisMode};
    use tempfile::TempDir;

    fn combinations() -> Vec<ParameterCombination> {
        let spec = TestSpecification::from_json_str(
            r#"{"cluster_throughput_mb_per_sec": [10, 20], "num_producers": [1, 2]}"#,
        )
        .unwrap();
        enumerate(&spec, AxisMode::Full)
    }

    fn result_with_log(dir: &Path, id: &str, combination: ParameterCombination, log: &str) -> TestResult {
        let mut result = TestResult::new(
            id.to_string(),
            "abcd1234".to_string(),
            format!("perf-abcd1234-{}", id),
            combination,
            true,
        );
        let log_file = PathBuf::from(format!("{}-producer-0.log", id));
        std::fs::write(dir.join(&log_file), log).unwrap();
        result.producers.push(ProducerRun {
            index: 0,
            log_file,
            outcome: ProcessOutcome::Exited {
                exit_code: Some(0),
                elapsed_sec: 1.0,
            },
            metrics: ProducerMetrics::default(),
        });
        result.finalize(dir);
        result
    }

    const LOG: &str = "1000 records sent, 100.0 records/sec (9.50 MB/sec), 3.00 ms avg latency, 20.00 ms max latency, 2 ms 50th, 5 ms 95th, 9 ms 99th, 15 ms 99.9th.\n";

    #[test]
    fn test_finalize_parses_logs() {
        let dir = TempDir::new().unwrap();
        let result = result_with_log(dir.path(), "t0001", combinations().remove(0), LOG);
        assert_eq!(result.producers[0].metrics.mb_per_sec, Some(9.5));
        assert_eq!(result.summary.producer_mb_per_sec, Some(9.5));
        assert_eq!(result.summary.sent_div_requested_mb_per_sec, Some(0.95));
        assert_eq!(result.summary.failed_processes, 0);
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut manager = ResultsManager::new(dir.path()).unwrap();
        let result = result_with_log(dir.path(), "t0001", combinations().remove(0), LOG);
        let path = manager.add_result(result.clone()).unwrap();
        assert!(path.ends_with("t0001-result.json"));

        let loaded = ResultsManager::load_results(dir.path()).unwrap();
        assert_eq!(loaded, vec![result.clone()]);

        let (producers, _) = loaded[0].reparse(dir.path());
        assert_eq!(producers[0], result.producers[0].metrics);
    }

    #[test]
    fn test_load_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t0009-result.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        assert!(ResultsManager::load_results(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_latest_run_dir() {
        let dir = TempDir::new().unwrap();
        assert!(ResultsManager::latest_run_dir(dir.path()).is_err());
        std::fs::create_dir(dir.path().join("run-a")).unwrap();
        assert_eq!(
            ResultsManager::latest_run_dir(dir.path()).unwrap(),
            dir.path().join("run-a")
        );
    }

    #[test]
    fn test_aggregation_groups_and_tiers() {
        let dir = TempDir::new().unwrap();
        let results: Vec<TestResult> = combinations()
            .into_iter()
            .enumerate()
            .map(|(i, c)| result_with_log(dir.path(), &format!("t{:04}", i + 1), c, LOG))
            .collect();

        let report = AggregatedReport::build(&results);
        assert_eq!(report.totals.tests, 4);
        assert_eq!(report.totals.completed, 4);
        assert_eq!(report.cases.len(), 4);
        assert_eq!(report.groups.len(), 2);
        for group in &report.groups {
            let throughputs: Vec<f64> = group.cases.iter().map(|c| c.configured_mb_per_sec).collect();
            assert_eq!(throughputs, vec![10.0, 20.0]);
        }
        assert_eq!(report.tiers.len(), 2);
        assert_eq!(report.tiers[0].configured_mb_per_sec, 10.0);
        assert_eq!(report.tiers[0].cases, 2);
        assert_eq!(report.tiers[0].p99_latency_ms, Some(9.0));
    }

    #[test]
    fn test_failed_case_is_counted() {
        let mut result = TestResult::new(
            "t0001".to_string(),
            "tag".to_string(),
            "perf-x".to_string(),
            combinations().remove(0),
            false,
        );
        result.mark_failed("topic creation failed");
        let report = AggregatedReport::build(&[result]);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.tiers[0].efficiency, None);
    }
}
