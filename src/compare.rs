//! # Cross-Run Comparison
//!
//! Compares several finished sweeps, typically the same specification run
//! against clusters of different sizes. Each run directory is reduced to a
//! [`RunProfile`] (peak and average producer throughput, the highest
//! throughput it sustained, p50 latency spread). The profiles are then
//! ranked and related to each other:
//!
//! - throughput relative to the first run (the baseline) and to the
//!   previous run
//! - scaling efficiency: the baseline-relative throughput divided by the
//!   baseline-relative producer count, in percent, where 100% is linear
//!   scaling
//!
//! The output is `comparison_summary.csv`, `comparison_summary.txt`,
//! `performance_limit_summary.json` and two SVG charts.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::chart::{Chart, ChartError, ChartKind, Series};
use crate::report::{csv_field, write_file, ReportArtifacts};
use crate::results::{ResultsManager, SeriesStats, TestResult};
use crate::utils::{format_mb_per_sec, format_optional};

pub const COMPARISON_CSV_FILE: &str = "comparison_summary.csv";
pub const COMPARISON_TEXT_FILE: &str = "comparison_summary.txt";
pub const LIMIT_SUMMARY_FILE: &str = "performance_limit_summary.json";
pub const THROUGHPUT_CHART_FILE: &str = "comparison_throughput.svg";
pub const SCALING_CHART_FILE: &str = "comparison_scaling_efficiency.svg";

/// Achieved/requested ratio at or above which a throughput counts as sustained
pub const SUSTAINED_RATIO: f64 = 0.95;

/// One run directory reduced to its headline numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunProfile {
    pub label: String,
    pub run_dir: PathBuf,
    pub tests: usize,
    pub completed: usize,
    /// Largest producer count of any test case
    pub max_producers: u32,
    pub max_mb_per_sec: Option<f64>,
    pub avg_mb_per_sec: Option<f64>,
    /// Highest configured throughput delivered at `SUSTAINED_RATIO` or better
    pub sustained_mb_per_sec: Option<f64>,
    pub p50_latency_ms: Option<SeriesStats>,
    pub throughput_vs_baseline: Option<f64>,
    pub throughput_vs_previous: Option<f64>,
    pub scaling_efficiency_pct: Option<f64>,
}

impl RunProfile {
    pub fn from_results(label: impl Into<String>, run_dir: &Path, results: &[TestResult]) -> Self {
        let throughputs: Vec<f64> = results
            .iter()
            .filter_map(|r| r.summary.producer_mb_per_sec)
            .collect();
        let throughput = SeriesStats::from_values(&throughputs);

        let sustained_mb_per_sec = results
            .iter()
            .filter(|r| r.status.is_completed())
            .filter(|r| {
                r.summary
                    .sent_div_requested_mb_per_sec
                    .map_or(false, |ratio| ratio >= SUSTAINED_RATIO)
            })
            .map(|r| r.combination.throughput_mb_per_sec)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

        Self {
            label: label.into(),
            run_dir: run_dir.to_path_buf(),
            tests: results.len(),
            completed: results.iter().filter(|r| r.status.is_completed()).count(),
            max_producers: results
                .iter()
                .map(|r| r.combination.num_producers)
                .max()
                .unwrap_or(0),
            max_mb_per_sec: throughput.map(|s| s.max),
            avg_mb_per_sec: throughput.map(|s| s.mean),
            sustained_mb_per_sec,
            p50_latency_ms: SeriesStats::from_present(
                results.iter().map(|r| r.summary.p50_latency_ms),
            ),
            throughput_vs_baseline: None,
            throughput_vs_previous: None,
            scaling_efficiency_pct: None,
        }
    }
}

/// Everything `performance_limit_summary.json` records
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceLimitSummary {
    pub generated_at: DateTime<Utc>,
    pub baseline: Option<String>,
    pub runs: Vec<RunProfile>,
    pub best_run: Option<String>,
    pub best_mb_per_sec: Option<f64>,
    /// Smallest and largest per-case p50 latency across all runs
    pub p50_range_ms: Option<(f64, f64)>,
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Relate the profiles to each other; the first one is the baseline
pub fn compare(mut runs: Vec<RunProfile>) -> PerformanceLimitSummary {
    let baseline = runs
        .first()
        .map(|r| (r.label.clone(), r.max_mb_per_sec, r.max_producers));

    let mut previous: Option<f64> = None;
    for run in runs.iter_mut() {
        if let Some((_, base_mb, base_producers)) = &baseline {
            run.throughput_vs_baseline = ratio(run.max_mb_per_sec, *base_mb);
            let producers_vs_baseline = ratio(
                Some(run.max_producers as f64),
                Some(*base_producers as f64),
            );
            run.scaling_efficiency_pct =
                ratio(run.throughput_vs_baseline, producers_vs_baseline).map(|e| e * 100.0);
        }
        run.throughput_vs_previous = ratio(run.max_mb_per_sec, previous);
        previous = run.max_mb_per_sec;
    }

    let best = runs
        .iter()
        .filter_map(|r| r.max_mb_per_sec.map(|mb| (r, mb)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let p50_range_ms = runs
        .iter()
        .filter_map(|r| r.p50_latency_ms)
        .fold(None, |acc: Option<(f64, f64)>, s| {
            Some(acc.map_or((s.min, s.max), |(lo, hi)| (lo.min(s.min), hi.max(s.max))))
        });

    PerformanceLimitSummary {
        generated_at: Utc::now(),
        baseline: baseline.map(|(label, _, _)| label),
        best_run: best.map(|(r, _)| r.label.clone()),
        best_mb_per_sec: best.map(|(_, mb)| mb),
        p50_range_ms,
        runs,
    }
}

/// Accept either a path or a run name under `results_dir`
pub fn resolve_run_dir(results_dir: &Path, run: &Path) -> PathBuf {
    if run.is_dir() {
        run.to_path_buf()
    } else {
        results_dir.join(run)
    }
}

/// Load and profile every run directory, in the given order
pub fn load_runs(run_dirs: &[PathBuf]) -> Result<Vec<RunProfile>> {
    let mut runs = Vec::with_capacity(run_dirs.len());
    for run_dir in run_dirs {
        let results = ResultsManager::load_results(run_dir)?;
        if results.is_empty() {
            bail!("No test results found in {}", run_dir.display());
        }
        let label = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| run_dir.display().to_string());
        info!("Loaded {} test results for '{}'", results.len(), label);
        runs.push(RunProfile::from_results(label, run_dir, &results));
    }
    Ok(runs)
}

pub fn comparison_csv(summary: &PerformanceLimitSummary) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "run,tests,completed,max_producers,max_mb_per_sec,avg_mb_per_sec,sustained_mb_per_sec,min_p50_latency_ms,avg_p50_latency_ms,max_p50_latency_ms,throughput_vs_baseline,throughput_vs_previous,scaling_efficiency_pct"
    )?;
    let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for run in &summary.runs {
        let p50 = run.p50_latency_ms;
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_field(&run.label),
            run.tests,
            run.completed,
            run.max_producers,
            cell(run.max_mb_per_sec),
            cell(run.avg_mb_per_sec),
            cell(run.sustained_mb_per_sec),
            cell(p50.map(|s| s.min)),
            cell(p50.map(|s| s.mean)),
            cell(p50.map(|s| s.max)),
            cell(run.throughput_vs_baseline),
            cell(run.throughput_vs_previous),
            cell(run.scaling_efficiency_pct),
        )?;
    }
    Ok(out)
}

pub fn render_comparison_text(summary: &PerformanceLimitSummary) -> Result<String, std::fmt::Error> {
    let rule = "=".repeat(80);
    let mut out = String::new();
    writeln!(out, "{}", rule)?;
    writeln!(out, "PERFORMANCE LIMIT ANALYSIS")?;
    writeln!(out, "{}", rule)?;
    if let Some(baseline) = &summary.baseline {
        writeln!(out, "Baseline: {}", baseline)?;
    }
    writeln!(out)?;

    for run in &summary.runs {
        let mb = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), format_mb_per_sec);
        writeln!(out, "{}", run.label)?;
        writeln!(out, "  Max throughput:       {}", mb(run.max_mb_per_sec))?;
        writeln!(out, "  Avg throughput:       {}", mb(run.avg_mb_per_sec))?;
        writeln!(out, "  Sustained throughput: {}", mb(run.sustained_mb_per_sec))?;
        writeln!(
            out,
            "  P50 latency:          {} ms",
            format_optional(run.p50_latency_ms.map(|s| s.mean), 1)
        )?;
        writeln!(out, "  Tests completed:      {} of {}", run.completed, run.tests)?;
        if let Some(step) = run.throughput_vs_previous {
            writeln!(out, "  vs previous run:      {:.2}x", step)?;
        }
        if let Some(efficiency) = run.scaling_efficiency_pct {
            writeln!(out, "  Scaling efficiency:   {:.1}%", efficiency)?;
        }
        writeln!(out)?;
    }

    if let (Some(best), Some(mb)) = (&summary.best_run, summary.best_mb_per_sec) {
        writeln!(out, "Best performance: {} ({})", best, format_mb_per_sec(mb))?;
    }
    if let Some((lo, hi)) = summary.p50_range_ms {
        writeln!(out, "P50 latency range: {:.1} - {:.1} ms", lo, hi)?;
    }
    Ok(out)
}

pub fn comparison_charts(summary: &PerformanceLimitSummary) -> Vec<(&'static str, Chart)> {
    let labels: Vec<String> = summary.runs.iter().map(|r| r.label.clone()).collect();
    let points = |field: fn(&RunProfile) -> Option<f64>| -> Vec<(f64, f64)> {
        summary
            .runs
            .iter()
            .enumerate()
            .filter_map(|(i, r)| field(r).map(|v| (i as f64, v)))
            .collect()
    };

    let throughput = Chart::new(
        "Throughput by Run",
        "Run",
        "Producer throughput (MB/sec)",
        ChartKind::Bar,
    )
    .with_categories(labels.clone())
    .with_series(Series::new("Maximum", points(|r| r.max_mb_per_sec)))
    .with_series(Series::new("Average", points(|r| r.avg_mb_per_sec)))
    .with_series(Series::new("Sustained", points(|r| r.sustained_mb_per_sec)));

    let scaling = Chart::new("Scaling Efficiency", "Run", "Efficiency (%)", ChartKind::Bar)
        .with_categories(labels)
        .with_series(Series::new("Efficiency", points(|r| r.scaling_efficiency_pct)))
        .with_reference(100.0, "Linear scaling");

    vec![(THROUGHPUT_CHART_FILE, throughput), (SCALING_CHART_FILE, scaling)]
}

/// Compare `run_dirs` and write the comparison artifacts into `output_dir`
pub fn generate_comparison(
    run_dirs: &[PathBuf],
    output_dir: &Path,
    plots: bool,
) -> Result<ReportArtifacts> {
    let summary = compare(load_runs(run_dirs)?);
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create comparison directory {}", output_dir.display())
    })?;

    let mut artifacts = ReportArtifacts::default();
    for (name, content) in [
        (COMPARISON_CSV_FILE, comparison_csv(&summary)?),
        (COMPARISON_TEXT_FILE, render_comparison_text(&summary)?),
        (LIMIT_SUMMARY_FILE, serde_json::to_string_pretty(&summary)?),
    ] {
        let path = output_dir.join(name);
        write_file(&path, &content)?;
        artifacts.written.push(path);
    }

    if plots {
        for (name, chart) in comparison_charts(&summary) {
            let path = output_dir.join(name);
            match chart.write_svg(&path) {
                Ok(()) => artifacts.written.push(path),
                Err(ChartError::NoData(_)) => {
                    warn!("Chart {} skipped: no data points", name);
                    artifacts
                        .skipped_charts
                        .push((name.to_string(), "no data points".to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    if let (Some(best), Some(mb)) = (&summary.best_run, summary.best_mb_per_sec) {
        info!("Best performance: {} at {}", best, format_mb_per_sec(mb));
    }
    info!(
        "Comparison of {} runs written to {}",
        summary.runs.len(),
        output_dir.display()
    );
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TestSpecification;
    use crate::sweep::{enumerate, AxisMode};

    /// Results for one run: `(throughput, producers, achieved MB/s, p50 ms)`
    fn run(cases: &[(f64, u32, Option<f64>, f64)]) -> Vec<TestResult> {
        cases
            .iter()
            .enumerate()
            .map(|(i, &(throughput, producers, achieved, p50))| {
                let spec = TestSpecification::from_value(serde_json::json!({
                    "cluster_throughput_mb_per_sec": [throughput],
                    "num_producers": [producers]
                }))
                .unwrap();
                let combination = enumerate(&spec, AxisMode::Full).remove(0);
                let mut result = TestResult::new(
                    format!("t{:04}", i + 1),
                    "tag".to_string(),
                    "perf-topic".to_string(),
                    combination,
                    true,
                );
                result.summary.producer_mb_per_sec = achieved;
                result.summary.sent_div_requested_mb_per_sec = achieved.map(|a| a / throughput);
                result.summary.p50_latency_ms = Some(p50);
                result
            })
            .collect()
    }

    fn profiles() -> Vec<RunProfile> {
        vec![
            RunProfile::from_results(
                "small",
                Path::new("results/small"),
                &run(&[(50.0, 3, Some(50.0), 2.0), (100.0, 3, Some(80.0), 9.0)]),
            ),
            RunProfile::from_results(
                "large",
                Path::new("results/large"),
                &run(&[(100.0, 6, Some(100.0), 3.0), (200.0, 6, Some(120.0), 12.0)]),
            ),
        ]
    }

    #[test]
    fn test_run_profile() {
        let small = &profiles()[0];
        assert_eq!(small.tests, 2);
        assert_eq!(small.max_producers, 3);
        assert_eq!(small.max_mb_per_sec, Some(80.0));
        assert_eq!(small.avg_mb_per_sec, Some(65.0));
        // 100 MB/s only reached 80%
        assert_eq!(small.sustained_mb_per_sec, Some(50.0));
        assert_eq!(small.p50_latency_ms.map(|s| (s.min, s.max)), Some((2.0, 9.0)));
    }

    #[test]
    fn test_compare_scaling() {
        let summary = compare(profiles());
        assert_eq!(summary.baseline.as_deref(), Some("small"));
        assert_eq!(summary.best_run.as_deref(), Some("large"));
        assert_eq!(summary.best_mb_per_sec, Some(120.0));
        assert_eq!(summary.p50_range_ms, Some((2.0, 12.0)));

        let small = &summary.runs[0];
        assert_eq!(small.throughput_vs_baseline, Some(1.0));
        assert_eq!(small.throughput_vs_previous, None);
        assert_eq!(small.scaling_efficiency_pct, Some(100.0));

        let large = &summary.runs[1];
        assert_eq!(large.throughput_vs_baseline, Some(1.5));
        assert_eq!(large.throughput_vs_previous, Some(1.5));
        // 1.5x the throughput from 2x the producers
        assert_eq!(large.scaling_efficiency_pct, Some(75.0));
    }

    #[test]
    fn test_run_without_producer_data() {
        let empty =
            RunProfile::from_results("broken", Path::new("x"), &run(&[(10.0, 1, None, 1.0)]));
        assert_eq!(empty.max_mb_per_sec, None);
        assert_eq!(empty.sustained_mb_per_sec, None);

        let summary = compare(vec![empty, profiles().remove(0)]);
        assert_eq!(summary.runs[1].throughput_vs_baseline, None);
        assert_eq!(summary.runs[1].scaling_efficiency_pct, None);
        assert_eq!(summary.best_run.as_deref(), Some("small"));

        let text = render_comparison_text(&summary).unwrap();
        assert!(text.contains("Max throughput:       n/a"));
        assert!(text.contains("Best performance: small (80.00 MB/s)"));
    }

    #[test]
    fn test_comparison_artifacts() {
        let summary = compare(profiles());
        let csv = comparison_csv(&summary).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("large,2,2,6,120,110,100,"));
        assert!(lines[2].ends_with(",1.5,1.5,75"));

        let charts = comparison_charts(&summary);
        assert_eq!(charts.len(), 2);
        for (_, chart) in &charts {
            assert!(chart.render_svg().is_ok());
        }
    }

    #[test]
    fn test_load_runs_requires_results() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_runs(&[dir.path().to_path_buf()]).is_err());
    }
}
