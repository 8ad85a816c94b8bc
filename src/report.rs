//! # Report Generator
//!
//! Turns the persisted results of one run into human-facing artifacts:
//!
//! - `summary_report.txt`: totals, metric statistics and per-throughput and
//!   per-configuration breakdowns
//! - `producer_metrics.csv`, `consumer_metrics.csv`,
//!   `configuration_summary.csv`: one row per producer, consumer and case
//! - five SVG charts, each skipped (not failed) when it has nothing to show
//!
//! Missing metrics are rendered as `n/a` in text and as empty cells in CSV.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::chart::{Chart, ChartError, ChartKind, Series};
use crate::metrics::ProducerMetrics;
use crate::results::{AggregatedReport, ResultsManager, SeriesStats, TestResult};
use crate::utils::format_optional;

pub const TEXT_REPORT_FILE: &str = "summary_report.txt";
pub const PRODUCER_CSV_FILE: &str = "producer_metrics.csv";
pub const CONSUMER_CSV_FILE: &str = "consumer_metrics.csv";
pub const CONFIGURATION_CSV_FILE: &str = "configuration_summary.csv";

/// Which artifacts to produce and where
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub output_dir: PathBuf,
    pub test_name: String,
    pub text: bool,
    pub csv: bool,
    pub plots: bool,
}

/// What a report run produced
#[derive(Debug, Clone, Default)]
pub struct ReportArtifacts {
    pub written: Vec<PathBuf>,
    /// Chart file name and the reason it was not drawn
    pub skipped_charts: Vec<(String, String)>,
}

/// Load the results of `run_dir` and write the requested artifacts
///
/// ## Errors
/// Fails when the directory holds no results or an artifact cannot be
/// written. A chart without data is not an error.
pub fn generate_for_run(run_dir: &Path, options: &ReportOptions) -> Result<ReportArtifacts> {
    let results = ResultsManager::load_results(run_dir)?;
    if results.is_empty() {
        bail!("No test results found in {}", run_dir.display());
    }
    info!("Loaded {} test results from {}", results.len(), run_dir.display());
    generate(&results, options)
}

pub fn generate(results: &[TestResult], options: &ReportOptions) -> Result<ReportArtifacts> {
    std::fs::create_dir_all(&options.output_dir).with_context(|| {
        format!("Failed to create report directory {}", options.output_dir.display())
    })?;

    let report = AggregatedReport::build(results);
    let mut artifacts = ReportArtifacts::default();

    if options.text {
        let path = options.output_dir.join(TEXT_REPORT_FILE);
        write_file(&path, &render_text_report(&report, &options.test_name)?)?;
        artifacts.written.push(path);
    }

    if options.csv {
        for (name, content) in [
            (PRODUCER_CSV_FILE, producer_csv(&report)?),
            (CONSUMER_CSV_FILE, consumer_csv(&report)?),
            (CONFIGURATION_CSV_FILE, configuration_csv(&report)?),
        ] {
            let path = options.output_dir.join(name);
            write_file(&path, &content)?;
            artifacts.written.push(path);
        }
    }

    if options.plots {
        for (name, chart) in build_charts(&report) {
            let path = options.output_dir.join(name);
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

    info!(
        "Report written to {} ({} files, {} charts skipped)",
        options.output_dir.display(),
        artifacts.written.len(),
        artifacts.skipped_charts.len()
    );
    Ok(artifacts)
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn write_stats(out: &mut String, label: &str, stats: Option<SeriesStats>) -> std::fmt::Result {
    writeln!(out, "{}:", label)?;
    match stats {
        Some(s) => {
            writeln!(out, "  Mean: {:.2}", s.mean)?;
            writeln!(out, "  Std:  {:.2}", s.std_dev)?;
            writeln!(out, "  Min:  {:.2}", s.min)?;
            writeln!(out, "  Max:  {:.2}", s.max)?;
        }
        None => {
            writeln!(out, "  n/a")?;
        }
    }
    Ok(())
}

fn producer_stats(report: &AggregatedReport, field: fn(&ProducerMetrics) -> Option<f64>) -> Option<SeriesStats> {
    SeriesStats::from_present(report.producers.iter().map(|p| field(&p.metrics)))
}

/// Render `summary_report.txt`
pub fn render_text_report(
    report: &AggregatedReport,
    test_name: &str,
) -> Result<String, std::fmt::Error> {
    let rule = "=".repeat(80);
    let thin = "-".repeat(40);
    let mut out = String::new();

    writeln!(out, "{}", rule)?;
    writeln!(out, "KAFKA PERFORMANCE TEST REPORT")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "Test name: {}", test_name)?;
    writeln!(out, "Generated: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out)?;

    if report.totals.mock_tests > 0 {
        writeln!(out, "*** NOTE: This report was generated from MOCK DATA (debug mode) ***")?;
        writeln!(
            out,
            "*** Results are simulated and do not reflect actual cluster performance ***"
        )?;
        writeln!(out)?;
    }

    let totals = &report.totals;
    writeln!(out, "OVERALL SUMMARY")?;
    writeln!(out, "{}", thin)?;
    writeln!(out, "Total test cases: {}", totals.tests)?;
    writeln!(out, "Completed: {}", totals.completed)?;
    writeln!(out, "Failed: {}", totals.failed)?;
    writeln!(out, "Mock data records: {}", totals.mock_tests)?;
    writeln!(out, "Producer processes: {}", totals.producer_processes)?;
    writeln!(out, "Consumer processes: {}", totals.consumer_processes)?;
    writeln!(out, "Failed processes: {}", totals.failed_processes)?;
    writeln!(out)?;

    writeln!(out, "PRODUCER METRICS")?;
    writeln!(out, "{}", thin)?;
    if report.producers.is_empty() {
        writeln!(out, "No producer data available")?;
    } else {
        write_stats(&mut out, "Throughput (MB/sec)", producer_stats(report, |m| m.mb_per_sec))?;
        write_stats(&mut out, "Throughput (records/sec)", producer_stats(report, |m| m.records_per_sec))?;
        write_stats(&mut out, "Average latency (ms)", producer_stats(report, |m| m.avg_latency_ms))?;
        write_stats(&mut out, "P99 latency (ms)", producer_stats(report, |m| m.p99_latency_ms))?;
        write_stats(&mut out, "Max latency (ms)", producer_stats(report, |m| m.max_latency_ms))?;

        writeln!(out)?;
        writeln!(out, "Metrics by Configured Throughput:")?;
        writeln!(
            out,
            "{:>12} {:>6} {:>14} {:>12} {:>10} {:>10} {:>11}",
            "requested", "cases", "achieved MB/s", "avg lat ms", "p50 ms", "p99 ms", "efficiency"
        )?;
        for tier in &report.tiers {
            writeln!(
                out,
                "{:>12} {:>6} {:>14} {:>12} {:>10} {:>10} {:>11}",
                tier.configured_mb_per_sec,
                tier.cases,
                format_optional(tier.producer_mb_per_sec.map(|s| s.mean), 2),
                format_optional(tier.avg_latency_ms.map(|s| s.mean), 2),
                format_optional(tier.p50_latency_ms, 2),
                format_optional(tier.p99_latency_ms, 2),
                format_optional(tier.efficiency, 3)
            )?;
        }
    }
    writeln!(out)?;

    writeln!(out, "CONSUMER METRICS")?;
    writeln!(out, "{}", thin)?;
    if report.consumers.is_empty() {
        writeln!(out, "No consumer data available")?;
    } else {
        let consumer = |f: fn(&crate::metrics::ConsumerMetrics) -> Option<f64>| {
            SeriesStats::from_present(report.consumers.iter().map(|c| f(&c.metrics)))
        };
        write_stats(&mut out, "Throughput (MB/sec)", consumer(|m| m.mb_per_sec))?;
        write_stats(&mut out, "Throughput (records/sec)", consumer(|m| m.records_per_sec))?;
        write_stats(&mut out, "Data consumed (MB)", consumer(|m| m.data_consumed_mb))?;
        write_stats(&mut out, "Average latency (ms)", consumer(|m| m.avg_latency_ms))?;
    }
    writeln!(out)?;

    writeln!(out, "RESULTS BY CONFIGURATION")?;
    writeln!(out, "{}", thin)?;
    for group in &report.groups {
        writeln!(out, "{}", group.key)?;
        writeln!(
            out,
            "  producer props: '{}'  consumer props: '{}'",
            group.producer_props, group.consumer_props
        )?;
        for case in &group.cases {
            let s = &case.summary;
            writeln!(
                out,
                "  {} {:>8} MB/s requested -> {:>10} MB/s sent, ratio {:>6}, avg {:>8} ms, p99 {:>8} ms, consumers {:>10} MB/s [{}]",
                case.test_id,
                case.configured_mb_per_sec,
                format_optional(s.producer_mb_per_sec, 2),
                format_optional(s.sent_div_requested_mb_per_sec, 3),
                format_optional(s.avg_latency_ms, 2),
                format_optional(s.p99_latency_ms, 2),
                format_optional(s.consumer_mb_per_sec, 2),
                case.status.label()
            )?;
        }
    }
    writeln!(out)?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "END OF REPORT")?;
    writeln!(out, "{}", rule)?;
    Ok(out)
}

pub(crate) fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_number<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_line(out: &mut String, fields: &[String]) -> std::fmt::Result {
    let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

pub fn producer_csv(report: &AggregatedReport) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "test_id,cluster_throughput_mb_per_sec,num_producers,num_consumer_groups,consumer_group_size,num_partitions,replication_factor,record_size_byte,duration_sec,producer_props,producer_index,outcome,records_sent,records_per_sec,mb_per_sec,avg_latency_ms,max_latency_ms,p50_latency_ms,p95_latency_ms,p99_latency_ms,p999_latency_ms"
    )?;
    for row in &report.producers {
        let m = &row.metrics;
        csv_line(
            &mut out,
            &[
                row.test_id.clone(),
                row.configured_mb_per_sec.to_string(),
                row.key.num_producers.to_string(),
                row.key.num_groups.to_string(),
                row.key.group_size.to_string(),
                row.key.num_partitions.to_string(),
                row.key.replication_factor.to_string(),
                row.key.record_size_byte.to_string(),
                row.key.duration_sec.to_string(),
                row.producer_props.clone(),
                row.producer_index.to_string(),
                row.outcome.clone(),
                csv_number(m.records_sent),
                csv_number(m.records_per_sec),
                csv_number(m.mb_per_sec),
                csv_number(m.avg_latency_ms),
                csv_number(m.max_latency_ms),
                csv_number(m.p50_latency_ms),
                csv_number(m.p95_latency_ms),
                csv_number(m.p99_latency_ms),
                csv_number(m.p999_latency_ms),
            ],
        )?;
    }
    Ok(out)
}

pub fn consumer_csv(report: &AggregatedReport) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "test_id,cluster_throughput_mb_per_sec,num_consumer_groups,consumer_group_size,group_index,member_index,group_id,outcome,data_consumed_mb,mb_per_sec,records_consumed,records_per_sec,avg_latency_ms,max_latency_ms"
    )?;
    for row in &report.consumers {
        let m = &row.metrics;
        csv_line(
            &mut out,
            &[
                row.test_id.clone(),
                row.configured_mb_per_sec.to_string(),
                row.key.num_groups.to_string(),
                row.key.group_size.to_string(),
                row.group_index.to_string(),
                row.member_index.to_string(),
                row.group_id.clone(),
                row.outcome.clone(),
                csv_number(m.data_consumed_mb),
                csv_number(m.mb_per_sec),
                csv_number(m.records_consumed),
                csv_number(m.records_per_sec),
                csv_number(m.avg_latency_ms),
                csv_number(m.max_latency_ms),
            ],
        )?;
    }
    Ok(out)
}

pub fn configuration_csv(report: &AggregatedReport) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "test_id,status,cluster_throughput_mb_per_sec,requested_mb_per_sec,num_producers,num_consumer_groups,consumer_group_size,num_partitions,replication_factor,record_size_byte,duration_sec,producer_props,consumer_props,producer_mb_per_sec,sent_div_requested_mb_per_sec,avg_latency_ms,p99_latency_ms,max_latency_ms,consumer_mb_per_sec,failed_processes"
    )?;
    for group in &report.groups {
        for case in &group.cases {
            let s = &case.summary;
            csv_line(
                &mut out,
                &[
                    case.test_id.clone(),
                    case.status.label().to_string(),
                    case.configured_mb_per_sec.to_string(),
                    s.requested_mb_per_sec.to_string(),
                    case.key.num_producers.to_string(),
                    case.key.num_groups.to_string(),
                    case.key.group_size.to_string(),
                    case.key.num_partitions.to_string(),
                    case.key.replication_factor.to_string(),
                    case.key.record_size_byte.to_string(),
                    case.key.duration_sec.to_string(),
                    case.producer_props.clone(),
                    case.consumer_props.clone(),
                    csv_number(s.producer_mb_per_sec),
                    csv_number(s.sent_div_requested_mb_per_sec),
                    csv_number(s.avg_latency_ms),
                    csv_number(s.p99_latency_ms),
                    csv_number(s.max_latency_ms),
                    csv_number(s.consumer_mb_per_sec),
                    s.failed_processes.to_string(),
                ],
            )?;
        }
    }
    Ok(out)
}

/// The five report charts, in file-name order
pub fn build_charts(report: &AggregatedReport) -> Vec<(&'static str, Chart)> {
    vec![
        ("01_producer_throughput_vs_latency.svg", throughput_vs_latency(report)),
        ("02_producer_latency_percentiles.svg", latency_percentiles(report)),
        ("03_producer_throughput_efficiency.svg", throughput_efficiency(report)),
        ("04_latency_vs_throughput.svg", latency_trend(report)),
        ("05_consumer_throughput.svg", consumer_throughput(report)),
    ]
}

/// Scatter of achieved MB/s against average latency, one series per
/// producer property set
fn throughput_vs_latency(report: &AggregatedReport) -> Chart {
    let mut by_props: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for row in &report.producers {
        if let (Some(mb), Some(latency)) = (row.metrics.mb_per_sec, row.metrics.avg_latency_ms) {
            by_props
                .entry(row.producer_props.as_str())
                .or_default()
                .push((mb, latency));
        }
    }
    by_props.into_iter().fold(
        Chart::new(
            "Producer Throughput vs Average Latency",
            "Achieved throughput per producer (MB/s)",
            "Average latency (ms)",
            ChartKind::Scatter,
        ),
        |chart, (props, points)| chart.with_series(Series::new(props_label(props), points)),
    )
}

fn latency_percentiles(report: &AggregatedReport) -> Chart {
    let categories: Vec<String> = report
        .tiers
        .iter()
        .map(|t| format!("{}", t.configured_mb_per_sec))
        .collect();
    let series = |label: &str, f: fn(&crate::results::ThroughputTier) -> Option<f64>| {
        let points = report
            .tiers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| f(t).map(|v| (i as f64, v)))
            .collect();
        Series::new(label, points)
    };
    Chart::new(
        "Producer Latency Percentiles by Configured Throughput",
        "Configured cluster throughput (MB/s)",
        "Latency (ms)",
        ChartKind::Bar,
    )
    .with_categories(categories)
    .with_series(series("p50", |t| t.p50_latency_ms))
    .with_series(series("p95", |t| t.p95_latency_ms))
    .with_series(series("p99", |t| t.p99_latency_ms))
    .with_series(series("p99.9", |t| t.p999_latency_ms))
}

/// Sent/requested ratio per case against the requested throughput
fn throughput_efficiency(report: &AggregatedReport) -> Chart {
    let mut by_props: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for case in &report.cases {
        if let Some(ratio) = case.summary.sent_div_requested_mb_per_sec {
            by_props
                .entry(case.producer_props.as_str())
                .or_default()
                .push((case.configured_mb_per_sec, ratio));
        }
    }
    by_props
        .into_iter()
        .fold(
            Chart::new(
                "Producer Throughput Efficiency",
                "Configured cluster throughput (MB/s)",
                "Sent / requested MB/s",
                ChartKind::Scatter,
            ),
            |chart, (props, points)| chart.with_series(Series::new(props_label(props), points)),
        )
        .with_reference(1.0, "requested")
}

/// Mean average latency per tier with one standard deviation error bars
fn latency_trend(report: &AggregatedReport) -> Chart {
    let mut points = Vec::new();
    let mut errors = Vec::new();
    for tier in &report.tiers {
        if let Some(stats) = tier.avg_latency_ms {
            points.push((tier.configured_mb_per_sec, stats.mean));
            errors.push(stats.std_dev);
        }
    }
    Chart::new(
        "Average Latency vs Configured Throughput",
        "Configured cluster throughput (MB/s)",
        "Average latency (ms, mean ± std)",
        ChartKind::Line,
    )
    .with_series(Series::new("mean latency", points).with_errors(errors))
}

/// Summed consumer MB/s per case, grouped by consumer group count
fn consumer_throughput(report: &AggregatedReport) -> Chart {
    let mut levels: Vec<f64> = report
        .cases
        .iter()
        .filter(|c| c.key.num_groups > 0)
        .map(|c| c.configured_mb_per_sec)
        .collect();
    levels.sort_by(|a, b| a.total_cmp(b));
    levels.dedup();

    // (groups, level index) -> values
    let mut cells: BTreeMap<u32, BTreeMap<usize, Vec<f64>>> = BTreeMap::new();
    for case in &report.cases {
        let mb = match case.summary.consumer_mb_per_sec {
            Some(mb) if case.key.num_groups > 0 => mb,
            _ => continue,
        };
        if let Some(index) = levels.iter().position(|l| *l == case.configured_mb_per_sec) {
            cells
                .entry(case.key.num_groups)
                .or_default()
                .entry(index)
                .or_default()
                .push(mb);
        }
    }

    let categories = levels.iter().map(|l| format!("{}", l)).collect();
    cells.into_iter().fold(
        Chart::new(
            "Consumer Throughput by Consumer Group Count",
            "Configured cluster throughput (MB/s)",
            "Consumed MB/s (all consumers)",
            ChartKind::Bar,
        )
        .with_categories(categories),
        |chart, (groups, by_level)| {
            let points = by_level
                .into_iter()
                .map(|(index, values)| (index as f64, values.iter().sum::<f64>() / values.len() as f64))
                .collect();
            let label = if groups == 1 {
                "1 group".to_string()
            } else {
                format!("{} groups", groups)
            };
            chart.with_series(Series::new(label, points))
        },
    )
}

fn props_label(props: &str) -> String {
    if props.trim().is_empty() {
        "default props".to_string()
    } else {
        props.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("acks=all"), "acks=all");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_empty_report_degrades() {
        let report = AggregatedReport::build(&[]);
        let text = render_text_report(&report, "empty").unwrap();
        assert!(text.contains("No producer data available"));
        assert!(text.contains("No consumer data available"));
        assert!(!text.contains("MOCK DATA"));
        for (_, chart) in build_charts(&report) {
            assert!(matches!(chart.render_svg(), Err(ChartError::NoData(_))));
        }
        assert_eq!(producer_csv(&report).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_generate_for_empty_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = ReportOptions {
            output_dir: dir.path().join("reports"),
            test_name: "x".to_string(),
            text: true,
            csv: true,
            plots: true,
        };
        assert!(generate_for_run(dir.path(), &options).is_err());
    }
}
