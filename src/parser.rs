//! Extraction of metrics from the output of Kafka's benchmark tools.
//!
//! Parsing never fails: every field is matched independently and whatever
//! cannot be found stays `None`. A crashed producer, a truncated consumer
//! log or an unexpected Kafka version therefore degrades the report rather
//! than aborting it.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::metrics::{ConsumerMetrics, ProducerMetrics};

/// Column that identifies the consumer summary header
const CONSUMER_HEADER_MARKER: &str = "data.consumed.in.MB";

struct ProducerPatterns {
    records_sent: Regex,
    records_per_sec: Regex,
    mb_per_sec: Regex,
    avg_latency: Regex,
    max_latency: Regex,
    p50: Regex,
    p95: Regex,
    p99: Regex,
    p999: Regex,
}

fn producer_patterns() -> &'static ProducerPatterns {
    static PATTERNS: OnceLock<ProducerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let number = r"(\d+(?:\.\d+)?)";
        let re = |suffix: &str| {
            Regex::new(&format!(r"{}\s+{}", number, suffix)).expect("static pattern is valid")
        };
        ProducerPatterns {
            records_sent: re(r"records sent"),
            records_per_sec: re(r"records/sec"),
            mb_per_sec: re(r"MB/sec\)"),
            avg_latency: re(r"ms avg latency"),
            max_latency: re(r"ms max latency"),
            p50: re(r"ms 50th"),
            p95: re(r"ms 95th"),
            p99: re(r"ms 99th"),
            p999: re(r"ms 99\.9th"),
        }
    })
}

fn fetch_latency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"fetch-latency-avg(?::\{[^}]*\})?\s*:\s*(\d+(?:\.\d+)?)")
            .expect("static pattern is valid")
    })
}

fn capture_f64(pattern: &Regex, line: &str) -> Option<f64> {
    pattern
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parse the output of `kafka-producer-perf-test`
///
/// Only the last line mentioning `records sent` is considered; earlier ones
/// are Kafka's periodic progress reports.
pub fn parse_producer_output(output: &str) -> ProducerMetrics {
    let line = match output.lines().rev().find(|l| l.contains("records sent")) {
        Some(line) => line,
        None => return ProducerMetrics::default(),
    };

    let patterns = producer_patterns();
    ProducerMetrics {
        records_sent: capture_f64(&patterns.records_sent, line).map(|v| v as u64),
        records_per_sec: capture_f64(&patterns.records_per_sec, line),
        mb_per_sec: capture_f64(&patterns.mb_per_sec, line),
        avg_latency_ms: capture_f64(&patterns.avg_latency, line),
        max_latency_ms: capture_f64(&patterns.max_latency, line),
        p50_latency_ms: capture_f64(&patterns.p50, line),
        p95_latency_ms: capture_f64(&patterns.p95, line),
        p99_latency_ms: capture_f64(&patterns.p99, line),
        p999_latency_ms: capture_f64(&patterns.p999, line),
    }
}

/// Parse the output of `kafka-consumer-perf-test`
///
/// The summary is a comma separated header row followed by data rows; the
/// last data row with the header's column count wins. Columns are looked up
/// by name so their order does not matter.
pub fn parse_consumer_output(output: &str) -> ConsumerMetrics {
    let lines: Vec<&str> = output.lines().collect();
    let mut metrics = ConsumerMetrics::default();

    if let Some(header_index) = lines.iter().rposition(|l| l.contains(CONSUMER_HEADER_MARKER)) {
        let header: Vec<String> = split_row(lines[header_index])
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let row = lines[header_index + 1..]
            .iter()
            .map(|l| split_row(l))
            .filter(|cells| cells.len() == header.len())
            .last();

        if let Some(cells) = row {
            let columns: HashMap<&str, &str> = header
                .iter()
                .map(|h| h.as_str())
                .zip(cells.iter().copied())
                .collect();
            let number = |name: &str| {
                columns
                    .get(name)
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|v| v.is_finite())
            };

            metrics.data_consumed_mb = number("data.consumed.in.MB");
            metrics.mb_per_sec = number("MB.sec");
            metrics.records_per_sec = number("records.per.sec").or_else(|| number("nMsg.sec"));
            metrics.records_consumed = number("data.consumed.in.nMsg").map(|v| v as u64);
            metrics.avg_latency_ms = number("avg.partition.latency.ms");
            metrics.max_latency_ms = number("max.partition.latency.ms");
        }
    }

    if metrics.avg_latency_ms.is_none() {
        metrics.avg_latency_ms = output
            .lines()
            .rev()
            .find_map(|l| capture_f64(fetch_latency_pattern(), l));
    }

    metrics
}

fn split_row(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

fn read_log(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("Could not read log {}: {}", path.display(), e);
            None
        }
    }
}

/// Parse a producer log file; an unreadable file yields empty metrics
pub fn parse_producer_log(path: &Path) -> ProducerMetrics {
    let metrics = read_log(path)
        .map(|text| parse_producer_output(&text))
        .unwrap_or_default();
    if metrics.is_empty() {
        debug!("No producer summary found in {}", path.display());
    }
    metrics
}

/// Parse a consumer log file; an unreadable file yields empty metrics
pub fn parse_consumer_log(path: &Path) -> ConsumerMetrics {
    let metrics = read_log(path)
        .map(|text| parse_consumer_output(&text))
        .unwrap_or_default();
    if metrics.is_empty() {
        debug!("No consumer summary found in {}", path.display());
    }
    metrics
}
