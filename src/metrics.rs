//! Metric types extracted from benchmark logs and their case-level
//! combination.
//!
//! Every field is optional: a log that is truncated, or a summary line in a
//! format we do not recognise, leaves the affected fields as `None` rather
//! than failing the whole aggregation.

use serde::{Deserialize, Serialize};

use crate::utils::{mean_of_present, sum_of_present};

/// Metrics reported by one `kafka-producer-perf-test` process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerMetrics {
    pub records_sent: Option<u64>,
    pub records_per_sec: Option<f64>,
    pub mb_per_sec: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub p999_latency_ms: Option<f64>,
}

impl ProducerMetrics {
    /// True when nothing at all could be extracted
    pub fn is_empty(&self) -> bool {
        *self == ProducerMetrics::default()
    }
}

/// Metrics reported by one `kafka-consumer-perf-test` process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerMetrics {
    pub data_consumed_mb: Option<f64>,
    pub mb_per_sec: Option<f64>,
    pub records_consumed: Option<u64>,
    pub records_per_sec: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl ConsumerMetrics {
    pub fn is_empty(&self) -> bool {
        *self == ConsumerMetrics::default()
    }
}

/// Case-level view over every process of one test case
///
/// Throughputs are summed across processes. Latencies are averaged,
/// weighted by records sent when every contributing producer reported a
/// record count, plainly otherwise. Max latency is the maximum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub requested_mb_per_sec: f64,
    pub producer_records_sent: Option<u64>,
    pub producer_records_per_sec: Option<f64>,
    pub producer_mb_per_sec: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub p999_latency_ms: Option<f64>,
    pub consumer_data_consumed_mb: Option<f64>,
    pub consumer_mb_per_sec: Option<f64>,
    pub consumer_records_per_sec: Option<f64>,
    pub consumer_avg_latency_ms: Option<f64>,
    pub consumer_max_latency_ms: Option<f64>,
    /// Achieved producer MB/s over `requested_mb_per_sec`
    pub sent_div_requested_mb_per_sec: Option<f64>,
    pub failed_processes: usize,
}

impl CaseSummary {
    /// Combine per-process metrics of one test case
    ///
    /// `requested_mb_per_sec` is the throughput the producers were sized
    /// for; it is the denominator of the efficiency ratio.
    pub fn from_metrics(
        requested_mb_per_sec: f64,
        producers: &[ProducerMetrics],
        consumers: &[ConsumerMetrics],
        failed_processes: usize,
    ) -> Self {
        let producer_records_sent = {
            let counts: Vec<u64> = producers.iter().filter_map(|p| p.records_sent).collect();
            if counts.is_empty() {
                None
            } else {
                Some(counts.iter().sum())
            }
        };
        let producer_mb_per_sec = sum_of_present(producers.iter().map(|p| p.mb_per_sec));

        let sent_div_requested_mb_per_sec = producer_mb_per_sec.map(|achieved| {
            if requested_mb_per_sec <= 0.0 {
                1.0
            } else {
                achieved / requested_mb_per_sec
            }
        });

        Self {
            requested_mb_per_sec,
            producer_records_sent,
            producer_records_per_sec: sum_of_present(producers.iter().map(|p| p.records_per_sec)),
            producer_mb_per_sec,
            avg_latency_ms: weighted_latency(producers, |p| p.avg_latency_ms),
            max_latency_ms: max_of_present(producers.iter().map(|p| p.max_latency_ms)),
            p50_latency_ms: weighted_latency(producers, |p| p.p50_latency_ms),
            p95_latency_ms: weighted_latency(producers, |p| p.p95_latency_ms),
            p99_latency_ms: weighted_latency(producers, |p| p.p99_latency_ms),
            p999_latency_ms: weighted_latency(producers, |p| p.p999_latency_ms),
            consumer_data_consumed_mb: sum_of_present(consumers.iter().map(|c| c.data_consumed_mb)),
            consumer_mb_per_sec: sum_of_present(consumers.iter().map(|c| c.mb_per_sec)),
            consumer_records_per_sec: sum_of_present(consumers.iter().map(|c| c.records_per_sec)),
            consumer_avg_latency_ms: mean_of_present(consumers.iter().map(|c| c.avg_latency_ms)),
            consumer_max_latency_ms: max_of_present(consumers.iter().map(|c| c.max_latency_ms)),
            sent_div_requested_mb_per_sec,
            failed_processes,
        }
    }
}

fn max_of_present<I: Iterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    values.flatten().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |current| current.max(v)))
    })
}

/// Record-count weighted mean of a per-producer latency
fn weighted_latency<F>(producers: &[ProducerMetrics], field: F) -> Option<f64>
where
    F: Fn(&ProducerMetrics) -> Option<f64>,
{
    let samples: Vec<(f64, Option<u64>)> = producers
        .iter()
        .filter_map(|p| field(p).map(|value| (value, p.records_sent)))
        .collect();
    if samples.is_empty() {
        return None;
    }

    let total_weight: u64 = samples.iter().filter_map(|(_, w)| *w).sum();
    let fully_weighted = samples.iter().all(|(_, w)| w.is_some());
    if fully_weighted && total_weight > 0 {
        let weighted: f64 = samples
            .iter()
            .map(|(value, w)| value * w.unwrap_or(0) as f64)
            .sum();
        Some(weighted / total_weight as f64)
    } else {
        mean_of_present(samples.iter().map(|(value, _)| Some(*value)))
    }
}
