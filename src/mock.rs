//! # Mock Data Generator
//!
//! A [`ClusterDriver`] that never touches a cluster. Producers and consumers
//! "run" instantly and leave behind log files in exactly the format Kafka's
//! benchmark tools print, so everything downstream (parsing, aggregation,
//! skip evaluation, reporting) is exercised unchanged.
//!
//! The synthetic cluster behaves like a saturating one: below the knee the
//! achieved throughput tracks the request within a few percent and latency
//! grows slowly; at and above the knee the achieved throughput drops to a
//! fixed fraction of the request and latency climbs steeply.
//!
//! Output is a pure function of the seed, the test position and the process
//! index, so two runs of the same specification produce byte-identical logs.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::driver::{
    ClusterDriver, ConsumerInvocation, ProcessOutcome, ProducerInvocation, TopicRequest,
};
use crate::sweep::{ParameterCombination, BYTES_PER_MB};

/// Shape of the synthetic cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockProfile {
    pub seed: u64,
    /// Requested cluster throughput at which saturation sets in
    pub knee_mb_per_sec: f64,
    /// Achieved / requested throughput once saturated
    pub saturated_ratio: f64,
}

impl Default for MockProfile {
    fn default() -> Self {
        Self {
            seed: crate::defaults::MOCK_SEED,
            knee_mb_per_sec: crate::defaults::MOCK_KNEE_MB_PER_SEC,
            saturated_ratio: crate::defaults::MOCK_SATURATED_RATIO,
        }
    }
}

impl MockProfile {
    fn is_saturated(&self, combination: &ParameterCombination) -> bool {
        combination.throughput_mb_per_sec >= self.knee_mb_per_sec
    }

    /// Achieved over requested throughput for one process
    fn throughput_ratio(&self, combination: &ParameterCombination, rng: &mut StdRng) -> f64 {
        if self.is_saturated(combination) {
            self.saturated_ratio * rng.gen_range(0.995..1.005)
        } else {
            rng.gen_range(0.97..1.01)
        }
    }

    /// Average producer latency in ms
    fn base_latency_ms(&self, combination: &ParameterCombination, rng: &mut StdRng) -> f64 {
        let props = &combination.client_props.producer;
        let mut latency = 2.0 + combination.throughput_mb_per_sec / 20.0;
        if props.contains("acks=all") || props.contains("acks=-1") {
            latency *= 1.3;
        }
        latency *= 1.0 + property_value(props, "linger.ms").unwrap_or(0.0) / 100.0;
        let batch = property_value(props, "batch.size").unwrap_or(16384.0);
        latency *= (1.0 - (batch - 16384.0) / 100_000.0).max(0.8);

        if self.is_saturated(combination) && self.knee_mb_per_sec > 0.0 {
            let overload = combination.throughput_mb_per_sec / self.knee_mb_per_sec - 1.0;
            latency *= 2.5 + overload * 4.0;
        }
        latency * rng.gen_range(0.9..1.1)
    }
}

fn property_value(props: &str, key: &str) -> Option<f64> {
    props
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| v.parse().ok())
}

/// Process role, part of the per-process seed
#[derive(Clone, Copy)]
enum Role {
    Producer = 1,
    Consumer = 2,
}

/// Derive an independent, stable seed for one process
fn process_seed(seed: u64, test_sequence: usize, role: Role, index: u64) -> u64 {
    // FNV-1a over the identifying fields
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in [seed, test_sequence as u64, role as u64, index] {
        for byte in value.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Fixed clock so logs do not depend on wall time
fn mock_start_time(test_sequence: usize, duration_sec: u64) -> NaiveDateTime {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    base + ChronoDuration::seconds((test_sequence as i64) * (duration_sec as i64 + 30))
}

/// Render `kafka-producer-perf-test` output for one mock producer
pub fn producer_log(
    profile: &MockProfile,
    invocation: &ProducerInvocation,
) -> Result<String, std::fmt::Error> {
    let combination = &invocation.combination;
    let mut rng = StdRng::seed_from_u64(process_seed(
        profile.seed,
        invocation.test_sequence,
        Role::Producer,
        invocation.index as u64,
    ));

    let num_records = combination.producer_num_records();
    let target_rps = combination.producer_records_per_sec() as f64;
    let record_size = combination.record_size_byte as f64;
    let ratio = profile.throughput_ratio(combination, &mut rng);
    let avg_latency = profile.base_latency_ms(combination, &mut rng);

    let mut out = String::new();

    // Progress lines every five seconds, like the real tool.
    let intervals = (combination.duration_sec / 5).clamp(1, 12);
    let per_interval = num_records / intervals.max(1);
    for _ in 0..intervals.saturating_sub(1) {
        let rps = target_rps * ratio * rng.gen_range(0.98..1.02);
        let latency = avg_latency * rng.gen_range(0.85..1.15);
        writeln!(
            out,
            "{} records sent, {:.1} records/sec ({:.2} MB/sec), {:.1} ms avg latency, {:.1} ms max latency.",
            per_interval,
            rps,
            rps * record_size / BYTES_PER_MB as f64,
            latency,
            latency * rng.gen_range(3.0..6.0)
        )?;
    }

    let rps = target_rps * ratio;
    let max_latency = avg_latency * rng.gen_range(8.0..15.0);
    writeln!(
        out,
        "{} records sent, {:.6} records/sec ({:.2} MB/sec), {:.2} ms avg latency, {:.2} ms max latency, {} ms 50th, {} ms 95th, {} ms 99th, {} ms 99.9th.",
        num_records,
        rps,
        rps * record_size / BYTES_PER_MB as f64,
        avg_latency,
        max_latency,
        (avg_latency * 0.8).round() as u64,
        (avg_latency * 2.0).round() as u64,
        (avg_latency * 3.5).round() as u64,
        (avg_latency * 6.0).round().min(max_latency.floor()) as u64,
    )?;
    Ok(out)
}

/// Render `kafka-consumer-perf-test` output for one mock consumer
///
/// Every group reads the whole topic; its members split it evenly.
pub fn consumer_log(
    profile: &MockProfile,
    invocation: &ConsumerInvocation,
) -> Result<String, std::fmt::Error> {
    let combination = &invocation.combination;
    let mut rng = StdRng::seed_from_u64(process_seed(
        profile.seed,
        invocation.test_sequence,
        Role::Consumer,
        ((invocation.group_index as u64) << 32) | invocation.member_index as u64,
    ));

    let ratio = profile.throughput_ratio(combination, &mut rng);
    let group_size = combination.consumer_groups.size.max(1) as u64;
    let produced = combination.producer_num_records() * combination.num_producers as u64;
    let messages = ((produced / group_size) as f64 * ratio.min(1.0)).floor() as u64;
    let consumed_mb = (messages * combination.record_size_byte) as f64 / BYTES_PER_MB as f64;

    let duration_sec = combination.duration_sec.max(1) as f64;
    let rebalance_ms = rng.gen_range(2_000..3_500u64);
    let fetch_sec = duration_sec - rebalance_ms as f64 / 1000.0;
    let fetch_sec = fetch_sec.max(0.5);

    let start = mock_start_time(invocation.test_sequence, combination.duration_sec);
    let end = start + ChronoDuration::milliseconds((duration_sec * 1000.0) as i64);
    let fetch_latency = 1.0 + combination.throughput_mb_per_sec / 50.0 * rng.gen_range(0.8..1.2);

    let mut out = String::new();
    writeln!(
        out,
        "start.time, end.time, data.consumed.in.MB, MB.sec, data.consumed.in.nMsg, nMsg.sec, rebalance.time.ms, fetch.time.ms, fetch.MB.sec, fetch.nMsg.sec"
    )?;
    writeln!(
        out,
        "{}, {}, {:.4}, {:.4}, {}, {:.4}, {}, {}, {:.4}, {:.4}",
        start.format("%Y-%m-%d %H:%M:%S:%3f"),
        end.format("%Y-%m-%d %H:%M:%S:%3f"),
        consumed_mb,
        consumed_mb / duration_sec,
        messages,
        messages as f64 / duration_sec,
        rebalance_ms,
        (fetch_sec * 1000.0) as u64,
        consumed_mb / fetch_sec,
        messages as f64 / fetch_sec
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "Metric Name                                                                                      Value"
    )?;
    writeln!(
        out,
        "consumer-fetch-manager-metrics:fetch-latency-avg:{{client-id={}-{}}}          : {:.3}",
        invocation.group_id, invocation.member_index, fetch_latency
    )?;
    Ok(out)
}

/// Driver that fabricates deterministic benchmark output
pub struct MockDriver {
    profile: MockProfile,
    topics: Mutex<BTreeSet<String>>,
}

impl MockDriver {
    pub fn new(profile: MockProfile) -> Self {
        Self {
            profile,
            topics: Mutex::new(BTreeSet::new()),
        }
    }

    fn topics(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<String>>> {
        self.topics
            .lock()
            .map_err(|_| anyhow!("mock topic registry is poisoned"))
    }
}

async fn write_log(
    log_path: &Path,
    contents: Result<String, std::fmt::Error>,
) -> ProcessOutcome {
    let contents = match contents {
        Ok(contents) => contents,
        Err(e) => {
            return ProcessOutcome::SpawnFailed {
                reason: format!("cannot render output for {}: {}", log_path.display(), e),
            }
        }
    };
    match tokio::fs::write(log_path, contents).await {
        Ok(()) => ProcessOutcome::Exited {
            exit_code: Some(0),
            elapsed_sec: 0.0,
        },
        Err(e) => ProcessOutcome::SpawnFailed {
            reason: format!("cannot write {}: {}", log_path.display(), e),
        },
    }
}

#[async_trait]
impl ClusterDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_mock(&self) -> bool {
        true
    }

    async fn check_environment(&self) -> Result<()> {
        Ok(())
    }

    async fn create_topic(&self, topic: &TopicRequest) -> Result<()> {
        if !self.topics()?.insert(topic.name.clone()) {
            bail!("Topic '{}' already exists", topic.name);
        }
        debug!("[mock] created topic '{}'", topic.name);
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        if !self.topics()?.remove(name) {
            bail!("Topic '{}' does not exist", name);
        }
        debug!("[mock] deleted topic '{}'", name);
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.topics()?.iter().cloned().collect())
    }

    async fn run_producer(
        &self,
        invocation: &ProducerInvocation,
        log_path: &Path,
    ) -> ProcessOutcome {
        write_log(log_path, producer_log(&self.profile, invocation)).await
    }

    async fn run_consumer(
        &self,
        invocation: &ConsumerInvocation,
        log_path: &Path,
    ) -> ProcessOutcome {
        write_log(log_path, consumer_log(&self.profile, invocation)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_consumer_output, parse_producer_output};
    use crate::spec::TestSpecification;
    use crate::sweep::{enumerate, AxisMode};
    use std::time::Duration;

    fn combinations() -> Vec<ParameterCombination> {
        let spec = TestSpecification::from_json_str(
            r#"{
                "cluster_throughput_mb_per_sec": [10, 50, 100],
                "num_producers": [2],
                "consumer_groups": [{"num_groups": 1, "size": 2}],
                "duration_sec": [60],
                "record_size_byte": [1024]
            }"#,
        )
        .unwrap();
        enumerate(&spec, AxisMode::Full)
    }

    fn producer(combination: ParameterCombination, sequence: usize, index: u32) -> ProducerInvocation {
        ProducerInvocation {
            test_id: format!("t{:04}", sequence),
            test_sequence: sequence,
            index,
            topic: "perf-mock".to_string(),
            combination,
            watchdog: Duration::from_secs(1),
        }
    }

    fn profile() -> MockProfile {
        MockProfile {
            seed: 42,
            knee_mb_per_sec: 50.0,
            saturated_ratio: 0.8,
        }
    }

    #[test]
    fn test_producer_log_is_deterministic_and_parseable() {
        let c = combinations().remove(0);
        let a = producer_log(&profile(), &producer(c.clone(), 1, 0)).unwrap();
        let b = producer_log(&profile(), &producer(c.clone(), 1, 0)).unwrap();
        assert_eq!(a, b);
        let other = producer_log(&profile(), &producer(c, 1, 1)).unwrap();
        assert_ne!(a, other);

        let metrics = parse_producer_output(&a);
        assert_eq!(metrics.records_sent, Some(5120 * 60));
        assert!(metrics.mb_per_sec.is_some());
        assert!(metrics.p999_latency_ms.is_some());
    }

    #[test]
    fn test_saturation_knee() {
        let profile = profile();
        for combination in combinations() {
            let log = producer_log(&profile, &producer(combination.clone(), 1, 0)).unwrap();
            let achieved = parse_producer_output(&log).mb_per_sec.unwrap();
            let per_producer = combination.expected_mb_per_sec() / 2.0;
            let ratio = achieved / per_producer;
            if combination.throughput_mb_per_sec < 50.0 {
                assert!(ratio > 0.96 && ratio < 1.02, "ratio {ratio}");
            } else {
                assert!(ratio > 0.78 && ratio < 0.82, "ratio {ratio}");
            }
        }
    }

    #[test]
    fn test_consumer_log_is_parseable() {
        let c = combinations().remove(0);
        let invocation = ConsumerInvocation {
            test_id: "t0001".to_string(),
            test_sequence: 1,
            group_index: 0,
            member_index: 0,
            group_id: "perf-mock-group-0".to_string(),
            topic: "perf-mock".to_string(),
            combination: c,
            watchdog: Duration::from_secs(1),
        };
        let metrics = parse_consumer_output(&consumer_log(&profile(), &invocation).unwrap());
        assert!(metrics.data_consumed_mb.unwrap() > 0.0);
        assert!(metrics.mb_per_sec.unwrap() > 0.0);
        assert!(metrics.records_per_sec.unwrap() > 0.0);
        assert!(metrics.avg_latency_ms.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_topic_lifecycle() {
        let driver = MockDriver::new(profile());
        let topic = TopicRequest {
            name: "perf-a".to_string(),
            partitions: 3,
            replication_factor: 1,
        };
        driver.create_topic(&topic).await.unwrap();
        assert!(driver.create_topic(&topic).await.is_err());
        assert_eq!(driver.list_topics().await.unwrap(), vec!["perf-a".to_string()]);
        driver.delete_topic("perf-a").await.unwrap();
        assert!(driver.list_topics().await.unwrap().is_empty());
        assert!(driver.delete_topic("perf-a").await.is_err());
    }
}
