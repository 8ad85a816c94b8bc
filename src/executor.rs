//! # Test Case Executor
//!
//! Runs one [`ParameterCombination`] end to end:
//!
//! 1. **Headroom check**: warn when the host may not fit every client JVM
//! 2. **Topic creation**: a fresh topic per test case
//! 3. **Fan-out**: producers and consumers start concurrently, each as its
//!    own task owning one benchmark process
//! 4. **Join**: wait for every process; a failure is recorded on its run
//!    and never aborts the siblings
//! 5. **Topic deletion**: on every path that created the topic
//! 6. **Parsing**: all logs are parsed into the returned [`TestResult`]
//!
//! Topic creation failure yields a failed result instead of an error, so the
//! sweep can carry on with the next combination.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::driver::{ClusterDriver, ConsumerInvocation, ProcessOutcome, ProducerInvocation, TopicRequest};
use crate::results::{ConsumerRun, ProducerRun, TestResult};
use crate::sweep::ParameterCombination;
use crate::utils::{
    format_bytes, get_available_memory_bytes, sanitize_resource_name, test_id_for,
    throughput_label,
};

/// Knobs that stay fixed for a whole sweep
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub run_dir: PathBuf,
    pub run_tag: String,
    /// Added to the test duration to form each process's watchdog
    pub process_grace: Duration,
    /// Pause between topic creation and client launch
    pub topic_settle: Duration,
}

/// Which run a finished task belongs to
#[derive(Debug, Clone, Copy)]
enum Slot {
    Producer(usize),
    Consumer(usize),
}

pub struct TestCaseExecutor {
    driver: Arc<dyn ClusterDriver>,
    settings: ExecutorSettings,
}

impl TestCaseExecutor {
    pub fn new(driver: Arc<dyn ClusterDriver>, settings: ExecutorSettings) -> Self {
        Self { driver, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// `perf-<run tag>-<test id>-<throughput>mbps-<groups>cg`
    pub fn topic_name(&self, combination: &ParameterCombination, test_id: &str) -> String {
        sanitize_resource_name(&format!(
            "perf-{}-{}-{}mbps-{}cg",
            self.settings.run_tag,
            test_id,
            throughput_label(combination.throughput_mb_per_sec),
            combination.consumer_groups.num_groups
        ))
    }

    pub fn group_id(topic: &str, group_index: u32) -> String {
        sanitize_resource_name(&format!("{}-group-{}", topic, group_index))
    }

    pub fn producer_log_name(test_id: &str, index: u32) -> PathBuf {
        PathBuf::from(format!("{}-producer-{}.log", test_id, index))
    }

    pub fn consumer_log_name(test_id: &str, group_index: u32, member_index: u32) -> PathBuf {
        PathBuf::from(format!(
            "{}-consumer-{}-{}.log",
            test_id, group_index, member_index
        ))
    }

    /// Warn when the estimated client memory exceeds what is available
    fn check_memory_headroom(&self, combination: &ParameterCombination) {
        if self.driver.is_mock() {
            return;
        }
        let clients = combination.num_producers as u64 + combination.num_consumers() as u64;
        let required = clients * crate::defaults::MEMORY_PER_CLIENT_BYTES;
        let available = get_available_memory_bytes();
        if available > 0 && required > available {
            warn!(
                "{} clients need about {} but only {} is available; results may be skewed",
                clients,
                format_bytes(required),
                format_bytes(available)
            );
        }
    }

    /// Execute the `test_sequence`-th combination of the sweep
    pub async fn run(&self, combination: &ParameterCombination, test_sequence: usize) -> TestResult {
        let test_id = test_id_for(test_sequence);
        let topic = self.topic_name(combination, &test_id);
        let mut result = TestResult::new(
            test_id.clone(),
            self.settings.run_tag.clone(),
            topic.clone(),
            combination.clone(),
            self.driver.is_mock(),
        );

        info!(
            "[{}] {} MB/s, {} producers, {} consumer groups x {}, {}",
            test_id,
            combination.throughput_mb_per_sec,
            combination.num_producers,
            combination.consumer_groups.num_groups,
            combination.consumer_groups.size,
            combination.configuration_key()
        );

        self.check_memory_headroom(combination);

        let request = TopicRequest {
            name: topic.clone(),
            partitions: combination.num_partitions,
            replication_factor: combination.replication_factor,
        };
        if let Err(e) = self.driver.create_topic(&request).await {
            error!("[{}] {:#}", test_id, e);
            result.mark_failed(format!("topic creation failed: {:#}", e));
            return result;
        }

        if !self.driver.is_mock() && !self.settings.topic_settle.is_zero() {
            debug!("Waiting {:?} for topic metadata to settle", self.settings.topic_settle);
            tokio::time::sleep(self.settings.topic_settle).await;
        }

        self.run_clients(combination, test_sequence, &mut result).await;

        if let Err(e) = self.driver.delete_topic(&topic).await {
            warn!("[{}] {:#}", test_id, e);
        }

        result.finalize(&self.settings.run_dir);

        let summary = &result.summary;
        info!(
            "[{}] done: {} of {:.2} MB/s requested (ratio {}), avg latency {} ms, {} failed processes",
            test_id,
            summary
                .producer_mb_per_sec
                .map_or_else(|| "n/a".to_string(), |v| format!("{:.2} MB/s", v)),
            summary.requested_mb_per_sec,
            crate::utils::format_optional(summary.sent_div_requested_mb_per_sec, 3),
            crate::utils::format_optional(summary.avg_latency_ms, 2),
            summary.failed_processes
        );
        result
    }

    /// Launch every client concurrently and wait for all of them
    async fn run_clients(
        &self,
        combination: &ParameterCombination,
        test_sequence: usize,
        result: &mut TestResult,
    ) {
        let test_id = result.test_id.clone();
        let topic = result.topic.clone();
        let watchdog = Duration::from_secs(combination.duration_sec) + self.settings.process_grace;
        let not_finished = || ProcessOutcome::SpawnFailed {
            reason: "task did not complete".to_string(),
        };

        let mut tasks: JoinSet<(Slot, ProcessOutcome)> = JoinSet::new();

        for index in 0..combination.num_producers {
            let log_file = Self::producer_log_name(&test_id, index);
            let log_path = self.settings.run_dir.join(&log_file);
            let invocation = ProducerInvocation {
                test_id: test_id.clone(),
                test_sequence,
                index,
                topic: topic.clone(),
                combination: combination.clone(),
                watchdog,
            };
            let slot = Slot::Producer(result.producers.len());
            result.producers.push(ProducerRun {
                index,
                log_file,
                outcome: not_finished(),
                metrics: Default::default(),
            });

            let driver = Arc::clone(&self.driver);
            tasks.spawn(async move {
                let outcome = driver.run_producer(&invocation, &log_path).await;
                (slot, outcome)
            });
        }

        if combination.consumer_groups.num_groups > 0 {
            for group_index in 0..combination.consumer_groups.num_groups {
                let group_id = Self::group_id(&topic, group_index);
                for member_index in 0..combination.consumer_groups.size {
                    let log_file = Self::consumer_log_name(&test_id, group_index, member_index);
                    let log_path = self.settings.run_dir.join(&log_file);
                    let invocation = ConsumerInvocation {
                        test_id: test_id.clone(),
                        test_sequence,
                        group_index,
                        member_index,
                        group_id: group_id.clone(),
                        topic: topic.clone(),
                        combination: combination.clone(),
                        watchdog,
                    };
                    let slot = Slot::Consumer(result.consumers.len());
                    result.consumers.push(ConsumerRun {
                        group_index,
                        member_index,
                        group_id: group_id.clone(),
                        log_file,
                        outcome: not_finished(),
                        metrics: Default::default(),
                    });

                    let driver = Arc::clone(&self.driver);
                    tasks.spawn(async move {
                        let outcome = driver.run_consumer(&invocation, &log_path).await;
                        (slot, outcome)
                    });
                }
            }
        }

        debug!(
            "[{}] launched {} producers and {} consumers",
            test_id,
            result.producers.len(),
            result.consumers.len()
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => {
                    if !outcome.is_success() {
                        warn!("[{}] {:?} {}", test_id, slot, outcome.describe());
                    }
                    match slot {
                        Slot::Producer(i) => result.producers[i].outcome = outcome,
                        Slot::Consumer(i) => result.consumers[i].outcome = outcome,
                    }
                }
                Err(e) => error!("[{}] client task failed: {}", test_id, e),
            }
        }
    }
}
