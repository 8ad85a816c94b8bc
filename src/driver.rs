//! # Cluster Driver
//!
//! The seam between the sweep logic and the Kafka cluster. The executor only
//! ever talks to a [`ClusterDriver`]; [`KafkaCliDriver`] implements it by
//! shelling out to the scripts shipped in Kafka's `bin/` directory, while
//! [`crate::mock::MockDriver`] synthesizes the same log files without any
//! executable or network.
//!
//! ## Process Model
//!
//! Every producer and consumer benchmark is a separate OS process whose
//! stdout and stderr are redirected into its own log file. A wall-clock
//! watchdog kills a process that outlives its test by more than the
//! configured grace period; the outcome is then recorded as
//! [`ProcessOutcome::TimedOut`] and its siblings keep running.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{parse_property_string, write_properties_file, ConnectionConfig, Properties};
use crate::sweep::ParameterCombination;

pub const TOPICS_SCRIPT: &str = "kafka-topics.sh";
pub const PRODUCER_SCRIPT: &str = "kafka-producer-perf-test.sh";
pub const CONSUMER_SCRIPT: &str = "kafka-consumer-perf-test.sh";

/// Upper bound for `kafka-topics.sh` administrative calls
const TOPIC_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How a benchmark process ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The process exited on its own; `exit_code` is `None` when it was
    /// terminated by a signal
    Exited {
        exit_code: Option<i32>,
        elapsed_sec: f64,
    },
    /// The watchdog killed the process
    TimedOut { elapsed_sec: f64 },
    /// The process could not be started at all
    SpawnFailed { reason: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { exit_code: Some(0), .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ProcessOutcome::Exited {
                exit_code: Some(code),
                ..
            } => format!("exit code {}", code),
            ProcessOutcome::Exited { exit_code: None, .. } => "killed by signal".to_string(),
            ProcessOutcome::TimedOut { elapsed_sec } => {
                format!("timed out after {:.1}s", elapsed_sec)
            }
            ProcessOutcome::SpawnFailed { reason } => format!("spawn failed: {}", reason),
        }
    }
}

/// Topic to create for one test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRequest {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
}

/// Everything needed to launch one producer benchmark
#[derive(Debug, Clone)]
pub struct ProducerInvocation {
    pub test_id: String,
    /// Position of the test case in the sweep
    pub test_sequence: usize,
    pub index: u32,
    pub topic: String,
    pub combination: ParameterCombination,
    pub watchdog: Duration,
}

/// Everything needed to launch one consumer benchmark
#[derive(Debug, Clone)]
pub struct ConsumerInvocation {
    pub test_id: String,
    pub test_sequence: usize,
    pub group_index: u32,
    pub member_index: u32,
    pub group_id: String,
    pub topic: String,
    pub combination: ParameterCombination,
    pub watchdog: Duration,
}

/// Operations the sweep needs from a Kafka cluster
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether the driver fabricates its results
    fn is_mock(&self) -> bool {
        false
    }

    /// Verify tools are present and the cluster answers
    async fn check_environment(&self) -> Result<()>;

    async fn create_topic(&self, topic: &TopicRequest) -> Result<()>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Run one producer to completion, writing its output to `log_path`
    async fn run_producer(&self, invocation: &ProducerInvocation, log_path: &Path)
        -> ProcessOutcome;

    /// Run one consumer to completion, writing its output to `log_path`
    async fn run_consumer(&self, invocation: &ConsumerInvocation, log_path: &Path)
        -> ProcessOutcome;
}

/// Driver backed by Kafka's command line tools
pub struct KafkaCliDriver {
    /// `None` when no install was found; scripts are then resolved on `PATH`
    bin_dir: Option<PathBuf>,
    config: ConnectionConfig,
    /// Security properties shared by every invocation; removed on drop
    security_file: NamedTempFile,
}

impl KafkaCliDriver {
    /// Fails only when the security properties cannot be written; a missing
    /// Kafka install is reported by `check_environment`.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let bin_dir = match locate_bin_dir(config.kafka_home.as_deref()) {
            Ok(dir) => {
                info!("Using Kafka tools in {}", dir.display());
                Some(dir)
            }
            Err(e) => {
                warn!("{:#}; resolving the Kafka scripts on PATH", e);
                None
            }
        };
        let security_file = write_properties_file(&config.security_properties())
            .context("Failed to write security properties")?;
        Ok(Self {
            bin_dir,
            config,
            security_file,
        })
    }

    fn script(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Run `kafka-topics.sh` and return its stdout
    async fn run_topics_command(&self, args: Vec<String>) -> Result<String> {
        debug!("{} {}", TOPICS_SCRIPT, args.join(" "));
        let mut command = Command::new(self.script(TOPICS_SCRIPT));
        command
            .args(&args)
            .env("KAFKA_HEAP_OPTS", &self.config.java_heap_opts)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(TOPIC_COMMAND_TIMEOUT, command.output())
            .await
            .map_err(|_| anyhow!("{} did not finish within {:?}", TOPICS_SCRIPT, TOPIC_COMMAND_TIMEOUT))?
            .with_context(|| format!("Failed to run {}", TOPICS_SCRIPT))?;

        if !output.status.success() {
            bail!(
                "{} failed ({}): {}",
                TOPICS_SCRIPT,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a benchmark script with output redirected to `log_path`
    async fn run_tool(
        &self,
        script: &str,
        args: Vec<String>,
        log_path: &Path,
        watchdog: Duration,
    ) -> ProcessOutcome {
        let started = Instant::now();
        let spawn_failed = |reason: String| ProcessOutcome::SpawnFailed { reason };

        let stdout = match std::fs::File::create(log_path) {
            Ok(file) => file,
            Err(e) => return spawn_failed(format!("cannot create {}: {}", log_path.display(), e)),
        };
        let stderr = match stdout.try_clone() {
            Ok(file) => file,
            Err(e) => return spawn_failed(format!("cannot share {}: {}", log_path.display(), e)),
        };

        debug!("{} {}", script, args.join(" "));
        let mut command = Command::new(self.script(script));
        command
            .args(&args)
            .env("KAFKA_HEAP_OPTS", &self.config.java_heap_opts)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return spawn_failed(format!("{}: {}", script, e)),
        };

        match tokio::time::timeout(watchdog, child.wait()).await {
            Ok(Ok(status)) => ProcessOutcome::Exited {
                exit_code: status.code(),
                elapsed_sec: started.elapsed().as_secs_f64(),
            },
            Ok(Err(e)) => spawn_failed(format!("failed waiting for {}: {}", script, e)),
            Err(_) => {
                warn!(
                    "{} exceeded its {:?} watchdog, killing it ({})",
                    script,
                    watchdog,
                    log_path.display()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", script, e);
                }
                ProcessOutcome::TimedOut {
                    elapsed_sec: started.elapsed().as_secs_f64(),
                }
            }
        }
    }
}

#[async_trait]
impl ClusterDriver for KafkaCliDriver {
    fn name(&self) -> &'static str {
        "kafka-cli"
    }

    async fn check_environment(&self) -> Result<()> {
        let bin_dir = match &self.bin_dir {
            Some(dir) => dir.clone(),
            None => locate_bin_dir(self.config.kafka_home.as_deref())?,
        };
        for script in [TOPICS_SCRIPT, PRODUCER_SCRIPT, CONSUMER_SCRIPT] {
            let path = bin_dir.join(script);
            if !path.exists() {
                bail!("Kafka tool {} not found", path.display());
            }
        }
        let topics = self
            .list_topics()
            .await
            .with_context(|| format!("Cluster at {} is not reachable", self.config.bootstrap_servers))?;
        info!(
            "Cluster at {} reachable, {} existing topics",
            self.config.bootstrap_servers,
            topics.len()
        );
        Ok(())
    }

    async fn create_topic(&self, topic: &TopicRequest) -> Result<()> {
        let args = create_topic_args(&self.config, topic, self.security_file.path());
        self.run_topics_command(args)
            .await
            .with_context(|| format!("Failed to create topic '{}'", topic.name))?;
        info!(
            "Created topic '{}' ({} partitions, rf {})",
            topic.name, topic.partitions, topic.replication_factor
        );
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let args = delete_topic_args(&self.config, name, self.security_file.path());
        self.run_topics_command(args)
            .await
            .with_context(|| format!("Failed to delete topic '{}'", name))?;
        info!("Deleted topic '{}'", name);
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let args = list_topics_args(&self.config, self.security_file.path());
        let stdout = self.run_topics_command(args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn run_producer(
        &self,
        invocation: &ProducerInvocation,
        log_path: &Path,
    ) -> ProcessOutcome {
        let args = producer_args(&self.config, invocation, self.security_file.path());
        self.run_tool(PRODUCER_SCRIPT, args, log_path, invocation.watchdog)
            .await
    }

    async fn run_consumer(
        &self,
        invocation: &ConsumerInvocation,
        log_path: &Path,
    ) -> ProcessOutcome {
        // Consumer properties travel in the same file as the security block.
        let mut props: Properties = self.config.security_properties();
        props.extend(parse_property_string(
            &invocation.combination.client_props.consumer,
        ));
        let props_file = match write_properties_file(&props) {
            Ok(file) => file,
            Err(e) => {
                return ProcessOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        };

        let args = consumer_args(&self.config, invocation, props_file.path());
        let outcome = self
            .run_tool(CONSUMER_SCRIPT, args, log_path, invocation.watchdog)
            .await;
        drop(props_file);
        outcome
    }
}

/// Find the directory holding the Kafka scripts
///
/// Tries `<home>/bin`, `<home>`, any `<home>/kafka_*/bin`, then
/// `$KAFKA_HOME/bin` and the conventional install locations.
pub fn locate_bin_dir(kafka_home: Option<&Path>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    let mut homes: Vec<PathBuf> = Vec::new();
    if let Some(home) = kafka_home {
        homes.push(home.to_path_buf());
    }
    if let Some(env_home) = std::env::var_os("KAFKA_HOME") {
        homes.push(PathBuf::from(env_home));
    }

    for home in &homes {
        candidates.push(home.join("bin"));
        candidates.push(home.clone());
        if let Ok(entries) = std::fs::read_dir(home) {
            let mut nested: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_dir()
                        && p.file_name()
                            .and_then(|n| n.to_str())
                            .map_or(false, |n| n.starts_with("kafka_"))
                })
                .map(|p| p.join("bin"))
                .collect();
            nested.sort();
            candidates.extend(nested);
        }
    }
    candidates.push(PathBuf::from("/opt/kafka/bin"));
    candidates.push(PathBuf::from("/usr/local/kafka/bin"));

    candidates
        .into_iter()
        .find(|dir| dir.join(PRODUCER_SCRIPT).exists())
        .ok_or_else(|| {
            anyhow!(
                "Cannot find Kafka binaries (looked for {} under {}). Set kafka_home in the connection config",
                PRODUCER_SCRIPT,
                kafka_home.map_or_else(|| "<unset>".to_string(), |p| p.display().to_string())
            )
        })
}

pub fn create_topic_args(config: &ConnectionConfig, topic: &TopicRequest, command_config: &Path) -> Vec<String> {
    let mut args = vec![
        "--bootstrap-server".to_string(),
        config.bootstrap_servers.clone(),
        "--create".to_string(),
        "--topic".to_string(),
        topic.name.clone(),
        "--partitions".to_string(),
        topic.partitions.to_string(),
        "--replication-factor".to_string(),
        topic.replication_factor.to_string(),
        "--command-config".to_string(),
        command_config.display().to_string(),
    ];
    for entry in config.topic_config_entries() {
        args.push("--config".to_string());
        args.push(entry);
    }
    args
}

pub fn delete_topic_args(config: &ConnectionConfig, name: &str, command_config: &Path) -> Vec<String> {
    vec![
        "--bootstrap-server".to_string(),
        config.bootstrap_servers.clone(),
        "--delete".to_string(),
        "--topic".to_string(),
        name.to_string(),
        "--command-config".to_string(),
        command_config.display().to_string(),
    ]
}

pub fn list_topics_args(config: &ConnectionConfig, command_config: &Path) -> Vec<String> {
    vec![
        "--bootstrap-server".to_string(),
        config.bootstrap_servers.clone(),
        "--list".to_string(),
        "--command-config".to_string(),
        command_config.display().to_string(),
    ]
}

/// Arguments for `kafka-producer-perf-test.sh`
///
/// `--producer-props` takes the bootstrap servers followed by the
/// combination's producer properties; security settings go through
/// `--producer.config`.
pub fn producer_args(
    config: &ConnectionConfig,
    invocation: &ProducerInvocation,
    producer_config: &Path,
) -> Vec<String> {
    let combination = &invocation.combination;
    let mut args = vec![
        "--topic".to_string(),
        invocation.topic.clone(),
        "--num-records".to_string(),
        combination.producer_num_records().to_string(),
        "--throughput".to_string(),
        combination.producer_records_per_sec().to_string(),
        "--record-size".to_string(),
        combination.record_size_byte.to_string(),
        "--producer-props".to_string(),
        format!("bootstrap.servers={}", config.bootstrap_servers),
    ];
    args.extend(
        combination
            .client_props
            .producer
            .split_whitespace()
            .map(str::to_string),
    );
    args.push("--producer.config".to_string());
    args.push(producer_config.display().to_string());
    args
}

/// Arguments for `kafka-consumer-perf-test.sh`
pub fn consumer_args(
    config: &ConnectionConfig,
    invocation: &ConsumerInvocation,
    consumer_config: &Path,
) -> Vec<String> {
    let combination = &invocation.combination;
    vec![
        "--topic".to_string(),
        invocation.topic.clone(),
        "--messages".to_string(),
        combination.consumer_message_quota().to_string(),
        "--bootstrap-server".to_string(),
        config.bootstrap_servers.clone(),
        "--group".to_string(),
        invocation.group_id.clone(),
        "--timeout".to_string(),
        combination.consumer_timeout_ms().to_string(),
        "--consumer.config".to_string(),
        consumer_config.display().to_string(),
        "--print-metrics".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TestSpecification;
    use crate::sweep::{enumerate, AxisMode};

    fn combination() -> ParameterCombination {
        let spec = TestSpecification::from_json_str(
            r#"{
                "cluster_throughput_mb_per_sec": [8],
                "num_producers": [2],
                "consumer_groups": [{"num_groups": 1, "size": 2}],
                "client_props": [{"producer": "acks=1 linger.ms=10", "consumer": "fetch.min.bytes=1"}],
                "duration_sec": [60],
                "record_size_byte": [1024]
            }"#,
        )
        .unwrap();
        enumerate(&spec, AxisMode::Full).remove(0)
    }

    #[test]
    fn test_producer_args() {
        let config = ConnectionConfig::default();
        let invocation = ProducerInvocation {
            test_id: "t0001".to_string(),
            test_sequence: 1,
            index: 0,
            topic: "perf-x".to_string(),
            combination: combination(),
            watchdog: Duration::from_secs(180),
        };
        let args = producer_args(&config, &invocation, Path::new("/tmp/sec.properties"));
        assert_eq!(
            args,
            vec![
                "--topic",
                "perf-x",
                "--num-records",
                "245760",
                "--throughput",
                "4096",
                "--record-size",
                "1024",
                "--producer-props",
                "bootstrap.servers=localhost:9092",
                "acks=1",
                "linger.ms=10",
                "--producer.config",
                "/tmp/sec.properties",
            ]
        );
    }

    #[test]
    fn test_consumer_args() {
        let config = ConnectionConfig::default();
        let invocation = ConsumerInvocation {
            test_id: "t0001".to_string(),
            test_sequence: 1,
            group_index: 0,
            member_index: 1,
            group_id: "perf-x-group-0".to_string(),
            topic: "perf-x".to_string(),
            combination: combination(),
            watchdog: Duration::from_secs(180),
        };
        let args = consumer_args(&config, &invocation, Path::new("/tmp/c.properties"));
        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[position("--messages") + 1], "245760");
        assert_eq!(args[position("--timeout") + 1], "70000");
        assert_eq!(args[position("--group") + 1], "perf-x-group-0");
        assert_eq!(args[position("--consumer.config") + 1], "/tmp/c.properties");
    }

    #[test]
    fn test_topic_args_include_configs() {
        let config = ConnectionConfig {
            retention_ms: Some(1000),
            ..ConnectionConfig::default()
        };
        let topic = TopicRequest {
            name: "perf-x".to_string(),
            partitions: 12,
            replication_factor: 3,
        };
        let args = create_topic_args(&config, &topic, Path::new("/tmp/s"));
        assert!(args.windows(2).any(|w| w[0] == "--partitions" && w[1] == "12"));
        assert!(args.windows(2).any(|w| w[0] == "--config" && w[1] == "retention.ms=1000"));

        let args = delete_topic_args(&config, "perf-x", Path::new("/tmp/s"));
        assert!(args.contains(&"--delete".to_string()));
    }

    #[test]
    fn test_locate_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("kafka_2.13-3.7.0").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(PRODUCER_SCRIPT), "#!/bin/sh\n").unwrap();
        assert_eq!(locate_bin_dir(Some(dir.path())).unwrap(), bin);
    }

    #[tokio::test]
    async fn test_missing_install_fails_only_the_environment_check() {
        let dir = tempfile::tempdir().unwrap();
        if locate_bin_dir(Some(dir.path())).is_ok() {
            // A system-wide install is visible; nothing to assert here.
            return;
        }
        let config = ConnectionConfig {
            kafka_home: Some(dir.path().to_path_buf()),
            ..ConnectionConfig::default()
        };
        let driver = KafkaCliDriver::new(config).unwrap();
        assert_eq!(driver.script(TOPICS_SCRIPT), PathBuf::from(TOPICS_SCRIPT));

        let err = driver.check_environment().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Cannot find Kafka binaries"), "{:#}", err);
    }

    #[test]
    fn test_outcome_success() {
        assert!(ProcessOutcome::Exited {
            exit_code: Some(0),
            elapsed_sec: 1.0
        }
        .is_success());
        assert!(!ProcessOutcome::Exited {
            exit_code: Some(1),
            elapsed_sec: 1.0
        }
        .is_success());
        assert!(!ProcessOutcome::TimedOut { elapsed_sec: 5.0 }.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watchdog_kills_hung_tool() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for script in [TOPICS_SCRIPT, CONSUMER_SCRIPT] {
            std::fs::write(dir.path().join(script), "#!/bin/sh\nexit 0\n").unwrap();
        }
        let producer = dir.path().join(PRODUCER_SCRIPT);
        std::fs::write(&producer, "#!/bin/sh\necho starting\nexec sleep 30\n").unwrap();
        for script in [TOPICS_SCRIPT, CONSUMER_SCRIPT, PRODUCER_SCRIPT] {
            let path = dir.path().join(script);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = ConnectionConfig {
            kafka_home: Some(dir.path().to_path_buf()),
            ..ConnectionConfig::default()
        };
        let driver = KafkaCliDriver::new(config).unwrap();
        let invocation = ProducerInvocation {
            test_id: "t0001".to_string(),
            test_sequence: 1,
            index: 0,
            topic: "perf-x".to_string(),
            combination: combination(),
            watchdog: Duration::from_millis(500),
        };
        let log = dir.path().join("producer.log");
        let outcome = driver.run_producer(&invocation, &log).await;
        assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }), "{:?}", outcome);
    }
}
