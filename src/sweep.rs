//! # Combination Enumerator
//!
//! Expands a [`TestSpecification`] into the ordered list of fully resolved
//! [`ParameterCombination`]s the sweep runner executes. Every derived value
//! a test case needs (record rates, record counts, consumer quota and
//! timeout) is computed here from the combination alone, so the executor
//! never re-derives parameters on its own.
//!
//! ## Iteration Order
//!
//! Outer to inner: record size, duration, replication factor, partition
//! count, client properties, producer count, consumer group shape and
//! finally throughput. A configuration's throughput series therefore runs
//! back to back in input order, which is what the skip evaluator cuts short.

use serde::{Deserialize, Serialize};

use crate::spec::{ClientProps, ConsumerGroupShape, TestSpecification};

/// Bytes in one of the "MB" Kafka's tools report (they use 1024 * 1024)
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Which axes participate in the cartesian product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AxisMode {
    /// Iterate every axis
    #[default]
    #[value(name = "full")]
    Full,

    /// Use only the first value of partitions, replication factor, duration
    /// and record size
    #[value(name = "first")]
    FirstValue,
}

/// One fully resolved point of the parameter space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCombination {
    pub throughput_mb_per_sec: f64,
    /// Position of `throughput_mb_per_sec` in the specification's axis
    pub throughput_index: usize,
    pub num_producers: u32,
    pub consumer_groups: ConsumerGroupShape,
    pub client_props: ClientProps,
    /// Position of `client_props` in the specification's axis
    pub client_props_index: usize,
    pub num_partitions: u32,
    pub replication_factor: u32,
    pub duration_sec: u64,
    pub record_size_byte: u64,
}

/// Everything that identifies a configuration except its throughput
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigurationKey {
    pub num_producers: u32,
    pub num_groups: u32,
    pub group_size: u32,
    pub client_props_index: usize,
    pub num_partitions: u32,
    pub replication_factor: u32,
    pub record_size_byte: u64,
    pub duration_sec: u64,
}

impl std::fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "producers={} groups={}x{} props#{} partitions={} rf={} record={}B duration={}s",
            self.num_producers,
            self.num_groups,
            self.group_size,
            self.client_props_index,
            self.num_partitions,
            self.replication_factor,
            self.record_size_byte,
            self.duration_sec
        )
    }
}

impl ParameterCombination {
    /// Cluster-wide target rate: `floor(throughput * 1024 * 1024 / record_size)`
    ///
    /// Every record count and throughput cap handed to the benchmark tools,
    /// and the expected throughput used in ratio checks, derive from this
    /// value through `producer_records_per_sec`.
    pub fn records_per_sec(&self) -> u64 {
        (self.throughput_mb_per_sec * BYTES_PER_MB as f64 / self.record_size_byte as f64).floor()
            as u64
    }

    /// Throughput cap for each producer, so that together they hit the
    /// cluster-wide target
    pub fn producer_records_per_sec(&self) -> u64 {
        (self.records_per_sec() / self.num_producers.max(1) as u64).max(1)
    }

    /// Sum of the producers' throughput caps
    ///
    /// Differs from `records_per_sec` when the target does not split evenly
    /// across the producers or is below one record per producer.
    pub fn requested_records_per_sec(&self) -> u64 {
        self.producer_records_per_sec()
            .saturating_mul(self.num_producers.max(1) as u64)
    }

    /// `--num-records` for each producer
    pub fn producer_num_records(&self) -> u64 {
        self.producer_records_per_sec().saturating_mul(self.duration_sec)
    }

    /// `--messages` for each consumer: everything the producers send,
    /// divided by the producer count
    pub fn consumer_message_quota(&self) -> u64 {
        self.requested_records_per_sec().saturating_mul(self.duration_sec)
            / self.num_producers.max(1) as u64
    }

    /// `--timeout` for each consumer: nominal duration plus a 10 second grace
    pub fn consumer_timeout_ms(&self) -> u64 {
        self.duration_sec
            .saturating_mul(1000)
            .saturating_add(crate::defaults::CONSUMER_TIMEOUT_GRACE_MS)
    }

    /// Throughput the producers were actually asked for, in MB/s
    pub fn expected_mb_per_sec(&self) -> f64 {
        self.requested_records_per_sec() as f64 * self.record_size_byte as f64
            / BYTES_PER_MB as f64
    }

    pub fn num_consumers(&self) -> u32 {
        self.consumer_groups.num_consumers()
    }

    pub fn configuration_key(&self) -> ConfigurationKey {
        ConfigurationKey {
            num_producers: self.num_producers,
            num_groups: self.consumer_groups.num_groups,
            group_size: self.consumer_groups.size,
            client_props_index: self.client_props_index,
            num_partitions: self.num_partitions,
            replication_factor: self.replication_factor,
            record_size_byte: self.record_size_byte,
            duration_sec: self.duration_sec,
        }
    }
}

/// Number of combinations `enumerate` will produce
pub fn combination_count(spec: &TestSpecification, mode: AxisMode) -> usize {
    let core = spec.cluster_throughput_mb_per_sec.len()
        * spec.num_producers.len()
        * spec.consumer_groups.len()
        * spec.client_props.len();
    let secondary = [
        spec.num_partitions.len(),
        spec.replication_factor.len(),
        spec.duration_sec.len(),
        spec.record_size_byte.len(),
    ];
    match mode {
        AxisMode::Full => core * secondary.iter().product::<usize>(),
        AxisMode::FirstValue => core * secondary.iter().map(|len| (*len).min(1)).product::<usize>(),
    }
}

/// Expand a specification into its ordered combinations
///
/// Pure: no I/O, no randomness. An empty axis yields an empty result.
pub fn enumerate(spec: &TestSpecification, mode: AxisMode) -> Vec<ParameterCombination> {
    fn leading<T>(values: &[T], mode: AxisMode) -> &[T] {
        match mode {
            AxisMode::Full => values,
            AxisMode::FirstValue => &values[..values.len().min(1)],
        }
    }

    let mut combinations = Vec::with_capacity(combination_count(spec, mode));

    for &record_size_byte in leading(&spec.record_size_byte, mode) {
        for &duration_sec in leading(&spec.duration_sec, mode) {
            for &replication_factor in leading(&spec.replication_factor, mode) {
                for &num_partitions in leading(&spec.num_partitions, mode) {
                    for (client_props_index, client_props) in spec.client_props.iter().enumerate() {
                        for &num_producers in &spec.num_producers {
                            for &consumer_groups in &spec.consumer_groups {
                                for (throughput_index, &throughput_mb_per_sec) in
                                    spec.cluster_throughput_mb_per_sec.iter().enumerate()
                                {
                                    combinations.push(ParameterCombination {
                                        throughput_mb_per_sec,
                                        throughput_index,
                                        num_producers,
                                        consumer_groups,
                                        client_props: client_props.clone(),
                                        client_props_index,
                                        num_partitions,
                                        replication_factor,
                                        duration_sec,
                                        record_size_byte,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    combinations
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn spec(value: serde_json::Value) -> TestSpecification {
        TestSpecification::from_value(value).unwrap()
    }

    fn sample() -> TestSpecification {
        spec(json!({
            "cluster_throughput_mb_per_sec": [10, 20, 30],
            "num_producers": [1, 2],
            "consumer_groups": [{"num_groups": 0, "size": 2}, {"num_groups": 2, "size": 3}],
            "client_props": [{"producer": "acks=1"}, {"producer": "acks=all"}],
            "num_partitions": [6, 12],
            "replication_factor": [3],
            "duration_sec": [60, 120],
            "record_size_byte": [1024]
        }))
    }

    #[test]
    fn test_full_product_count_and_distinct() {
        let spec = sample();
        let combinations = enumerate(&spec, AxisMode::Full);
        assert_eq!(combinations.len(), 3 * 2 * 2 * 2 * 2 * 1 * 2 * 1);
        assert_eq!(combinations.len(), combination_count(&spec, AxisMode::Full));

        let distinct: HashSet<String> = combinations
            .iter()
            .map(|c| format!("{:?}", c))
            .collect();
        assert_eq!(distinct.len(), combinations.len());
    }

    #[test]
    fn test_first_value_mode_holds_secondary_axes() {
        let spec = sample();
        let combinations = enumerate(&spec, AxisMode::FirstValue);
        assert_eq!(combinations.len(), 3 * 2 * 2 * 2);
        assert_eq!(combinations.len(), combination_count(&spec, AxisMode::FirstValue));
        assert!(combinations
            .iter()
            .all(|c| c.num_partitions == 6 && c.duration_sec == 60));
    }

    #[test]
    fn test_throughput_varies_fastest_in_input_order() {
        let spec = sample();
        let combinations = enumerate(&spec, AxisMode::Full);
        for chunk in combinations.chunks(3) {
            let throughputs: Vec<f64> = chunk.iter().map(|c| c.throughput_mb_per_sec).collect();
            assert_eq!(throughputs, vec![10.0, 20.0, 30.0]);
            let key = chunk[0].configuration_key();
            assert!(chunk.iter().all(|c| c.configuration_key() == key));
        }
        // Outer axes follow input order too.
        assert_eq!(combinations[0].num_producers, 1);
        assert_eq!(combinations[0].consumer_groups.num_groups, 0);
        assert_eq!(combinations[3].consumer_groups.num_groups, 2);
        assert_eq!(combinations[6].num_producers, 2);
    }

    #[test]
    fn test_derived_values() {
        let spec = spec(json!({
            "cluster_throughput_mb_per_sec": [10],
            "num_producers": [4],
            "duration_sec": [60],
            "record_size_byte": [1024]
        }));
        let c = &enumerate(&spec, AxisMode::Full)[0];
        assert_eq!(c.records_per_sec(), 10 * 1024);
        assert_eq!(c.producer_records_per_sec(), 2560);
        assert_eq!(c.producer_num_records(), 2560 * 60);
        assert_eq!(c.consumer_message_quota(), 10 * 1024 * 60 / 4);
        assert_eq!(c.consumer_timeout_ms(), 70_000);
        assert_eq!(c.expected_mb_per_sec(), 10.0);
    }

    #[test]
    fn test_records_per_sec_truncates() {
        let spec = spec(json!({
            "cluster_throughput_mb_per_sec": [0.1],
            "num_producers": [1],
            "record_size_byte": [1000]
        }));
        let c = &enumerate(&spec, AxisMode::Full)[0];
        // 0.1 * 1048576 / 1000 = 104.8576
        assert_eq!(c.records_per_sec(), 104);
        assert_eq!(c.requested_records_per_sec(), 104);
        assert!((c.expected_mb_per_sec() - 104.0 * 1000.0 / 1048576.0).abs() < 1e-12);
    }

    #[test]
    fn test_uneven_producer_split_matches_requested_rate() {
        let spec = spec(json!({
            "cluster_throughput_mb_per_sec": [0.01, 0.001, 10],
            "num_producers": [3, 6],
            "duration_sec": [60],
            "record_size_byte": [1024]
        }));
        for c in enumerate(&spec, AxisMode::Full) {
            let per_producer = c.producer_records_per_sec();
            let handed_out = per_producer * c.num_producers as u64;
            assert_eq!(c.requested_records_per_sec(), handed_out);

            // A cluster that delivers exactly what each producer was asked for
            let delivered_mb = (handed_out * c.record_size_byte) as f64 / BYTES_PER_MB as f64;
            let ratio = delivered_mb / c.expected_mb_per_sec();
            assert!((ratio - 1.0).abs() < 1e-12, "{:?} ratio {}", c, ratio);

            assert_eq!(c.consumer_message_quota(), c.producer_num_records());
        }

        let combinations = enumerate(&spec, AxisMode::Full);
        // 0.01 MB/s of 1 KiB records is 10 records/s
        let three = &combinations[0];
        assert_eq!((three.records_per_sec(), three.producer_records_per_sec()), (10, 3));
        assert_eq!(three.requested_records_per_sec(), 9);
        // Below one record per producer every producer still sends one
        let six = &combinations[4];
        assert_eq!((six.records_per_sec(), six.num_producers), (1, 6));
        assert_eq!(six.requested_records_per_sec(), 6);
        assert_eq!(six.consumer_message_quota(), 60);
    }

    #[test]
    fn test_empty_axis_yields_nothing() {
        let mut spec = sample();
        spec.num_producers.clear();
        assert!(enumerate(&spec, AxisMode::Full).is_empty());
        assert_eq!(combination_count(&spec, AxisMode::Full), 0);
    }
}
