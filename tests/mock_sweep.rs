use anyhow::Result;
use kafka_perf_sweep::{
    compare,
    report::{self, ReportOptions},
    AxisMode, ExecutorSettings, MockDriver, MockProfile, ResultsManager, RunnerSettings,
    SpecError, SweepOutcome, SweepRunner, TestCaseExecutor, TestResult, TestSpecification,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run a whole sweep against the mock driver with every pause disabled.
async fn run_mock_sweep(
    spec: TestSpecification,
    run_dir: &Path,
    profile: MockProfile,
    axis_mode: AxisMode,
) -> Result<(SweepOutcome, Vec<TestResult>)> {
    let results = ResultsManager::new(run_dir)?;
    let executor = TestCaseExecutor::new(
        Arc::new(MockDriver::new(profile)),
        ExecutorSettings {
            run_dir: run_dir.to_path_buf(),
            run_tag: "it".to_string(),
            process_grace: Duration::from_secs(5),
            topic_settle: Duration::ZERO,
        },
    );
    let settings = RunnerSettings {
        test_name: "integration".to_string(),
        axis_mode,
        inter_test_pause: Duration::ZERO,
        mock: true,
    };
    let outcome = SweepRunner::new(spec, executor, results, settings).run().await?;
    let loaded = ResultsManager::load_results(run_dir)?;
    Ok((outcome, loaded))
}

fn spec(value: serde_json::Value) -> TestSpecification {
    TestSpecification::from_value(value).expect("valid specification")
}

fn log_files(dir: &Path, marker: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(marker) && n.ends_with(".log"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn producers_only_sweep_persists_one_result_per_throughput() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "test_specification": {
            "parameters": {
                "cluster_throughput_mb_per_sec": [10, 20],
                "num_producers": [2],
                "consumer_groups": [{"num_groups": 0, "size": 2}],
                "client_props": [{"producer": "acks=all", "consumer": ""}],
                "num_partitions": [6],
                "replication_factor": [1],
                "duration_sec": [30],
                "record_size_byte": [1024]
            }
        }
    }));

    let (outcome, results) =
        run_mock_sweep(spec, dir.path(), MockProfile::default(), AxisMode::Full).await?;

    assert_eq!(outcome.total_combinations, 2);
    assert_eq!(outcome.executed, 2);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.skipped.is_empty());
    assert_eq!(results.len(), 2);

    for result in &results {
        assert!(result.status.is_completed());
        assert!(result.mock);
        assert_eq!(result.producers.len(), 2);
        assert!(result.consumers.is_empty());
        for producer in &result.producers {
            assert!(dir.path().join(&producer.log_file).exists());
            assert!(producer.metrics.mb_per_sec.is_some());
        }
        assert!(result.summary.producer_mb_per_sec.unwrap() > 0.0);
        assert!(result.summary.consumer_mb_per_sec.is_none());
    }
    assert_eq!(log_files(dir.path(), "-producer-").len(), 4);
    assert!(log_files(dir.path(), "-consumer-").is_empty());
    assert!(dir.path().join("sweep_summary.json").exists());
    Ok(())
}

#[tokio::test]
async fn consumer_group_members_share_one_group_id() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "cluster_throughput_mb_per_sec": [10, 20],
        "num_producers": 2,
        "consumer_groups": [{"num_groups": 1, "size": 3}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 30
    }));

    let (_, results) =
        run_mock_sweep(spec, dir.path(), MockProfile::default(), AxisMode::Full).await?;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.consumers.len(), 3);
        let first = &result.consumers[0].group_id;
        assert!(result.consumers.iter().all(|c| &c.group_id == first));
        assert!(result.consumers.iter().all(|c| c.metrics.mb_per_sec.is_some()));
        assert!(result.summary.consumer_mb_per_sec.is_some());
    }
    assert_eq!(log_files(dir.path(), "-consumer-").len(), 6);
    Ok(())
}

#[tokio::test]
async fn saturated_throughput_skips_the_rest_of_its_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "test_specification": {
            "parameters": {
                "cluster_throughput_mb_per_sec": [10, 50, 100, 150],
                "num_producers": [2],
                "consumer_groups": [{"num_groups": 0, "size": 1}],
                "num_partitions": [6],
                "replication_factor": [1],
                "duration_sec": [30]
            },
            "skip_remaining_throughput": {
                "less-than": ["sent_div_requested_mb_per_sec", 0.95]
            }
        }
    }));
    let profile = MockProfile {
        knee_mb_per_sec: 50.0,
        saturated_ratio: 0.80,
        ..MockProfile::default()
    };

    let (outcome, results) = run_mock_sweep(spec, dir.path(), profile, AxisMode::Full).await?;

    let executed: Vec<f64> = results
        .iter()
        .map(|r| r.combination.throughput_mb_per_sec)
        .collect();
    assert_eq!(executed, vec![10.0, 50.0]);
    let skipped: Vec<f64> = outcome
        .skipped
        .iter()
        .map(|s| s.throughput_mb_per_sec)
        .collect();
    assert_eq!(skipped, vec![100.0, 150.0]);

    let ratio_at_knee = results[1].summary.sent_div_requested_mb_per_sec.unwrap();
    assert!(ratio_at_knee < 0.95, "ratio {}", ratio_at_knee);
    let ratio_below_knee = results[0].summary.sent_div_requested_mb_per_sec.unwrap();
    assert!(ratio_below_knee >= 0.95, "ratio {}", ratio_below_knee);
    Ok(())
}

#[tokio::test]
async fn skip_is_scoped_to_one_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "cluster_throughput_mb_per_sec": [10, 50, 100],
        "num_producers": [1, 2],
        "consumer_groups": [{"num_groups": 0, "size": 1}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 30,
        "skip_remaining_throughput": {"less-than": ["sent_div_requested_mb_per_sec", 0.95]}
    }));
    let profile = MockProfile {
        knee_mb_per_sec: 50.0,
        ..MockProfile::default()
    };

    let (outcome, results) = run_mock_sweep(spec, dir.path(), profile, AxisMode::Full).await?;

    assert_eq!(outcome.total_combinations, 6);
    assert_eq!(results.len(), 4);
    assert_eq!(outcome.skipped.len(), 2);
    for producers in [1, 2] {
        let levels: Vec<f64> = results
            .iter()
            .filter(|r| r.combination.num_producers == producers)
            .map(|r| r.combination.throughput_mb_per_sec)
            .collect();
        assert_eq!(levels, vec![10.0, 50.0]);
    }
    Ok(())
}

#[test]
fn missing_throughput_axis_is_rejected() {
    let err = TestSpecification::from_value(json!({
        "test_specification": {"parameters": {"num_producers": [2]}}
    }))
    .unwrap_err();
    assert!(matches!(err, SpecError::MalformedSpec { .. }), "{:?}", err);
}

#[tokio::test]
async fn unparsable_producer_output_degrades_to_missing_metrics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "cluster_throughput_mb_per_sec": [10, 20],
        "num_producers": 2,
        "consumer_groups": [{"num_groups": 1, "size": 1}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 30
    }));
    let (_, mut results) =
        run_mock_sweep(spec, dir.path(), MockProfile::default(), AxisMode::Full).await?;

    let broken = &mut results[0];
    for producer in &broken.producers {
        std::fs::write(
            dir.path().join(&producer.log_file),
            "org.apache.kafka.common.errors.TimeoutException: Topic not present in metadata\n",
        )?;
    }
    broken.finalize(dir.path());

    assert!(broken.producers.iter().all(|p| p.metrics.is_empty()));
    assert!(broken.summary.producer_mb_per_sec.is_none());
    assert!(broken.summary.avg_latency_ms.is_none());
    assert!(broken.summary.sent_div_requested_mb_per_sec.is_none());
    assert!(broken.summary.consumer_mb_per_sec.is_some());

    let mut manager = ResultsManager::new(dir.path())?;
    manager.add_result(broken.clone())?;

    let options = ReportOptions {
        output_dir: dir.path().join("reports"),
        test_name: "integration".to_string(),
        text: true,
        csv: true,
        plots: true,
    };
    let artifacts = report::generate_for_run(dir.path(), &options)?;

    let text = std::fs::read_to_string(dir.path().join("reports").join(report::TEXT_REPORT_FILE))?;
    assert!(text.contains("KAFKA PERFORMANCE TEST REPORT"));
    assert!(text.contains("MOCK DATA"));
    assert!(text.contains("n/a"));
    assert!(text.contains("END OF REPORT"));
    assert!(artifacts.skipped_charts.is_empty());
    assert!(dir
        .path()
        .join("reports")
        .join("05_consumer_throughput.svg")
        .exists());

    let csv = std::fs::read_to_string(dir.path().join("reports").join(report::PRODUCER_CSV_FILE))?;
    assert_eq!(csv.lines().count(), 1 + 4);
    Ok(())
}

#[tokio::test]
async fn same_seed_produces_identical_logs() -> Result<()> {
    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;
    let value = json!({
        "cluster_throughput_mb_per_sec": [10, 300],
        "num_producers": 2,
        "consumer_groups": [{"num_groups": 2, "size": 2}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 60
    });

    run_mock_sweep(
        spec(value.clone()),
        first.path(),
        MockProfile::default(),
        AxisMode::Full,
    )
    .await?;
    run_mock_sweep(
        spec(value),
        second.path(),
        MockProfile::default(),
        AxisMode::Full,
    )
    .await?;

    let names = log_files(first.path(), "");
    assert_eq!(names.len(), 2 * (2 + 4));
    assert_eq!(names, log_files(second.path(), ""));
    for name in &names {
        let a = std::fs::read(first.path().join(name))?;
        let b = std::fs::read(second.path().join(name))?;
        assert_eq!(a, b, "log {} differs between runs", name);
    }
    Ok(())
}

#[tokio::test]
async fn reloaded_results_match_a_fresh_parse_of_their_logs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = spec(json!({
        "cluster_throughput_mb_per_sec": [25],
        "num_producers": 3,
        "consumer_groups": [{"num_groups": 1, "size": 2}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 30
    }));

    let (_, loaded) =
        run_mock_sweep(spec, dir.path(), MockProfile::default(), AxisMode::Full).await?;
    let result = &loaded[0];

    let (producers, consumers) = result.reparse(dir.path());
    let persisted: Vec<_> = result.producers.iter().map(|p| p.metrics.clone()).collect();
    assert_eq!(producers, persisted);
    let persisted: Vec<_> = result.consumers.iter().map(|c| c.metrics.clone()).collect();
    assert_eq!(consumers, persisted);

    let mut refinalized = result.clone();
    refinalized.finalize(dir.path());
    assert_eq!(refinalized.summary, result.summary);
    Ok(())
}

fn secondary_axes_spec() -> serde_json::Value {
    json!({
        "cluster_throughput_mb_per_sec": [10, 50, 100],
        "num_producers": [2],
        "consumer_groups": [{"num_groups": 0, "size": 1}],
        "num_partitions": [6, 12],
        "replication_factor": [1, 3],
        "duration_sec": [30, 60],
        "record_size_byte": [1024, 512],
        "skip_remaining_throughput": {"less-than": ["sent_div_requested_mb_per_sec", 0.95]}
    })
}

#[tokio::test]
async fn first_value_axis_mode_holds_secondary_axes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (outcome, results) = run_mock_sweep(
        spec(secondary_axes_spec()),
        dir.path(),
        MockProfile::default(),
        AxisMode::FirstValue,
    )
    .await?;

    assert_eq!(outcome.total_combinations, 3);
    assert_eq!(results.len(), 3);
    for result in &results {
        let c = &result.combination;
        assert_eq!(
            (c.num_partitions, c.replication_factor, c.duration_sec, c.record_size_byte),
            (6, 1, 30, 1024)
        );
    }
    Ok(())
}

#[tokio::test]
async fn skip_is_scoped_across_secondary_axes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = MockProfile {
        knee_mb_per_sec: 50.0,
        ..MockProfile::default()
    };
    let (outcome, results) =
        run_mock_sweep(spec(secondary_axes_spec()), dir.path(), profile, AxisMode::Full).await?;

    // 16 configurations, each running 10 and 50 MB/s before saturating
    assert_eq!(outcome.total_combinations, 48);
    assert_eq!(results.len(), 32);
    assert_eq!(outcome.skipped.len(), 16);
    assert!(outcome.skipped.iter().all(|s| s.throughput_mb_per_sec == 100.0));

    let configurations: BTreeSet<_> = results
        .iter()
        .map(|r| r.combination.configuration_key())
        .collect();
    assert_eq!(configurations.len(), 16);
    for key in &configurations {
        let levels: Vec<f64> = results
            .iter()
            .filter(|r| &r.combination.configuration_key() == key)
            .map(|r| r.combination.throughput_mb_per_sec)
            .collect();
        assert_eq!(levels, vec![10.0, 50.0], "{}", key);
    }
    let skipped: BTreeSet<_> = outcome.skipped.iter().map(|s| s.configuration.clone()).collect();
    assert_eq!(skipped, configurations);
    Ok(())
}

#[tokio::test]
async fn uneven_producer_split_is_not_mistaken_for_saturation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // 10 MB/s of 1 MB records is 10 records/s; four producers get 2 each.
    let spec = spec(json!({
        "cluster_throughput_mb_per_sec": [10, 11],
        "num_producers": 4,
        "consumer_groups": [{"num_groups": 1, "size": 1}],
        "num_partitions": 6,
        "replication_factor": 1,
        "duration_sec": 30,
        "record_size_byte": 1000000,
        "skip_remaining_throughput": {"less-than": ["sent_div_requested_mb_per_sec", 0.95]}
    }));

    let (outcome, results) =
        run_mock_sweep(spec, dir.path(), MockProfile::default(), AxisMode::Full).await?;

    assert!(outcome.skipped.is_empty());
    assert_eq!(results.len(), 2);
    for result in &results {
        let c = &result.combination;
        assert_eq!(c.requested_records_per_sec(), 8);
        assert_eq!(c.consumer_message_quota(), c.producer_num_records());
        let ratio = result.summary.sent_div_requested_mb_per_sec.unwrap();
        assert!((0.95..1.02).contains(&ratio), "ratio {}", ratio);
    }
    Ok(())
}

#[tokio::test]
async fn comparison_ranks_runs_by_throughput() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let runs = [("brokers-3", 3, 50.0), ("brokers-6", 6, 200.0)];
    let mut run_dirs = Vec::new();
    for (name, producers, knee) in runs {
        let run_dir = dir.path().join(name);
        let spec = spec(json!({
            "cluster_throughput_mb_per_sec": [25, 50, 100],
            "num_producers": producers,
            "num_partitions": 6,
            "replication_factor": 1,
            "duration_sec": 30,
            "record_size_byte": 1024
        }));
        let profile = MockProfile {
            knee_mb_per_sec: knee,
            ..MockProfile::default()
        };
        run_mock_sweep(spec, &run_dir, profile, AxisMode::Full).await?;
        run_dirs.push(run_dir);
    }

    let output_dir = dir.path().join("comparison");
    let artifacts = compare::generate_comparison(&run_dirs, &output_dir, true)?;
    assert_eq!(artifacts.written.len(), 5);
    assert!(artifacts.skipped_charts.is_empty());
    for name in [
        compare::COMPARISON_CSV_FILE,
        compare::COMPARISON_TEXT_FILE,
        compare::LIMIT_SUMMARY_FILE,
        compare::THROUGHPUT_CHART_FILE,
        compare::SCALING_CHART_FILE,
    ] {
        assert!(output_dir.join(name).is_file(), "{}", name);
    }

    let summary_path = output_dir.join(compare::LIMIT_SUMMARY_FILE);
    let summary: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(summary_path)?)?;
    assert_eq!(summary["baseline"], "brokers-3");
    assert_eq!(summary["best_run"], "brokers-6");
    assert_eq!(summary["runs"][0]["sustained_mb_per_sec"], 25.0);
    assert_eq!(summary["runs"][1]["sustained_mb_per_sec"], 100.0);
    assert_eq!(summary["runs"][1]["max_producers"], 6);
    assert!(summary["runs"][1]["scaling_efficiency_pct"].as_f64().is_some());

    let text = std::fs::read_to_string(output_dir.join(compare::COMPARISON_TEXT_FILE))?;
    assert!(text.contains("Best performance: brokers-6"));
    Ok(())
}
