//! The sequential sweep loop.
//!
//! Enumerates the specification, runs each combination through the
//! [`TestCaseExecutor`], persists its result immediately and consults the
//! [`SkipTracker`] before starting the next one. Test ids follow enumeration
//! order, so a skipped combination leaves a gap in the numbering.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::executor::TestCaseExecutor;
use crate::results::{ResultsManager, SkippedCase, SweepSummary, SystemInfo};
use crate::skip::SkipTracker;
use crate::spec::TestSpecification;
use crate::sweep::{enumerate, AxisMode};
use crate::utils::{format_mb_per_sec, format_optional};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub test_name: String,
    pub axis_mode: AxisMode,
    /// Pause between consecutive test cases; ignored for mock drivers
    pub inter_test_pause: Duration,
    pub mock: bool,
}

/// What a finished sweep did
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub run_dir: PathBuf,
    pub total_combinations: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: Vec<SkippedCase>,
}

pub struct SweepRunner {
    spec: TestSpecification,
    executor: TestCaseExecutor,
    results: ResultsManager,
    settings: RunnerSettings,
}

impl SweepRunner {
    pub fn new(
        spec: TestSpecification,
        executor: TestCaseExecutor,
        results: ResultsManager,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            spec,
            executor,
            results,
            settings,
        }
    }

    pub async fn run(&mut self) -> Result<SweepOutcome> {
        let started_at = Utc::now();
        let combinations = enumerate(&self.spec, self.settings.axis_mode);
        let mut tracker = SkipTracker::new(self.spec.skip_condition.clone());
        let mut skipped = Vec::new();
        let mut executed = 0usize;
        let mut failed = 0usize;

        info!(
            "Sweep '{}': {} combinations ({:?} axis mode){}",
            self.settings.test_name,
            combinations.len(),
            self.settings.axis_mode,
            if self.settings.mock { ", mock data" } else { "" }
        );

        for (position, combination) in combinations.iter().enumerate() {
            if tracker.is_skipped(combination) {
                info!(
                    "Skipping {} for {}: an earlier throughput met the skip condition",
                    format_mb_per_sec(combination.throughput_mb_per_sec),
                    combination.configuration_key()
                );
                skipped.push(SkippedCase {
                    configuration: combination.configuration_key(),
                    throughput_mb_per_sec: combination.throughput_mb_per_sec,
                });
                continue;
            }

            if executed > 0 && !self.settings.mock && !self.settings.inter_test_pause.is_zero() {
                info!("Waiting {:?} before the next test...", self.settings.inter_test_pause);
                tokio::time::sleep(self.settings.inter_test_pause).await;
            }

            let result = self.executor.run(combination, position + 1).await;
            executed += 1;
            if !result.status.is_completed() {
                failed += 1;
            }

            if tracker.observe(combination, &result.summary) {
                info!(
                    "Skip condition met at {} (ratio {}); higher throughputs of this configuration will not run",
                    format_mb_per_sec(combination.throughput_mb_per_sec),
                    format_optional(result.summary.sent_div_requested_mb_per_sec, 3)
                );
            }

            self.results.add_result(result)?;
        }

        if failed > 0 {
            warn!("{} of {} test cases failed", failed, executed);
        }

        let summary = SweepSummary {
            version: crate::VERSION.to_string(),
            test_name: self.settings.test_name.clone(),
            run_tag: self.executor.settings().run_tag.clone(),
            mock: self.settings.mock,
            started_at,
            finished_at: Utc::now(),
            total_combinations: combinations.len(),
            executed,
            failed,
            skipped: skipped.clone(),
            system_info: SystemInfo::collect(),
        };
        self.results.finalize(&summary)?;

        info!(
            "Sweep finished: {} executed, {} failed, {} skipped",
            executed,
            failed,
            skipped.len()
        );

        Ok(SweepOutcome {
            run_dir: self.results.run_dir().to_path_buf(),
            total_combinations: combinations.len(),
            executed,
            failed,
            skipped,
        })
    }
}
