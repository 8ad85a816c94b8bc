//! # Skip-Condition Evaluator
//!
//! Stops a configuration's throughput series early once the cluster no
//! longer keeps up. The condition is written in the specification as
//!
//! ```json
//! {"less-than": ["sent_div_requested_mb_per_sec", 0.95]}
//! ```
//!
//! and is evaluated after every completed test case. When it triggers, the
//! remaining (higher) throughput values of the same configuration are not
//! run. Results already collected are never discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::metrics::CaseSummary;
use crate::spec::SpecError;
use crate::sweep::{ConfigurationKey, ParameterCombination};

/// Metrics a skip condition can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipMetric {
    /// Achieved producer MB/s divided by the requested cluster MB/s
    SentDivRequestedMbPerSec,
}

impl SkipMetric {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sent_div_requested_mb_per_sec" => Some(SkipMetric::SentDivRequestedMbPerSec),
            _ => None,
        }
    }

    /// Evaluate the metric for one finished test case
    pub fn evaluate(&self, summary: &CaseSummary) -> Option<f64> {
        match self {
            SkipMetric::SentDivRequestedMbPerSec => summary.sent_div_requested_mb_per_sec,
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Metric(SkipMetric),
    Literal(f64),
}

impl Operand {
    fn from_value(value: &Value) -> Result<Self, SpecError> {
        match value {
            Value::String(name) => SkipMetric::parse(name).map(Operand::Metric).ok_or_else(|| {
                SpecError::malformed(
                    crate::spec::SKIP_CONDITION_KEY,
                    format!("refers to unknown metric '{}'", name),
                )
            }),
            Value::Number(number) => number.as_f64().map(Operand::Literal).ok_or_else(|| {
                SpecError::malformed(crate::spec::SKIP_CONDITION_KEY, "has an invalid number")
            }),
            other => Err(SpecError::malformed(
                crate::spec::SKIP_CONDITION_KEY,
                format!("operands must be metric names or numbers, found {}", other),
            )),
        }
    }

    fn resolve(&self, summary: &CaseSummary) -> Option<f64> {
        match self {
            Operand::Metric(metric) => metric.evaluate(summary),
            Operand::Literal(value) => Some(*value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparator {
    LessThan,
    GreaterThan,
}

/// Early-termination rule for a throughput series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipCondition {
    pub comparator: Comparator,
    pub left: Operand,
    pub right: Operand,
}

impl SkipCondition {
    /// Parse the `{comparator: [operand, operand]}` form used in specifications
    pub fn from_value(value: &Value) -> Result<Self, SpecError> {
        let key = crate::spec::SKIP_CONDITION_KEY;
        let object = value
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| SpecError::malformed(key, "must be an object with one comparator"))?;
        let (name, args) = object
            .iter()
            .next()
            .ok_or_else(|| SpecError::malformed(key, "must name a comparator"))?;

        let comparator = match name.as_str() {
            "less-than" => Comparator::LessThan,
            "greater-than" => Comparator::GreaterThan,
            other => {
                return Err(SpecError::malformed(
                    key,
                    format!("has unknown comparator '{}'", other),
                ))
            }
        };

        let args = args
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| SpecError::malformed(key, "comparator needs exactly two operands"))?;

        Ok(Self {
            comparator,
            left: Operand::from_value(&args[0])?,
            right: Operand::from_value(&args[1])?,
        })
    }

    /// Decide whether the remaining throughput values should be skipped
    ///
    /// Returns `false` when either operand cannot be computed, for example
    /// because no producer log yielded a throughput figure.
    pub fn should_skip(&self, summary: &CaseSummary) -> bool {
        let (left, right) = match (self.left.resolve(summary), self.right.resolve(summary)) {
            (Some(l), Some(r)) => (l, r),
            _ => return false,
        };
        match self.comparator {
            Comparator::LessThan => left < right,
            Comparator::GreaterThan => left > right,
        }
    }
}

/// Remembers which configurations have saturated during a sweep
///
/// Keyed by everything but throughput. The stored value is the index (in
/// the specification's throughput axis) at which the condition triggered.
#[derive(Debug, Default)]
pub struct SkipTracker {
    condition: Option<SkipCondition>,
    tripped: HashMap<ConfigurationKey, usize>,
}

impl SkipTracker {
    pub fn new(condition: Option<SkipCondition>) -> Self {
        Self {
            condition,
            tripped: HashMap::new(),
        }
    }

    /// Whether a not-yet-run combination falls behind a tripped condition
    pub fn is_skipped(&self, combination: &ParameterCombination) -> bool {
        self.tripped
            .get(&combination.configuration_key())
            .map_or(false, |&index| combination.throughput_index > index)
    }

    /// Feed the outcome of a finished test case; returns true if it tripped
    /// the condition for its configuration
    pub fn observe(&mut self, combination: &ParameterCombination, summary: &CaseSummary) -> bool {
        let condition = match &self.condition {
            Some(c) => c,
            None => return false,
        };
        if !condition.should_skip(summary) {
            return false;
        }
        let entry = self
            .tripped
            .entry(combination.configuration_key())
            .or_insert(combination.throughput_index);
        *entry = (*entry).min(combination.throughput_index);
        true
    }
}
