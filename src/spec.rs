//! # Test Specification Loader
//!
//! Parses the declarative JSON test specification into a strongly typed,
//! validated [`TestSpecification`]. Validation happens once, here, so the
//! enumerator and executor can rely on every axis being non-empty and every
//! value being in range.
//!
//! ## Accepted Layouts
//!
//! The specification may be wrapped the way the AWS-hosted tooling wraps
//! it, or given flat:
//!
//! ```json
//! {"test_specification": {"parameters": {"cluster_throughput_mb_per_sec": [10, 20]}}}
//! {"parameters": {"cluster_throughput_mb_per_sec": [10, 20]}}
//! {"cluster_throughput_mb_per_sec": [10, 20]}
//! ```
//!
//! Any axis may also be given as a scalar, which is treated as a one-element
//! list. The optional `skip_remaining_throughput` condition may sit next to
//! `parameters` or among the axes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

use crate::skip::SkipCondition;
use crate::sweep::BYTES_PER_MB;

/// Name of the only required axis
pub const THROUGHPUT_AXIS: &str = "cluster_throughput_mb_per_sec";

/// Key holding the early-termination rule
pub const SKIP_CONDITION_KEY: &str = "skip_remaining_throughput";

/// Errors raised while loading a test specification
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read test specification {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("test specification is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed test specification: field '{field}' {reason}")]
    MalformedSpec { field: String, reason: String },
}

impl SpecError {
    pub(crate) fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SpecError::MalformedSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Shape of the consumer side of a test: `num_groups` groups of `size`
/// consumers each. `num_groups == 0` means producers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerGroupShape {
    pub num_groups: u32,
    pub size: u32,
}

impl ConsumerGroupShape {
    /// Total number of consumer processes for this shape
    pub fn num_consumers(&self) -> u32 {
        if self.num_groups == 0 {
            0
        } else {
            self.num_groups.saturating_mul(self.size)
        }
    }
}

/// One set of client properties, as whitespace separated `key=value` pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientProps {
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub consumer: String,
}

impl Default for ClientProps {
    fn default() -> Self {
        Self {
            producer: "acks=all".to_string(),
            consumer: String::new(),
        }
    }
}

/// The validated parameter axes of a sweep
///
/// Every axis holds at least one value. The struct is never mutated after
/// loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpecification {
    pub cluster_throughput_mb_per_sec: Vec<f64>,
    pub num_producers: Vec<u32>,
    pub consumer_groups: Vec<ConsumerGroupShape>,
    pub client_props: Vec<ClientProps>,
    pub num_partitions: Vec<u32>,
    pub replication_factor: Vec<u32>,
    pub duration_sec: Vec<u64>,
    pub record_size_byte: Vec<u64>,
    pub skip_condition: Option<SkipCondition>,
}

impl TestSpecification {
    /// Load and validate a specification from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a specification from JSON text
    ///
    /// ## Errors
    /// - `SpecError::Json` when the text is not JSON
    /// - `SpecError::MalformedSpec` when the throughput axis is missing or
    ///   empty, a consumer group entry lacks `num_groups`/`size`, or any
    ///   value is out of range
    pub fn from_json_str(text: &str) -> Result<Self, SpecError> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_value(document)
    }

    /// Build a specification from an already parsed JSON document
    pub fn from_value(document: Value) -> Result<Self, SpecError> {
        let root = match document {
            Value::Object(map) => map,
            _ => return Err(SpecError::malformed("<root>", "must be a JSON object")),
        };

        // Peel off the optional `test_specification` wrapper.
        let spec_level = match root.get("test_specification") {
            Some(Value::Object(inner)) => inner.clone(),
            Some(_) => {
                return Err(SpecError::malformed(
                    "test_specification",
                    "must be a JSON object",
                ))
            }
            None => root,
        };

        let parameters = match spec_level.get("parameters") {
            Some(Value::Object(params)) => params.clone(),
            Some(_) => return Err(SpecError::malformed("parameters", "must be a JSON object")),
            None => spec_level.clone(),
        };

        let skip_value = spec_level
            .get(SKIP_CONDITION_KEY)
            .or_else(|| parameters.get(SKIP_CONDITION_KEY));
        let skip_condition = match skip_value {
            Some(Value::Null) | None => None,
            Some(value) => Some(SkipCondition::from_value(value)?),
        };

        let cluster_throughput_mb_per_sec: Vec<f64> = match parameters.get(THROUGHPUT_AXIS) {
            None | Some(Value::Null) => {
                return Err(SpecError::malformed(THROUGHPUT_AXIS, "is required"))
            }
            Some(_) => required_axis(&parameters, THROUGHPUT_AXIS)?,
        };
        if cluster_throughput_mb_per_sec.is_empty() {
            return Err(SpecError::malformed(THROUGHPUT_AXIS, "must not be empty"));
        }
        for value in &cluster_throughput_mb_per_sec {
            if !value.is_finite() || *value <= 0.0 {
                return Err(SpecError::malformed(
                    THROUGHPUT_AXIS,
                    format!("must contain positive values, found {}", value),
                ));
            }
        }

        let consumer_groups = parse_consumer_groups(&parameters)?;

        let spec = Self {
            cluster_throughput_mb_per_sec,
            num_producers: optional_axis(
                &parameters,
                "num_producers",
                crate::defaults::NUM_PRODUCERS,
            )?,
            consumer_groups,
            client_props: optional_axis(&parameters, "client_props", ClientProps::default())?,
            num_partitions: optional_axis(
                &parameters,
                "num_partitions",
                crate::defaults::NUM_PARTITIONS,
            )?,
            replication_factor: optional_axis(
                &parameters,
                "replication_factor",
                crate::defaults::REPLICATION_FACTOR,
            )?,
            duration_sec: optional_axis(
                &parameters,
                "duration_sec",
                crate::defaults::DURATION_SEC,
            )?,
            record_size_byte: optional_axis(
                &parameters,
                "record_size_byte",
                crate::defaults::RECORD_SIZE_BYTE,
            )?,
            skip_condition,
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Range checks that serde cannot express
    fn validate(&self) -> Result<(), SpecError> {
        ensure_positive("num_producers", self.num_producers.iter().map(|v| *v as u64))?;
        ensure_positive("num_partitions", self.num_partitions.iter().map(|v| *v as u64))?;
        ensure_positive(
            "replication_factor",
            self.replication_factor.iter().map(|v| *v as u64),
        )?;
        ensure_positive("duration_sec", self.duration_sec.iter().copied())?;
        ensure_positive("record_size_byte", self.record_size_byte.iter().copied())?;

        for shape in &self.consumer_groups {
            if shape.num_groups > 0 && shape.size == 0 {
                return Err(SpecError::malformed(
                    "consumer_groups",
                    "entries with num_groups > 0 need size > 0",
                ));
            }
            if shape.num_groups.checked_mul(shape.size).is_none() {
                return Err(SpecError::malformed(
                    "consumer_groups",
                    format!("{} groups of {} consumers is too many", shape.num_groups, shape.size),
                ));
            }
        }

        self.validate_record_counts()
    }

    /// Every record count derived from the axes must fit in a `u64`
    fn validate_record_counts(&self) -> Result<(), SpecError> {
        for duration in &self.duration_sec {
            let timeout = duration
                .checked_mul(1000)
                .and_then(|ms| ms.checked_add(crate::defaults::CONSUMER_TIMEOUT_GRACE_MS));
            if timeout.is_none() {
                return Err(SpecError::malformed(
                    "duration_sec",
                    format!("{} seconds is out of range", duration),
                ));
            }
        }

        for &throughput in &self.cluster_throughput_mb_per_sec {
            for &record_size in &self.record_size_byte {
                let rate = (throughput * BYTES_PER_MB as f64 / record_size as f64).floor();
                if rate >= u64::MAX as f64 {
                    return Err(SpecError::malformed(
                        THROUGHPUT_AXIS,
                        format!("{} MB/s is out of range", throughput),
                    ));
                }
                // Producers are never asked for less than one record per second.
                let rate = (rate as u64).max(1);
                if rate.checked_mul(record_size).is_none() {
                    return Err(SpecError::malformed(
                        "record_size_byte",
                        format!(
                            "{} MB/s of {} byte records is out of range",
                            throughput, record_size
                        ),
                    ));
                }
                for &duration in &self.duration_sec {
                    if rate.checked_mul(duration).is_none() {
                        return Err(SpecError::malformed(
                            "duration_sec",
                            format!(
                                "{} seconds at {} MB/s is more records than can be counted",
                                duration, throughput
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn ensure_positive<I: Iterator<Item = u64>>(field: &str, values: I) -> Result<(), SpecError> {
    for value in values {
        if value == 0 {
            return Err(SpecError::malformed(field, "must contain values greater than 0"));
        }
    }
    Ok(())
}

/// Read an axis as a list, accepting a bare scalar as a one-element list
fn required_axis<T: DeserializeOwned>(
    parameters: &Map<String, Value>,
    field: &str,
) -> Result<Vec<T>, SpecError> {
    let value = parameters
        .get(field)
        .cloned()
        .ok_or_else(|| SpecError::malformed(field, "is required"))?;
    let values = match value {
        Value::Array(items) => items,
        scalar => vec![scalar],
    };
    values
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| SpecError::malformed(field, format!("has an invalid value: {}", e)))
        })
        .collect()
}

/// Read an optional axis, falling back to a single default value when absent
fn optional_axis<T: DeserializeOwned>(
    parameters: &Map<String, Value>,
    field: &str,
    default: T,
) -> Result<Vec<T>, SpecError> {
    match parameters.get(field) {
        None | Some(Value::Null) => Ok(vec![default]),
        Some(_) => {
            let values = required_axis(parameters, field)?;
            if values.is_empty() {
                return Err(SpecError::malformed(field, "must not be an empty list"));
            }
            Ok(values)
        }
    }
}

/// Consumer group entries need both keys; serde would otherwise report a
/// generic error without naming the missing one.
fn parse_consumer_groups(
    parameters: &Map<String, Value>,
) -> Result<Vec<ConsumerGroupShape>, SpecError> {
    let entries = match parameters.get("consumer_groups") {
        None | Some(Value::Null) => {
            return Ok(vec![ConsumerGroupShape {
                num_groups: 0,
                size: crate::defaults::CONSUMER_GROUP_SIZE,
            }])
        }
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    };
    if entries.is_empty() {
        return Err(SpecError::malformed(
            "consumer_groups",
            "must not be an empty list",
        ));
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let object = entry.as_object().ok_or_else(|| {
                SpecError::malformed(format!("consumer_groups[{}]", i), "must be an object")
            })?;
            let num_groups = read_count(object, "num_groups", i)?;
            let size = read_count(object, "size", i)?;
            Ok(ConsumerGroupShape { num_groups, size })
        })
        .collect()
}

fn read_count(object: &Map<String, Value>, key: &str, index: usize) -> Result<u32, SpecError> {
    let field = format!("consumer_groups[{}].{}", index, key);
    let value = object
        .get(key)
        .ok_or_else(|| SpecError::malformed(field.clone(), "is required"))?;
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| SpecError::malformed(field, "must be a non-negative integer"))
}
