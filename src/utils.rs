//! # Utility Functions and Helper Module
//!
//! This module provides small helpers used throughout the sweep harness:
//! identifiers for runs and tests, sanitizing of Kafka resource names,
//! human-readable formatting, summary statistics and a reading of the memory
//! available on the load-generating host.
//!
//! ## Key Functionality Categories
//!
//! - **Identifiers**: Run tags and sequential test ids
//! - **Naming**: Kafka-safe topic and group names, glob patterns for cleanup
//! - **Formatting**: Human-readable display of bytes and throughput
//! - **Statistics**: Mean, standard deviation, minimum and maximum
//! - **System Information**: CPU count and available memory
//!
//! ## Usage Examples
//!
//! ```rust
//! use kafka_perf_sweep::utils::*;
//!
//! assert_eq!(sanitize_resource_name("a b/c"), "a-b-c");
//! assert_eq!(format_mb_per_sec(12.5), "12.50 MB/s");
//!
//! let (mean, min, max, _std_dev) = calculate_stats(&[1.0, 2.0, 3.0]);
//! assert_eq!((mean, min, max), (2.0, 1.0, 3.0));
//! ```

use anyhow::Result;
use regex::Regex;
use sysinfo::System;
use uuid::Uuid;

/// Generate a short random tag identifying one sweep run
///
/// The tag is embedded in topic names and consumer group ids so that two
/// sweeps pointed at the same cluster never collide, even when their test
/// ids are identical. Eight hexadecimal characters of a UUID v4 are plenty
/// for that purpose and keep topic names readable.
pub fn generate_run_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Build the test id for the `sequence`-th combination of a run
///
/// Test ids are zero-padded so that log files sort in execution order.
///
/// ```rust
/// # use kafka_perf_sweep::utils::test_id_for;
/// assert_eq!(test_id_for(7), "t0007");
/// ```
pub fn test_id_for(sequence: usize) -> String {
    format!("t{:04}", sequence)
}

/// Replace every character Kafka does not accept in resource names
///
/// Topic names and group ids are restricted to `[a-zA-Z0-9._-]`. Anything
/// else (spaces, slashes, colons) becomes a dash. The result is truncated to
/// Kafka's 249 character limit.
pub fn sanitize_resource_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned.chars().take(249).collect()
}

/// Render a throughput value for use inside a resource name
///
/// Dots are legal in topic names but Kafka warns that they collide with
/// underscores in metric names, so `12.5` becomes `12p5`.
pub fn throughput_label(throughput_mb_per_sec: f64) -> String {
    let text = if throughput_mb_per_sec.fract() == 0.0 {
        format!("{}", throughput_mb_per_sec as i64)
    } else {
        format!("{}", throughput_mb_per_sec)
    };
    text.replace('.', "p")
}

/// Convert a shell-style glob (`*` and `?` wildcards) into an anchored regex
///
/// Used by the cleanup command to select leftover topics.
///
/// ## Errors
/// Fails only if the translated expression is rejected by the regex engine,
/// which cannot happen for escaped input but is propagated for safety.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Ok(Regex::new(&expression)?)
}

/// Format a byte count with binary units
///
/// ## Examples
///
/// ```rust
/// # use kafka_perf_sweep::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(256 * 1024 * 1024), "256.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a throughput value expressed in MB/s
pub fn format_mb_per_sec(mb_per_sec: f64) -> String {
    format!("{:.2} MB/s", mb_per_sec)
}

/// Format an optional metric, rendering missing values as `n/a`
pub fn format_optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

/// Calculate basic statistics for a set of values
///
/// Returns `(mean, min, max, std_dev)`. The standard deviation is the
/// population standard deviation. An empty slice yields all zeros.
///
/// ## Examples
///
/// ```rust
/// # use kafka_perf_sweep::utils::calculate_stats;
/// let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
/// let (mean, min, max, std_dev) = calculate_stats(&values);
/// assert_eq!(mean, 3.0);
/// assert_eq!(min, 1.0);
/// assert_eq!(max, 5.0);
/// assert!((std_dev - 1.414).abs() < 0.001);
/// ```
pub fn calculate_stats(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let sum: f64 = values.iter().sum();
    let count = values.len() as f64;
    let mean = sum / count;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();

    (mean, min, max, std_dev)
}

/// Mean of the values that are present, `None` if none are
pub fn mean_of_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Sum of the values that are present, `None` if none are
pub fn sum_of_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum())
    }
}

/// Get the number of logical CPU cores on the load-generating host
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Get the memory currently available for new processes, in bytes
///
/// Every producer and consumer benchmark is a JVM, so the executor compares
/// this number against a per-process estimate before launching a test case.
/// Returns 0 when the platform does not expose the information.
pub fn get_available_memory_bytes() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.available_memory()
}

/// Get the total memory of the host, in bytes
pub fn get_total_memory_bytes() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_tag() {
        let a = generate_run_tag();
        let b = generate_run_tag();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_resource_name() {
        assert_eq!(sanitize_resource_name("perf-t0001"), "perf-t0001");
        assert_eq!(sanitize_resource_name("a b:c/d"), "a-b-c-d");
        assert_eq!(sanitize_resource_name("x.y_z"), "x.y_z");
        assert_eq!(sanitize_resource_name(&"a".repeat(300)).len(), 249);
    }

    #[test]
    fn test_throughput_label() {
        assert_eq!(throughput_label(50.0), "50");
        assert_eq!(throughput_label(12.5), "12p5");
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("perf-*").unwrap();
        assert!(re.is_match("perf-abc-t0001"));
        assert!(!re.is_match("other-perf-x"));

        let re = glob_to_regex("perf-t000?.x").unwrap();
        assert!(re.is_match("perf-t0001.x"));
        assert!(!re.is_match("perf-t0001-x"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(1.23456), 2), "1.23");
        assert_eq!(format_optional(None, 2), "n/a");
    }

    #[test]
    fn test_calculate_stats() {
        assert_eq!(calculate_stats(&[]), (0.0, 0.0, 0.0, 0.0));
        let (mean, min, max, std_dev) = calculate_stats(&[2.0, 4.0]);
        assert_eq!(mean, 3.0);
        assert_eq!(min, 2.0);
        assert_eq!(max, 4.0);
        assert_eq!(std_dev, 1.0);
    }

    #[test]
    fn test_present_helpers() {
        assert_eq!(mean_of_present(vec![Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(sum_of_present(vec![Some(1.0), None, Some(3.0)]), Some(4.0));
        assert_eq!(mean_of_present(vec![None, None]), None);
        assert_eq!(sum_of_present(Vec::<Option<f64>>::new()), None);
    }

    #[test]
    fn test_get_cpu_cores() {
        assert!(get_cpu_cores() > 0);
    }
}
