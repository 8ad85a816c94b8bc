//! Cluster connection configuration.
//!
//! The YAML file names the Kafka installation, the bootstrap servers and
//! the optional security block. Security settings are turned into a Java
//! properties file at the point where a Kafka tool is launched; everywhere
//! else they travel in memory as ordered `key=value` pairs.

use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading the connection configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: '{field}' {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to write properties file: {0}")]
    PropertiesFile(#[source] std::io::Error),
}

/// Ordered `key=value` pairs handed to a Kafka tool
pub type Properties = Vec<(String, String)>;

/// Security settings shared by every Kafka tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_truststore_location: Option<String>,
    pub ssl_truststore_password: Option<String>,
    pub ssl_keystore_location: Option<String>,
    pub ssl_keystore_password: Option<String>,
    /// Written even when empty; an empty value disables hostname checks
    pub ssl_endpoint_identification_algorithm: Option<String>,
}

impl SecurityConfig {
    /// Client properties for this security block
    ///
    /// `PLAINTEXT` is Kafka's default and is left out. SCRAM credentials
    /// become a single-line `sasl.jaas.config`.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(protocol) = non_empty(&self.security_protocol) {
            if protocol != "PLAINTEXT" {
                props.push(("security.protocol".to_string(), protocol));
            }
        }
        if let Some(mechanism) = non_empty(&self.sasl_mechanism) {
            props.push(("sasl.mechanism".to_string(), mechanism));
        }
        if let (Some(username), Some(password)) =
            (non_empty(&self.sasl_username), non_empty(&self.sasl_password))
        {
            props.push((
                "sasl.jaas.config".to_string(),
                format!(
                    "org.apache.kafka.common.security.scram.ScramLoginModule required username=\"{}\" password=\"{}\";",
                    username, password
                ),
            ));
        }

        let ssl = [
            ("ssl.truststore.location", &self.ssl_truststore_location),
            ("ssl.truststore.password", &self.ssl_truststore_password),
            ("ssl.keystore.location", &self.ssl_keystore_location),
            ("ssl.keystore.password", &self.ssl_keystore_password),
        ];
        for (key, value) in ssl {
            if let Some(value) = non_empty(value) {
                props.push((key.to_string(), value));
            }
        }

        if let Some(algorithm) = &self.ssl_endpoint_identification_algorithm {
            props.push((
                "ssl.endpoint.identification.algorithm".to_string(),
                algorithm.clone(),
            ));
        }

        props
    }
}

/// How to reach the cluster and where the Kafka tools live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Kafka installation; its `bin/` holds the `kafka-*.sh` scripts
    pub kafka_home: Option<PathBuf>,
    pub bootstrap_servers: String,
    /// Exported as `KAFKA_HEAP_OPTS` for every launched tool
    pub java_heap_opts: String,
    /// Passed to topic creation as `--config retention.ms=<value>`
    pub retention_ms: Option<u64>,
    /// Extra `key=value` topic configs
    pub topic_configs: Vec<String>,
    pub security: SecurityConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kafka_home: None,
            bootstrap_servers: crate::defaults::BOOTSTRAP_SERVERS.to_string(),
            java_heap_opts: crate::defaults::JAVA_HEAP_OPTS.to_string(),
            retention_ms: None,
            topic_configs: Vec::new(),
            security: SecurityConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid "all defaults" configuration.
        let config: ConnectionConfig = if text.trim().is_empty() {
            ConnectionConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bootstrap_servers".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for entry in &self.topic_configs {
            if !entry.contains('=') {
                return Err(ConfigError::Invalid {
                    field: "topic_configs".to_string(),
                    reason: format!("entry '{}' is not key=value", entry),
                });
            }
        }
        Ok(())
    }

    /// `--config` values for topic creation
    pub fn topic_config_entries(&self) -> Vec<String> {
        let mut entries = Vec::new();
        if let Some(retention) = self.retention_ms {
            entries.push(format!("retention.ms={}", retention));
        }
        entries.extend(self.topic_configs.iter().cloned());
        entries
    }

    pub fn security_properties(&self) -> Properties {
        self.security.properties()
    }
}

/// Split a whitespace separated `key=value` string into pairs
///
/// Tokens without `=` are dropped with a warning.
pub fn parse_property_string(props: &str) -> Properties {
    props
        .split_whitespace()
        .filter_map(|token| match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!("Ignoring client property '{}' (expected key=value)", token);
                None
            }
        })
        .collect()
}

/// Render pairs in Java properties syntax
pub fn render_properties(props: &[(String, String)]) -> String {
    props
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

/// Write pairs into a temporary `.properties` file, removed on drop
pub fn write_properties_file(props: &[(String, String)]) -> Result<NamedTempFile, ConfigError> {
    let mut file = tempfile::Builder::new()
        .prefix("kafka-perf-")
        .suffix(".properties")
        .tempfile()
        .map_err(ConfigError::PropertiesFile)?;
    file.write_all(render_properties(props).as_bytes())
        .map_err(ConfigError::PropertiesFile)?;
    file.flush().map_err(ConfigError::PropertiesFile)?;
    Ok(file)
}
