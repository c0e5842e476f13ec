//! Pipeline configuration.
//!
//! Loaded from a TOML file, then overridden by `EVENTLINE_*` environment
//! variables, then validated. A process must refuse to start when
//! [`PipelineConfig::validate`] fails.
//!
//! ```toml
//! [consumer]
//! bootstrap_servers = "localhost:9092"
//! group_id = "user-service"
//! topics = ["order.created.v1"]
//! auto_offset_reset = "earliest"
//! enable_auto_commit = false
//! poll_timeout_ms = 1000
//! session_timeout_ms = 6000
//! max_poll_interval_ms = 300000
//!
//! [producer]
//! bootstrap_servers = "localhost:9092"
//! client_id = "user-service"
//!
//! [dead_letter]
//! topic = "user-service.dlq"
//!
//! [metrics]
//! listen_addr = "0.0.0.0:9090"   # optional; omit to disable the exporter
//! ```

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "EVENTLINE_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "eventline.toml";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read configuration file {path}: {reason}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        reason: String,
    },

    /// TOML was malformed or had the wrong shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// An environment override had an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    InvalidOverride {
        /// The environment variable
        var: String,
        /// What was wrong with it
        reason: String,
    },

    /// One or more validation rules failed.
    #[error("Configuration validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    /// Start from the oldest retained message.
    Earliest,
    /// Start from new messages only.
    #[default]
    Latest,
    /// Fail if the group has no committed offset.
    Error,
}

impl AutoOffsetReset {
    /// Value understood by the Kafka client.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "earliest" => Some(Self::Earliest),
            "latest" => Some(Self::Latest),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AutoOffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[consumer]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    /// Broker bootstrap address list.
    pub bootstrap_servers: String,
    /// Consumer group id.
    pub group_id: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Start position for a new group.
    #[serde(default)]
    pub auto_offset_reset: AutoOffsetReset,
    /// Let the client commit offsets in the background.
    #[serde(default)]
    pub enable_auto_commit: bool,
    /// Upper bound on one poll call.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Group session timeout.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Max time between polls before the member is evicted.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

impl ConsumerSettings {
    /// Poll timeout as a [`Duration`].
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// `[producer]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerSettings {
    /// Broker bootstrap address list.
    pub bootstrap_servers: String,
    /// Client id; also the `producer` field of emitted envelopes.
    pub client_id: String,
    /// Grace period for flushing buffered messages on shutdown.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl ProducerSettings {
    /// Flush grace period as a [`Duration`].
    #[must_use]
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// `[dead_letter]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterSettings {
    /// Fixed dead-letter topic of this service.
    pub topic: String,
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Address of the Prometheus scrape endpoint; `None` disables it.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// Complete configuration of the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Consumer settings
    pub consumer: ConsumerSettings,
    /// Producer settings
    pub producer: ProducerSettings,
    /// Dead-letter settings
    pub dead_letter: DeadLetterSettings,
    /// Metrics exporter settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

const fn default_poll_timeout_ms() -> u64 {
    1000
}

const fn default_session_timeout_ms() -> u64 {
    6000
}

const fn default_max_poll_interval_ms() -> u64 {
    300_000
}

const fn default_flush_timeout_ms() -> u64 {
    3000
}

impl PipelineConfig {
    /// Load from the file named by [`CONFIG_PATH_ENV`] (or
    /// [`DEFAULT_CONFIG_PATH`]), apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is unusable, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or missing fields.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from `EVENTLINE_*` variables resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for unparseable values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EVENTLINE_CONSUMER_BOOTSTRAP_SERVERS") {
            self.consumer.bootstrap_servers = v;
        }
        if let Some(v) = lookup("EVENTLINE_CONSUMER_GROUP_ID") {
            self.consumer.group_id = v;
        }
        if let Some(v) = lookup("EVENTLINE_CONSUMER_TOPICS") {
            self.consumer.topics = v.split(',').map(|t| t.trim().to_string()).collect();
        }
        if let Some(v) = lookup("EVENTLINE_CONSUMER_AUTO_OFFSET_RESET") {
            self.consumer.auto_offset_reset =
                AutoOffsetReset::parse(&v).ok_or_else(|| ConfigError::InvalidOverride {
                    var: "EVENTLINE_CONSUMER_AUTO_OFFSET_RESET".to_string(),
                    reason: format!("expected earliest, latest or error, got '{v}'"),
                })?;
        }
        if let Some(v) = lookup("EVENTLINE_CONSUMER_ENABLE_AUTO_COMMIT") {
            self.consumer.enable_auto_commit =
                v.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                    var: "EVENTLINE_CONSUMER_ENABLE_AUTO_COMMIT".to_string(),
                    reason: format!("expected true or false, got '{v}'"),
                })?;
        }
        if let Some(v) = lookup("EVENTLINE_PRODUCER_BOOTSTRAP_SERVERS") {
            self.producer.bootstrap_servers = v;
        }
        if let Some(v) = lookup("EVENTLINE_PRODUCER_CLIENT_ID") {
            self.producer.client_id = v;
        }
        if let Some(v) = lookup("EVENTLINE_DEAD_LETTER_TOPIC") {
            self.dead_letter.topic = v;
        }
        if let Some(v) = lookup("EVENTLINE_METRICS_LISTEN_ADDR") {
            self.metrics.listen_addr = if v.trim().is_empty() {
                None
            } else {
                Some(v.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                    var: "EVENTLINE_METRICS_LISTEN_ADDR".to_string(),
                    reason: format!("expected host:port, got '{v}'"),
                })?)
            };
        }
        Ok(())
    }

    /// Check every rule and report all violations together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing each violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut require = |value: &str, name: &str| {
            if value.trim().is_empty() {
                problems.push(format!("{name} must not be empty"));
            }
        };

        require(&self.consumer.bootstrap_servers, "consumer.bootstrap_servers");
        require(&self.consumer.group_id, "consumer.group_id");
        require(&self.producer.bootstrap_servers, "producer.bootstrap_servers");
        require(&self.producer.client_id, "producer.client_id");
        require(&self.dead_letter.topic, "dead_letter.topic");

        if self.consumer.topics.is_empty() {
            problems.push("consumer.topics must list at least one topic".to_string());
        }
        if self.consumer.topics.iter().any(|t| t.trim().is_empty()) {
            problems.push("consumer.topics must not contain blank entries".to_string());
        }
        if self.consumer.poll_timeout_ms == 0 {
            problems.push("consumer.poll_timeout_ms must be positive".to_string());
        }
        if self.consumer.session_timeout_ms == 0 {
            problems.push("consumer.session_timeout_ms must be positive".to_string());
        }
        if self.consumer.max_poll_interval_ms == 0 {
            problems.push("consumer.max_poll_interval_ms must be positive".to_string());
        }
        if self.producer.flush_timeout_ms == 0 {
            problems.push("producer.flush_timeout_ms must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const VALID: &str = r#"
        [consumer]
        bootstrap_servers = "localhost:9092"
        group_id = "user-service"
        topics = ["order.created.v1"]
        auto_offset_reset = "earliest"

        [producer]
        bootstrap_servers = "localhost:9092"
        client_id = "user-service"

        [dead_letter]
        topic = "user-service.dlq"
    "#;

    #[test]
    fn parses_with_defaults() {
        let config = PipelineConfig::from_toml_str(VALID).unwrap();
        config.validate().unwrap();

        assert_eq!(config.consumer.auto_offset_reset, AutoOffsetReset::Earliest);
        assert!(!config.consumer.enable_auto_commit);
        assert_eq!(config.consumer.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.consumer.session_timeout_ms, 6000);
        assert_eq!(config.producer.flush_timeout(), Duration::from_secs(3));
        assert!(config.metrics.listen_addr.is_none());
    }

    #[test]
    fn metrics_listener_is_optional() {
        let with_metrics = format!("{VALID}\n[metrics]\nlisten_addr = \"127.0.0.1:9090\"\n");
        let config = PipelineConfig::from_toml_str(&with_metrics).unwrap();
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9090".parse().unwrap())
        );
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut config = PipelineConfig::from_toml_str(VALID).unwrap();
        config.consumer.group_id = String::new();
        config.consumer.topics = vec!["a".to_string(), " ".to_string()];
        config.consumer.poll_timeout_ms = 0;
        config.dead_letter.topic = String::new();

        let ConfigError::Invalid(problems) = config.validate().unwrap_err() else {
            unreachable!("expected validation error");
        };
        assert_eq!(problems.len(), 4, "{problems:?}");
    }

    #[test]
    fn empty_topic_list_is_invalid() {
        let mut config = PipelineConfig::from_toml_str(VALID).unwrap();
        config.consumer.topics.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let result = PipelineConfig::from_toml_str("[consumer]\nbootstrap_servers = \"x\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EVENTLINE_CONSUMER_TOPICS", "user.created.v1, order.created.v1"),
            ("EVENTLINE_CONSUMER_ENABLE_AUTO_COMMIT", "true"),
            ("EVENTLINE_CONSUMER_AUTO_OFFSET_RESET", "LATEST"),
            ("EVENTLINE_DEAD_LETTER_TOPIC", "order-service.dlq"),
            ("EVENTLINE_METRICS_LISTEN_ADDR", "0.0.0.0:9100"),
        ]);
        let mut config = PipelineConfig::from_toml_str(VALID).unwrap();
        config
            .apply_env_overrides(|name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.consumer.topics, vec!["user.created.v1", "order.created.v1"]);
        assert!(config.consumer.enable_auto_commit);
        assert_eq!(config.consumer.auto_offset_reset, AutoOffsetReset::Latest);
        assert_eq!(config.dead_letter.topic, "order-service.dlq");
        assert_eq!(config.metrics.listen_addr.map(|a| a.port()), Some(9100));
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = PipelineConfig::from_toml_str(VALID).unwrap();
        let result = config.apply_env_overrides(|name| {
            (name == "EVENTLINE_CONSUMER_ENABLE_AUTO_COMMIT").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
    }
}
