use serde::{Deserialize, Deserializer};

use crate::reconnect::ReconnectPolicy;
use crate::sanitize::SanitizeRule;
use crate::timestamps::TimestampConfig;

/// Named pool size hint passed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolSize {
    High,
    #[default]
    Standard,
    Low,
}

impl PoolSize {
    /// Suggested maximum connections for the driver pool.
    pub fn max_connections(self) -> u32 {
        match self {
            Self::High => 20,
            Self::Standard => 10,
            Self::Low => 2,
        }
    }
}

/// Logging mode: off, on (slow queries and errors), or verbose (every
/// operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    Off,
    #[default]
    On,
    Verbose,
}

impl LoggingMode {
    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    pub fn is_verbose(self) -> bool {
        self == Self::Verbose
    }
}

/// Search-engine specific options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElasticOptions {
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "caFingerprint")]
    pub ca_fingerprint: Option<String>,
    #[serde(alias = "sniffOnStart")]
    pub sniff_on_start: bool,
}

/// Connection configuration.
///
/// Deserializable from the caller's JSON options object; `logging`,
/// `timestamps`, and `reconnect` accept either a bool or the detailed form.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectConfig {
    pub uri: String,

    #[serde(default)]
    pub pool: PoolSize,

    #[serde(default, alias = "dbName")]
    pub db_name: Option<String>,

    /// Label for log lines and status output.
    #[serde(default)]
    pub label: Option<String>,

    /// Validate documents against the registered schema on write.
    #[serde(default, rename = "schema")]
    pub schema_validation: bool,

    #[serde(default = "default_true")]
    pub sanitize: bool,

    /// Caller-supplied value transforms; not wire-deserializable.
    #[serde(skip)]
    pub sanitize_rules: Vec<SanitizeRule>,

    #[serde(default = "default_true")]
    pub guardrails: bool,

    #[serde(default, deserialize_with = "de_logging")]
    pub logging: LoggingMode,

    #[serde(default = "default_slow_query_ms", alias = "slowQueryMs")]
    pub slow_query_ms: u64,

    #[serde(default, deserialize_with = "de_timestamps")]
    pub timestamps: TimestampConfig,

    #[serde(default, deserialize_with = "de_reconnect")]
    pub reconnect: ReconnectPolicy,

    #[serde(default)]
    pub elastic: ElasticOptions,
}

impl ConnectConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            pool: PoolSize::default(),
            db_name: None,
            label: None,
            schema_validation: false,
            sanitize: true,
            sanitize_rules: Vec::new(),
            guardrails: true,
            logging: LoggingMode::default(),
            slow_query_ms: default_slow_query_ms(),
            timestamps: TimestampConfig::disabled(),
            reconnect: ReconnectPolicy::default(),
            elastic: ElasticOptions::default(),
        }
    }

    pub fn with_guardrails(mut self, enabled: bool) -> Self {
        self.guardrails = enabled;
        self
    }

    pub fn with_sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = enabled;
        self
    }

    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.schema_validation = enabled;
        self
    }

    pub fn with_timestamps(mut self, timestamps: TimestampConfig) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_sanitize_rules(mut self, rules: Vec<SanitizeRule>) -> Self {
        self.sanitize_rules = rules;
        self
    }

    pub fn with_slow_query_ms(mut self, threshold: u64) -> Self {
        self.slow_query_ms = threshold;
        self
    }

    pub fn with_logging(mut self, logging: LoggingMode) -> Self {
        self.logging = logging;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_slow_query_ms() -> u64 {
    1000
}

fn de_logging<'de, D>(deserializer: D) -> Result<LoggingMode, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Mode(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Flag(true) => Ok(LoggingMode::On),
        Raw::Flag(false) => Ok(LoggingMode::Off),
        Raw::Mode(mode) if mode == "verbose" => Ok(LoggingMode::Verbose),
        Raw::Mode(mode) => Err(serde::de::Error::custom(format!(
            "logging must be a bool or \"verbose\", got \"{}\"",
            mode
        ))),
    }
}

fn de_timestamps<'de, D>(deserializer: D) -> Result<TimestampConfig, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Pair {
            #[serde(default, alias = "createdAt")]
            created_at: Option<String>,
            #[serde(default, alias = "updatedAt")]
            updated_at: Option<String>,
        },
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Flag(true) => TimestampConfig::enabled(),
        Raw::Flag(false) => TimestampConfig::disabled(),
        Raw::Pair {
            created_at,
            updated_at,
        } => TimestampConfig {
            created_at,
            updated_at,
        },
    })
}

fn de_reconnect<'de, D>(deserializer: D) -> Result<ReconnectPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Policy(ReconnectPolicy),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Flag(true) => ReconnectPolicy::default(),
        Raw::Flag(false) => ReconnectPolicy::disabled(),
        Raw::Policy(policy) => policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ConnectConfig =
            serde_json::from_value(json!({"uri": "postgres://localhost/app"})).unwrap();

        assert_eq!(config.pool, PoolSize::Standard);
        assert!(config.sanitize);
        assert!(config.guardrails);
        assert!(!config.schema_validation);
        assert_eq!(config.logging, LoggingMode::On);
        assert_eq!(config.slow_query_ms, 1000);
        assert!(config.timestamps.is_disabled());
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn logging_accepts_bool_or_verbose() {
        let off: ConnectConfig =
            serde_json::from_value(json!({"uri": "sqlite:app.db", "logging": false})).unwrap();
        assert_eq!(off.logging, LoggingMode::Off);

        let verbose: ConnectConfig =
            serde_json::from_value(json!({"uri": "sqlite:app.db", "logging": "verbose"}))
                .unwrap();
        assert_eq!(verbose.logging, LoggingMode::Verbose);

        let bad = serde_json::from_value::<ConnectConfig>(
            json!({"uri": "sqlite:app.db", "logging": "loud"}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn timestamps_accepts_bool_or_pair() {
        let on: ConnectConfig =
            serde_json::from_value(json!({"uri": "sqlite:app.db", "timestamps": true})).unwrap();
        assert_eq!(on.timestamps.created_at.as_deref(), Some("created_at"));

        let pair: ConnectConfig = serde_json::from_value(json!({
            "uri": "sqlite:app.db",
            "timestamps": {"createdAt": "made_on", "updatedAt": "touched_on"},
        }))
        .unwrap();
        assert_eq!(pair.timestamps.created_at.as_deref(), Some("made_on"));
        assert_eq!(pair.timestamps.updated_at.as_deref(), Some("touched_on"));
    }

    #[test]
    fn reconnect_accepts_bool_or_policy() {
        let off: ConnectConfig =
            serde_json::from_value(json!({"uri": "sqlite:app.db", "reconnect": false})).unwrap();
        assert!(!off.reconnect.enabled);

        let tuned: ConnectConfig = serde_json::from_value(json!({
            "uri": "sqlite:app.db",
            "reconnect": {"max_attempts": 3, "initial_delay_ms": 50},
        }))
        .unwrap();
        assert!(tuned.reconnect.enabled);
        assert_eq!(tuned.reconnect.max_attempts, 3);
        assert_eq!(tuned.reconnect.initial_delay_ms, 50);
        assert_eq!(tuned.reconnect.max_delay_ms, 30000);
    }

    #[test]
    fn pool_sizes() {
        assert_eq!(PoolSize::High.max_connections(), 20);
        assert_eq!(PoolSize::Standard.max_connections(), 10);
        assert_eq!(PoolSize::Low.max_connections(), 2);
    }

    #[test]
    fn elastic_options() {
        let config: ConnectConfig = serde_json::from_value(json!({
            "uri": "https://search.example.net:9200",
            "elastic": {"api_key": "key123", "sniff_on_start": true},
        }))
        .unwrap();
        assert_eq!(config.elastic.api_key.as_deref(), Some("key123"));
        assert!(config.elastic.sniff_on_start);
        assert!(config.elastic.ca_fingerprint.is_none());
    }
}
