use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::projection::TransformRules;
use crate::stream::{CommitOrdering, DEFAULT_ACK_CHANNEL_BUFFER, DEFAULT_MAX_PENDING_OFFSETS};
use crate::util::{parse_bool_flag, parse_duration, parse_list};

pub const DEFAULT_BULK_FLUSH_BYTES: usize = 10_000_000;
pub const DEFAULT_BULK_FLUSH_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_BULK_CHANNEL_BUFFER: usize = 1000;

/// Environment variables read by [`Config::apply_env`].
pub const ENV_KEYS: &[&str] = &[
    "EVS_SOURCE",
    "EVS_SOURCE_FILE",
    "KAFKA_BOOTSTRAP_SERVER",
    "KAFKA_EVENT_STREAM_TOPIC",
    "KAFKA_GROUP_ID",
    "KAFKA_CLIENT_ID",
    "KAFKA_CLIENT_SECRET",
    "KAFKA_SASL_MECHANISM",
    "OPENSEARCH_ADDRESS",
    "OPENSEARCH_USERNAME",
    "OPENSEARCH_PASSWORD",
    "OPENSEARCH_INDEX_PREFIX",
    "OPENSEARCH_BULK_FLUSH_BYTES",
    "OPENSEARCH_BULK_FLUSH_INTERVAL",
    "OPENSEARCH_BULK_TIMEOUT",
    "OPENSEARCH_SSL_INSECURE_SKIP_VERIFY",
    "SNAPSHOT_BACKEND",
    "SNAPSHOT_DB_PATH",
    "SNAPSHOT_EXPIRATION",
    "EXCLUDED_USER_NAMES",
    "ACK_CHANNEL_BUFFER_SIZE",
    "BULK_CHANNEL_BUFFER_SIZE",
    "COMMIT_ORDERING",
    "MAX_PENDING_OFFSETS",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Kafka,
    /// Replay newline-delimited envelopes from a file.
    File,
}

impl FromStr for SourceKind {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "file" => Ok(Self::File),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaslMechanism {
    #[default]
    Plain,
    /// SCRAM-SHA-512.
    Scram,
}

impl FromStr for SaslMechanism {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM" | "SCRAM-SHA-512" => Ok(Self::Scram),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    /// SASL username; SASL is off when unset.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub sasl_mechanism: SaslMechanism,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index_prefix: String,
    pub bulk_flush_bytes: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub bulk_flush_interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub bulk_timeout: Duration,
    pub ssl_insecure_skip_verify: bool,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: None,
            password: None,
            index_prefix: String::new(),
            bulk_flush_bytes: DEFAULT_BULK_FLUSH_BYTES,
            bulk_flush_interval: DEFAULT_BULK_FLUSH_INTERVAL,
            bulk_timeout: DEFAULT_BULK_TIMEOUT,
            ssl_insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for SnapshotBackend {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub backend: SnapshotBackend,
    pub db_path: PathBuf,
    #[serde(deserialize_with = "deserialize_duration")]
    pub expiration: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            backend: SnapshotBackend::Memory,
            db_path: PathBuf::from("snapshots.sqlite"),
            expiration: evs_snapshots::DEFAULT_SNAPSHOT_EXPIRATION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Activity for clusters owned by these users is never stored.
    pub excluded_user_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub ack_channel_buffer: usize,
    pub bulk_channel_buffer: usize,
    pub commit_ordering: CommitOrdering,
    /// Per-partition offsets held back under contiguous ordering before the
    /// oldest unacknowledged one is abandoned.
    pub max_pending_offsets: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_channel_buffer: DEFAULT_ACK_CHANNEL_BUFFER,
            bulk_channel_buffer: DEFAULT_BULK_CHANNEL_BUFFER,
            commit_ordering: CommitOrdering::default(),
            max_pending_offsets: DEFAULT_MAX_PENDING_OFFSETS,
        }
    }
}

/// Consumer configuration: defaults, then the TOML file named by
/// `EVS_CONFIG`, then environment variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub kafka: KafkaConfig,
    pub opensearch: OpenSearchConfig,
    pub snapshots: SnapshotConfig,
    pub projection: ProjectionConfig,
    pub delivery: DeliveryConfig,
    pub rules: TransformRules,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn env_parse<T, F>(key: &'static str, parse: F) -> Result<Option<T>, ConfigError>
where
    F: FnOnce(&str) -> Option<T>,
{
    match env_string(key) {
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| invalid(key, &raw)),
        None => Ok(None),
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env_string("EVS_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(kind) = env_parse("EVS_SOURCE", |raw| raw.parse().ok())? {
            self.source.kind = kind;
        }
        if let Some(file) = env_string("EVS_SOURCE_FILE") {
            self.source.file = Some(PathBuf::from(file));
        }

        let kafka = &mut self.kafka;
        if let Some(servers) = env_string("KAFKA_BOOTSTRAP_SERVER") {
            kafka.bootstrap_servers = servers;
        }
        if let Some(topic) = env_string("KAFKA_EVENT_STREAM_TOPIC") {
            kafka.topic = topic;
        }
        if let Some(group) = env_string("KAFKA_GROUP_ID") {
            kafka.group_id = group;
        }
        if let Some(id) = env_string("KAFKA_CLIENT_ID") {
            kafka.client_id = Some(id);
        }
        if let Some(secret) = env_string("KAFKA_CLIENT_SECRET") {
            kafka.client_secret = Some(secret);
        }
        if let Some(mechanism) = env_parse("KAFKA_SASL_MECHANISM", |raw| raw.parse().ok())? {
            kafka.sasl_mechanism = mechanism;
        }

        let search = &mut self.opensearch;
        if let Some(address) = env_string("OPENSEARCH_ADDRESS") {
            search.address = address;
        }
        if let Some(username) = env_string("OPENSEARCH_USERNAME") {
            search.username = Some(username);
        }
        if let Some(password) = env_string("OPENSEARCH_PASSWORD") {
            search.password = Some(password);
        }
        if let Some(prefix) = env_string("OPENSEARCH_INDEX_PREFIX") {
            search.index_prefix = prefix;
        }
        if let Some(bytes) = env_parse("OPENSEARCH_BULK_FLUSH_BYTES", |raw| raw.parse().ok())? {
            search.bulk_flush_bytes = bytes;
        }
        if let Some(interval) = env_parse("OPENSEARCH_BULK_FLUSH_INTERVAL", parse_duration)? {
            search.bulk_flush_interval = interval;
        }
        if let Some(timeout) = env_parse("OPENSEARCH_BULK_TIMEOUT", parse_duration)? {
            search.bulk_timeout = timeout;
        }
        if let Some(skip) = env_parse("OPENSEARCH_SSL_INSECURE_SKIP_VERIFY", parse_bool_flag)? {
            search.ssl_insecure_skip_verify = skip;
        }

        if let Some(backend) = env_parse("SNAPSHOT_BACKEND", |raw| raw.parse().ok())? {
            self.snapshots.backend = backend;
        }
        if let Some(path) = env_string("SNAPSHOT_DB_PATH") {
            self.snapshots.db_path = PathBuf::from(path);
        }
        if let Some(expiration) = env_parse("SNAPSHOT_EXPIRATION", parse_duration)? {
            self.snapshots.expiration = expiration;
        }

        // An empty value clears the list, so read the raw variable here.
        if let Ok(raw) = std::env::var("EXCLUDED_USER_NAMES") {
            self.projection.excluded_user_names = parse_list(&raw);
        }

        if let Some(size) = env_parse("ACK_CHANNEL_BUFFER_SIZE", |raw| raw.parse().ok())? {
            self.delivery.ack_channel_buffer = size;
        }
        if let Some(size) = env_parse("BULK_CHANNEL_BUFFER_SIZE", |raw| raw.parse().ok())? {
            self.delivery.bulk_channel_buffer = size;
        }
        if let Some(ordering) = env_parse("COMMIT_ORDERING", |raw| raw.parse().ok())? {
            self.delivery.commit_ordering = ordering;
        }
        if let Some(limit) = env_parse("MAX_PENDING_OFFSETS", |raw| raw.parse().ok())? {
            self.delivery.max_pending_offsets = limit;
        }
        Ok(())
    }

    /// Check the settings the selected adapters need before connecting anywhere.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.source.kind {
            SourceKind::Kafka => {
                if self.kafka.bootstrap_servers.is_empty() {
                    return Err(ConfigError::Missing("KAFKA_BOOTSTRAP_SERVER"));
                }
                if self.kafka.topic.is_empty() {
                    return Err(ConfigError::Missing("KAFKA_EVENT_STREAM_TOPIC"));
                }
                if self.kafka.group_id.is_empty() {
                    return Err(ConfigError::Missing("KAFKA_GROUP_ID"));
                }
                if self.kafka.client_id.is_some() && self.kafka.client_secret.is_none() {
                    return Err(ConfigError::Missing("KAFKA_CLIENT_SECRET"));
                }
            }
            SourceKind::File => {
                if self.source.file.is_none() {
                    return Err(ConfigError::Missing("EVS_SOURCE_FILE"));
                }
            }
        }
        if self.opensearch.address.is_empty() {
            return Err(ConfigError::Missing("OPENSEARCH_ADDRESS"));
        }
        if self.opensearch.bulk_flush_bytes == 0 {
            return Err(invalid("OPENSEARCH_BULK_FLUSH_BYTES", "0"));
        }
        if self.opensearch.bulk_flush_interval.is_zero() {
            return Err(invalid("OPENSEARCH_BULK_FLUSH_INTERVAL", "0s"));
        }
        if self.delivery.ack_channel_buffer == 0 {
            return Err(invalid("ACK_CHANNEL_BUFFER_SIZE", "0"));
        }
        if self.delivery.bulk_channel_buffer == 0 {
            return Err(invalid("BULK_CHANNEL_BUFFER_SIZE", "0"));
        }
        if self.delivery.max_pending_offsets == 0 {
            return Err(invalid("MAX_PENDING_OFFSETS", "0"));
        }
        Ok(())
    }
}
