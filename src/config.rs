//! WolfCast Configuration
//!
//! This module provides configuration structures for the WolfCast
//! playlist replication service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfCast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfCastConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Replication output configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Remote artifact source (object store)
    pub source: SourceConfig,

    /// Notification listener, bound only while this node is leader
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Address to bind for cluster communication
    pub bind_address: String,

    /// Data directory for the replicated artifact
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Group transport flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP heartbeat membership between processes
    Tcp,
    /// In-process group (single host, development)
    Local,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Logical group name all nodes join
    #[serde(default = "default_group")]
    pub group: String,

    /// Which group transport to use
    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// Seed peer addresses (host:port)
    #[serde(default)]
    pub peers: Vec<String>,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A member silent for this long is removed from the view
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

/// Replication output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Path of the local artifact file (relative paths resolve under data_dir)
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Bucket holding the playlist objects
    pub bucket: String,

    /// Region name
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (S3-compatible stores)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,
}

/// Notification listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Bind address for the notify endpoint
    #[serde(default = "default_trigger_address")]
    pub bind_address: String,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_group() -> String {
    "wolfcast-cluster".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Tcp
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_heartbeat_timeout_ms() -> u64 {
    3000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_trigger_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfcast")
}

/// File name used when no output file is configured
pub const DEFAULT_OUTPUT_FILE: &str = "replicated_file.m3u8";

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            transport: default_transport(),
            peers: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_trigger_address(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfCastConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfCastConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.cluster.group.is_empty() {
            return Err(crate::Error::Config("cluster.group cannot be empty".into()));
        }

        if self.cluster.heartbeat_timeout_ms <= self.cluster.heartbeat_interval_ms {
            return Err(crate::Error::Config(
                "cluster.heartbeat_timeout_ms must exceed cluster.heartbeat_interval_ms".into(),
            ));
        }

        if self.source.bucket.is_empty() {
            return Err(crate::Error::Config("source.bucket cannot be empty".into()));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Path of the local artifact file
    pub fn output_file(&self) -> PathBuf {
        match &self.replication.output_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.node.data_dir.join(path),
            None => self.node.data_dir.join(DEFAULT_OUTPUT_FILE),
        }
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_interval_ms)
    }

    /// Get heartbeat timeout as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[node]
id = "node-1"
bind_address = "0.0.0.0:7654"
data_dir = "/var/lib/wolfcast"

[cluster]
group = "playlists"
peers = ["node-2:7654", "node-3:7654"]

[source]
bucket = "streams"
region = "eu-west-1"
"#;

    #[test]
    fn test_parse_config() {
        let config = WolfCastConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.node.id, "node-1");
        assert_eq!(config.cluster.group, "playlists");
        assert_eq!(config.cluster.peers.len(), 2);
        assert_eq!(config.cluster.transport, TransportKind::Tcp);
        assert_eq!(config.source.region, "eu-west-1");
        assert_eq!(config.trigger.bind_address, "0.0.0.0:8090");
        assert_eq!(config.advertise_address(), "0.0.0.0:7654");
        assert_eq!(
            config.output_file(),
            PathBuf::from("/var/lib/wolfcast/replicated_file.m3u8")
        );
    }

    #[test]
    fn test_output_file_resolution() {
        let mut config = WolfCastConfig::from_str(SAMPLE).unwrap();
        config.replication.output_file = Some(PathBuf::from("live/index.m3u8"));
        assert_eq!(
            config.output_file(),
            PathBuf::from("/var/lib/wolfcast/live/index.m3u8")
        );

        config.replication.output_file = Some(PathBuf::from("/srv/hls/index.m3u8"));
        assert_eq!(config.output_file(), PathBuf::from("/srv/hls/index.m3u8"));
    }

    #[test]
    fn test_validation_rejects_bad_heartbeats() {
        let toml = SAMPLE.replace(
            "[source]",
            "heartbeat_interval_ms = 1000\nheartbeat_timeout_ms = 500\n\n[source]",
        );
        assert!(matches!(
            WolfCastConfig::from_str(&toml),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_node_id() {
        let toml = SAMPLE.replace("id = \"node-1\"", "id = \"\"");
        assert!(WolfCastConfig::from_str(&toml).is_err());
    }
}
