//! WolfCast - Leader-Coordinated Playlist Replication
//!
//! Keeps one playlist file identical on every node of a cluster.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfcast::api::HttpServer;
use wolfcast::config::{TransportKind, WolfCastConfig};
use wolfcast::error::{Error, Result};
use wolfcast::group::{GroupTransport, LocalGroupHub, TcpGroup, TcpGroupConfig};
use wolfcast::ingest::{HttpTriggerSource, S3ArtifactSource};
use wolfcast::node::Node;
use wolfcast::storage::ArtifactStore;

/// WolfCast - Leader-Coordinated Playlist Replication
#[derive(Parser)]
#[command(name = "wolfcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfcast.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfCast node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfcast.toml")]
        output: PathBuf,

        /// Node ID (generated when omitted)
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Check node status
    Status {
        /// Node API address to query
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Ask the leader to check a playlist now
    Notify {
        /// Leader notify listener address
        #[arg(short, long, default_value = "localhost:8090")]
        address: String,

        /// Locator of the playlist (e.g. its object URL)
        locator: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = WolfCastConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, &logging.format);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Status { address } => run_status(address).await,
        Commands::Notify { address, locator } => run_notify(address, locator).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the WolfCast node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfCast node...");

    let config = match WolfCastConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };

    tracing::info!("Loaded configuration for node: {}", config.node.id);

    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    let transport: Box<dyn GroupTransport> = match config.cluster.transport {
        TransportKind::Tcp => Box::new(TcpGroup::new(TcpGroupConfig::from_config(&config))),
        TransportKind::Local => {
            tracing::warn!("Using in-process group transport; this node will not see peers");
            Box::new(LocalGroupHub::new().transport(config.node.id.clone()))
        }
    };

    let source = match S3ArtifactSource::new(config.source.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to set up artifact source: {}", e);
            return Err(e);
        }
    };
    let trigger = Arc::new(HttpTriggerSource::new(config.trigger.bind_address.clone()));

    let node = match Node::start(
        &config.cluster.group,
        transport.as_ref(),
        source,
        trigger,
        ArtifactStore::new(config.output_file()),
    )
    .await
    {
        Ok(n) => Arc::new(n),
        Err(e) => {
            tracing::error!("Failed to join group {}: {}", config.cluster.group, e);
            return Err(e);
        }
    };

    let api = HttpServer::new(config.api.clone(), Arc::clone(&node));
    let api_task = tokio::spawn(async move {
        if let Err(e) = api.start().await {
            tracing::error!("HTTP API error: {}", e);
        }
    });

    tracing::info!("WolfCast node {} running. Press Ctrl+C to stop.", config.node.id);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Received shutdown signal");
    api_task.abort();
    node.shutdown().await;
    tracing::info!("WolfCast node stopped");

    Ok(())
}

fn run_init(output: PathBuf, node_id: Option<String>) -> Result<()> {
    let node_id = node_id.unwrap_or_else(|| {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("node-{}", &suffix[..8])
    });

    let config_content = format!(r#"# WolfCast Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7654"
data_dir = "/var/lib/wolfcast/{node_id}"
# advertise_address = "my-public-ip:7654"

[cluster]
group = "wolfcast-cluster"
transport = "tcp"
peers = []
# peers = ["node-2.example.com:7654", "node-3.example.com:7654"]
heartbeat_interval_ms = 500
heartbeat_timeout_ms = 3000

[replication]
output_file = "replicated_file.m3u8"

[source]
bucket = "my-playlists"
region = "us-east-1"
# endpoint = "http://minio.local:9000"
# path_style = true

[trigger]
bind_address = "0.0.0.0:8090"

[api]
enabled = true
bind_address = "0.0.0.0:8080"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your bucket and cluster settings.");
    println!("Then start with: wolfcast start --config {}", output.display());

    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfCastConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Group: {}", config.cluster.group);
            println!("  Bucket: {}", config.source.bucket);
            println!("  Peers: {}", config.cluster.peers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfCastConfig::from_file(&config_path)?;

    println!("WolfCast Node Information");
    println!("=========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Advertise:        {}", config.advertise_address());
    println!("Data Directory:   {}", config.data_dir().display());
    println!("Output File:      {}", config.output_file().display());
    println!();
    println!("Cluster Configuration:");
    println!("  Group:          {}", config.cluster.group);
    println!("  Transport:      {:?}", config.cluster.transport);
    println!("  Peers:          {:?}", config.cluster.peers);
    println!("  Heartbeat:      {} ms", config.cluster.heartbeat_interval_ms);
    println!("  Timeout:        {} ms", config.cluster.heartbeat_timeout_ms);
    println!();
    println!("Source Configuration:");
    println!("  Bucket:         {}", config.source.bucket);
    println!("  Region:         {}", config.source.region);
    println!("  Endpoint:       {}", config.source.endpoint.as_deref().unwrap_or("(default)"));
    println!();
    println!("Notify Listener:  {}", config.trigger.bind_address);
    println!("HTTP API:         {} ({})",
        config.api.bind_address,
        if config.api.enabled { "enabled" } else { "disabled" });

    Ok(())
}

async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await
                .map_err(|e| Error::Network(e.to_string()))?;
            let pretty = serde_json::to_string_pretty(&status)
                .map_err(|e| Error::Internal(e.to_string()))?;
            println!("{}", pretty);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(Error::Network(e.to_string()))
        }
    }
}

async fn run_notify(address: String, locator: String) -> Result<()> {
    let url = format!("http://{}/notify", address);

    let response = reqwest::Client::new()
        .post(&url)
        .body(locator)
        .send()
        .await
        .map_err(|e| {
            eprintln!("Failed to reach notify listener (is {} the leader?): {}", address, e);
            Error::Network(e.to_string())
        })?;

    let status = response.status();
    let body: serde_json::Value = response.json().await
        .map_err(|e| Error::Network(e.to_string()))?;
    println!("{}", body);

    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Network(format!("notify failed with HTTP {}", status)))
    }
}
