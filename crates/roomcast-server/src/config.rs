//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration files (`roomcast.toml`, `/etc/roomcast/roomcast.toml`,
//!   `~/.config/roomcast/roomcast.toml`)
//! - Environment variables (`ROOMCAST_*`, `__` for nested keys, e.g.
//!   `ROOMCAST_DISPATCH__SEND_TIMEOUT_MS`)
//! - An explicit file passed with `--config`

use anyhow::{Context, Result};
use roomcast_core::{DispatcherConfig, LifecycleConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config files searched by [`Config::load`], lowest priority first.
const CONFIG_PATHS: [&str; 3] = [
    "~/.config/roomcast/roomcast.toml",
    "/etc/roomcast/roomcast.toml",
    "roomcast.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Live subscription configuration.
    #[serde(default)]
    pub subscribe: SubscribeConfig,

    /// Event fan-out configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Live subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeConfig {
    /// Path prefix of the subscribe endpoint; the room ID follows it.
    #[serde(default = "default_subscribe_path")]
    pub path: String,

    /// Frames buffered per subscriber before sends start waiting.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Event fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Events waiting for fan-out before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on a single subscriber send in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_subscribe_path() -> String {
    "/subscribe".to_string()
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_send_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            subscribe: SubscribeConfig::default(),
            dispatch: DispatchConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            path: default_subscribe_path(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default file locations and `ROOMCAST_*`
    /// environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            builder = builder.add_source(
                ::config::File::from(Path::new(expanded.as_ref()))
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }

        Self::from_builder(builder.add_source(
            ::config::Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self> {
        builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Route of the subscribe endpoint.
    #[must_use]
    pub fn subscribe_route(&self) -> String {
        format!("{}/:room_id", self.subscribe.path.trim_end_matches('/'))
    }

    /// Dispatcher settings derived from this configuration.
    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            send_timeout: Duration::from_millis(self.dispatch.send_timeout_ms),
        }
    }

    /// Lifecycle settings derived from this configuration.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            outbound_buffer: self.subscribe.outbound_buffer,
        }
    }
}
