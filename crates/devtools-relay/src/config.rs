use serde::Deserialize;
use std::path::{Path, PathBuf};

use script_alert::MethodRule;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_socket")]
    pub upstream_socket: PathBuf,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream_socket: default_socket(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_socket")]
    pub socket_path: PathBuf,
    #[serde(default = "default_gateway_host")]
    pub gateway_host: String,
    #[serde(default = "default_port")]
    pub gateway_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket(),
            gateway_host: default_gateway_host(),
            gateway_port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

/// Extra dangerous methods on top of the built-in table.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub extra_methods: Vec<MethodRule>,
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_port() -> u16 {
    18792
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/devtools-relay.sock")
}

fn default_max_frame_len() -> usize {
    ws_tap::DEFAULT_MAX_FRAME_LEN
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("relay-audit.jsonl")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// Returns `Ok(None)` when the file does not exist so the caller can fall
/// back to defaults (and say so once logging is up).
pub fn load(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    parse(&contents)
        .map(Some)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

fn parse(yaml: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(yaml)
}
