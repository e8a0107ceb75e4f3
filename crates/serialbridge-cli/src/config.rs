//! Configuration – reads/writes `~/.serialbridge/config.toml`.

use serde::{Deserialize, Serialize};
use serialbridge_runtime::BridgeConfig;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "SERIALBRIDGE_CONFIG";

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial device the microcontroller is attached to.
    #[serde(default = "default_device_path")]
    pub device_path: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on a single blocking read, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Cadence of the inbound poller, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-topic event bus capacity.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Port of the rosbridge WebSocket endpoint.  Unset disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
}

fn default_device_path() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_bus_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            bus_capacity: default_bus_capacity(),
            ws_port: None,
        }
    }
}

impl Config {
    /// Translate into the runtime's startup parameters.
    ///
    /// Zero intervals and capacities are raised to 1, the smallest values
    /// the timer and the bus accept.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            device_path: self.device_path.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            ws_addr: self
                .ws_port
                .map(|port| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))),
        }
    }

    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Return the config file path: `$SERIALBRIDGE_CONFIG` when set, otherwise
/// `~/.serialbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".serialbridge").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SERIALBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SERIALBRIDGE_DEVICE` | `device_path` |
/// | `SERIALBRIDGE_BAUD` | `baud_rate` |
/// | `SERIALBRIDGE_READ_TIMEOUT_MS` | `read_timeout_ms` |
/// | `SERIALBRIDGE_POLL_INTERVAL_MS` | `poll_interval_ms` |
/// | `SERIALBRIDGE_WS_PORT` | `ws_port` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SERIALBRIDGE_DEVICE") {
        cfg.device_path = v;
    }
    if let Some(baud) = env_parse("SERIALBRIDGE_BAUD") {
        cfg.baud_rate = baud;
    }
    if let Some(ms) = env_parse("SERIALBRIDGE_READ_TIMEOUT_MS") {
        cfg.read_timeout_ms = ms;
    }
    if let Some(ms) = env_parse("SERIALBRIDGE_POLL_INTERVAL_MS") {
        cfg.poll_interval_ms = ms;
    }
    if let Some(port) = env_parse("SERIALBRIDGE_WS_PORT") {
        cfg.ws_port = Some(port);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Save the config to disk, creating the parent directory if necessary.
pub fn save(cfg: &Config) -> Result<PathBuf, String> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
