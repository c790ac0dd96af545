use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub socket: SocketConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Capture geometry and rate handed to the encoder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second; values <= 0 fall back to 15.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: i32,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_frame_rate() -> i32 {
    15
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Capture resolution. Its `Display` form is the parameter cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Canonical cache key, e.g. `640x480`.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocketConfig {
    /// Path of the local listening socket shared by all capture sessions.
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
}

fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("vidbridge.sock")
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// TOML file backing the key-value store.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Store name the parameter sets live under.
    #[serde(default = "default_cache_store")]
    pub store: String,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./vidbridge-cache.toml")
}
fn default_cache_store() -> String {
    "vidbridge.h264".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            store: default_cache_store(),
        }
    }
}

/// Limits on the sample recording made when no parameter sets are cached.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_duration")]
    pub max_duration_ms: u64,

    #[serde(default = "default_probe_size")]
    pub max_file_size: u64,

    /// Upper bound on waiting for the encoder to hit either limit.
    #[serde(default = "default_probe_wait")]
    pub wait_ceiling_ms: u64,

    /// Where the temporary sample file goes (system temp dir if unset).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_probe_duration() -> u64 {
    1000
}
fn default_probe_size() -> u64 {
    1024 * 1024
}
fn default_probe_wait() -> u64 {
    5000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_probe_duration(),
            max_file_size: default_probe_size(),
            wait_ceiling_ms: default_probe_wait(),
            temp_dir: None,
        }
    }
}

impl ProbeConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn wait_ceiling(&self) -> Duration {
        Duration::from_millis(self.wait_ceiling_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Parameter sets older than this are re-sent before the next key NAL.
    #[serde(default = "default_parameter_set_interval")]
    pub parameter_set_interval_ms: u64,

    /// Polls of the encoder stop worker before giving up on it.
    #[serde(default = "default_stop_poll_attempts")]
    pub stop_poll_attempts: u32,

    #[serde(default = "default_stop_poll_interval")]
    pub stop_poll_interval_ms: u64,
}

fn default_parameter_set_interval() -> u64 {
    750
}
fn default_stop_poll_attempts() -> u32 {
    10
}
fn default_stop_poll_interval() -> u64 {
    100
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            parameter_set_interval_ms: default_parameter_set_interval(),
            stop_poll_attempts: default_stop_poll_attempts(),
            stop_poll_interval_ms: default_stop_poll_interval(),
        }
    }
}

impl StreamConfig {
    pub fn parameter_set_interval(&self) -> Duration {
        Duration::from_millis(self.parameter_set_interval_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}
