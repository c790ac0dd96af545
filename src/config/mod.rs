pub mod persist;
mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./vidbridge.toml",
        "~/.config/vidbridge/config.toml",
        "/etc/vidbridge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.capture.width == 0 || config.capture.height == 0 {
        anyhow::bail!(
            "Capture resolution must be non-zero, got {}",
            config.capture.resolution()
        );
    }

    if config.capture.frame_rate <= 0 {
        tracing::warn!(
            frame_rate = config.capture.frame_rate,
            "Non-positive frame rate, falling back to 15"
        );
    }

    if config.stream.stop_poll_attempts == 0 {
        anyhow::bail!("stream.stop_poll_attempts cannot be 0");
    }

    if config.probe.max_duration_ms == 0 && config.probe.max_file_size == 0 {
        anyhow::bail!("Probe recording needs a duration or a size limit");
    }

    if config.cache.store.is_empty() {
        anyhow::bail!("cache.store cannot be empty");
    }

    Ok(())
}
