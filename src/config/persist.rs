//! Configuration persistence using toml_edit to preserve formatting and comments.

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;
use toml_edit::DocumentMut;

/// Save the entire config to a TOML file
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let new_content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config")?;
    let new_doc: DocumentMut = new_content
        .parse()
        .with_context(|| "Failed to parse serialized config")?;

    std::fs::write(path, new_doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

/// Update just the capture section of the config file, keeping everything
/// else in the document untouched.
pub fn update_capture(path: &Path, capture: &super::CaptureConfig) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut doc: DocumentMut = content
        .parse()
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    let capture_toml = toml::to_string(&CaptureWrapper {
        capture: capture.clone(),
    })
    .with_context(|| "Failed to serialize capture section")?;
    let capture_doc: DocumentMut = capture_toml
        .parse()
        .with_context(|| "Failed to parse serialized capture section")?;

    if let Some(item) = capture_doc.get("capture") {
        doc["capture"] = item.clone();
    }

    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

#[derive(serde::Serialize)]
struct CaptureWrapper {
    capture: super::CaptureConfig,
}
