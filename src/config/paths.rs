//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    // Check for explicit override
    if let Ok(dir) = std::env::var("TRANSLINK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    // Use XDG config directory or fallback
    dirs::config_dir()
        .map(|d| d.join("translink"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("translink"))
                .unwrap_or_else(|| PathBuf::from(".translink"))
        })
}

/// Get the main configuration file path
///
/// `TRANSLINK_CONFIG` wins; otherwise `config.json` in the config dir, or
/// `config.toml` when only that one exists.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TRANSLINK_CONFIG") {
        return PathBuf::from(path);
    }

    let dir = config_dir();
    let json = dir.join("config.json");
    let toml = dir.join("config.toml");
    if !json.exists() && toml.exists() {
        toml
    } else {
        json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        // Just ensure these don't panic
        let _ = config_dir();
        let path = config_path();
        assert!(path.extension().is_some());
    }
}
