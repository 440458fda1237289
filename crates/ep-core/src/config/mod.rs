//! Configuration management for the edge poll agent

mod agent;
pub mod serde_utils;

pub use agent::{AgentConfig, MAX_POLL_FREQUENCY};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("edgepoll")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_save_then_load_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.edge_id = "edge-42".to_string();
        config.poll_frequency = Duration::from_secs(12);

        save_config(&path, &config).unwrap();
        let loaded: AgentConfig = load_config(&path).unwrap();

        assert_eq!(loaded.edge_id, "edge-42");
        assert_eq!(loaded.poll_frequency, Duration::from_secs(12));
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let result: Result<AgentConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "edge_id = \"abc\"\ninactivity_timeout = 60\n").unwrap();

        let loaded: AgentConfig = load_config(&path).unwrap();
        assert_eq!(loaded.edge_id, "abc");
        assert_eq!(loaded.inactivity_timeout, Duration::from_secs(60));
        assert_eq!(loaded.poll_frequency, AgentConfig::default().poll_frequency);
    }
}
