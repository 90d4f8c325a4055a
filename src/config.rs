//! Runtime configuration for operator execution

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{QError, QResult};
use crate::ops::core::RuntimeMode;

/// Knobs read by every forward call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Outputs with at least this many elements are split in `Auto` mode.
    pub split_threshold: usize,
    /// Master switch for the secondary core.
    pub dual_core_enabled: bool,
    /// Mode used by callers that do not pick one.
    pub default_mode: RuntimeMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            split_threshold: 1024,
            dual_core_enabled: true,
            default_mode: RuntimeMode::Auto,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> QResult<()> {
        if self.split_threshold < 2 {
            return Err(QError::configuration(format!(
                "split_threshold must be at least 2, got {}",
                self.split_threshold
            )));
        }
        Ok(())
    }
}

/// Holds the active configuration and the file it was loaded from.
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: RuntimeConfig,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> QResult<()> {
        let content = std::fs::read_to_string(path)?;

        let config: RuntimeConfig = serde_json::from_str(&content)
            .map_err(|e| QError::operation_error("config", &format!("Failed to parse config file: {}", e)))?;
        config.validate()?;

        self.config = config;
        self.config_file = Some(path.to_path_buf());
        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> QResult<()> {
        let content = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(path, content)
            .map_err(|e| QError::operation_error("config", &format!("Failed to write config file: {}", e)))?;
        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> RuntimeConfig {
        self.config.clone()
    }

    /// Apply `f`, keep the result only if it validates, and persist it when
    /// a config file is attached.
    pub fn update_config<F>(&mut self, f: F) -> QResult<()>
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut next = self.config.clone();
        f(&mut next);
        next.validate()?;
        self.config = next;

        if let Some(path) = &self.config_file {
            self.save_to_file(path)?;
        }
        Ok(())
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Snapshot of the process-wide configuration.
pub fn get_config() -> RuntimeConfig {
    CONFIG_MANAGER.read().get_config()
}

pub fn update_config<F>(f: F) -> QResult<()>
where
    F: FnOnce(&mut RuntimeConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

pub fn load_config_from_file(path: &Path) -> QResult<()> {
    CONFIG_MANAGER.write().load_from_file(path).map_err(|e| {
        tracing::warn!(
            code = ?e.code(),
            recoverable = e.is_recoverable(),
            "keeping current configuration: {}",
            e
        );
        e
    })
}

/// Fluent construction of a [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: RuntimeConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split_threshold(mut self, elements: usize) -> Self {
        self.config.split_threshold = elements;
        self
    }

    pub fn dual_core(mut self, enabled: bool) -> Self {
        self.config.dual_core_enabled = enabled;
        self
    }

    pub fn default_mode(mut self, mode: RuntimeMode) -> Self {
        self.config.default_mode = mode;
        self
    }

    pub fn build(self) -> QResult<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Install as the process-wide configuration.
    pub fn apply(self) -> QResult<()> {
        let config = self.build()?;
        update_config(|c| *c = config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .split_threshold(64)
            .dual_core(false)
            .default_mode(RuntimeMode::SingleCore)
            .build()
            .unwrap();
        assert_eq!(config.split_threshold, 64);
        assert!(!config.dual_core_enabled);
        assert_eq!(config.default_mode, RuntimeMode::SingleCore);

        assert!(ConfigBuilder::new().split_threshold(1).build().is_err());
    }

    #[test]
    fn test_config_manager() {
        let mut manager = ConfigManager::new();
        assert!(manager.get_config().dual_core_enabled);

        manager.update_config(|c| c.dual_core_enabled = false).unwrap();
        assert!(!manager.get_config().dual_core_enabled);

        assert!(manager.update_config(|c| c.split_threshold = 0).is_err());
        assert_eq!(manager.get_config().split_threshold, RuntimeConfig::default().split_threshold);
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("qmodule_config.json");

        let mut manager = ConfigManager::new().with_config_file(config_path.clone());
        manager.update_config(|c| c.split_threshold = 4096).unwrap();

        let mut loaded = ConfigManager::new();
        loaded.load_from_file(&config_path).unwrap();
        assert_eq!(loaded.get_config().split_threshold, 4096);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.json");
        std::fs::write(&config_path, r#"{"default_mode":"MultiCore"}"#).unwrap();

        let mut manager = ConfigManager::new();
        manager.load_from_file(&config_path).unwrap();
        let config = manager.get_config();
        assert_eq!(config.default_mode, RuntimeMode::MultiCore);
        assert!(config.dual_core_enabled);

        std::fs::write(&config_path, "not json").unwrap();
        let err = manager.load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, QError::OperationError { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unreadable_file_is_recoverable() {
        let temp_dir = tempdir().unwrap();
        let err = load_config_from_file(&temp_dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, QError::IoError(_)));
        assert!(err.is_recoverable());
    }
}
