//! Logging configuration
//!
//! Global and per-component log levels plus output destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Library modules that can be given their own level.
pub const COMPONENTS: [&str; 3] = ["transform", "estimate", "tilespec"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily-rolled JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// File name prefix inside `log_directory`
    pub file_prefix: String,

    /// Include file location in console output
    pub include_file_location: bool,

    /// Level for transform decoding, resolution and point mapping
    pub transform_level: String,

    /// Level for estimation and approximation
    pub estimate_level: String,

    /// Level for tile spec handling
    pub tilespec_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            file_prefix: "render-tform.log".to_string(),
            include_file_location: false,
            transform_level: "info".to_string(),
            estimate_level: "info".to_string(),
            tilespec_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for local debugging
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            transform_level: "trace".to_string(),
            estimate_level: "debug".to_string(),
            tilespec_level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Quiet configuration for batch runs
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/render-tform")),
            transform_level: "warn".to_string(),
            estimate_level: "info".to_string(),
            tilespec_level: "warn".to_string(),
            ..Self::default()
        }
    }

    /// Console-only configuration at the given level, used for `-v` flags.
    pub fn with_level(level: &str) -> Self {
        Self {
            global_level: level.to_string(),
            transform_level: level.to_string(),
            estimate_level: level.to_string(),
            tilespec_level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let levels = [
            ("global_level", &self.global_level),
            ("transform_level", &self.transform_level),
            ("estimate_level", &self.estimate_level),
            ("tilespec_level", &self.tilespec_level),
        ];
        for (name, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        if self.file_prefix.trim().is_empty() {
            return Err("file_prefix must not be empty".to_string());
        }

        Ok(())
    }

    /// Effective log level for a component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "transform" | "codec" | "list" => &self.transform_level,
            "estimate" | "estimation" => &self.estimate_level,
            "tilespec" | "tiles" => &self.tilespec_level,
            _ => &self.global_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = LoggingConfig::development();
        assert_eq!(config.global_level, "debug");
        assert_eq!(config.transform_level, "trace");
        assert!(config.include_file_location);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        config.estimate_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("estimate_level"));

        config.estimate_level = "debug".to_string();
        config.file_prefix = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_level_selection() {
        let config = LoggingConfig::development();
        assert_eq!(config.get_component_level("codec"), "trace");
        assert_eq!(config.get_component_level("estimation"), "debug");
        assert_eq!(config.get_component_level("unknown"), "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LoggingConfig = toml::from_str("global_level = \"warn\"").unwrap();
        assert_eq!(config.global_level, "warn");
        assert_eq!(config.estimate_level, "info");
    }
}
