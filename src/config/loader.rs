/// Configuration loading from gradebox.json
use crate::config::types::{GradeError, HarnessConfig, Result};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "gradebox.json";

impl HarnessConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GradeError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: HarnessConfig = serde_json::from_str(&config_content)
            .map_err(|e| GradeError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load `gradebox.json` from the project directory, or defaults when absent
    pub fn load_for_project<P: AsRef<Path>>(project_dir: P) -> Result<Self> {
        let config_path = project_dir.as_ref().join(DEFAULT_CONFIG_FILE);
        let mut config = if config_path.exists() {
            log::debug!("loading configuration from {}", config_path.display());
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.project_dir = project_dir.as_ref().to_path_buf();
        Ok(config)
    }
}
