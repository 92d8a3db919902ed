use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the photo search REST endpoint.
    pub endpoint: String,
    /// API key for the search endpoint.
    pub api_key: String,
    /// Path of the YAML pin index.
    pub data_file: String,
    /// Directory holding cached image bytes.
    pub cache_dir: String,
    /// Longitude half-extent of the search box, in degrees.
    pub box_half_width: f64,
    /// Latitude half-extent of the search box, in degrees.
    pub box_half_height: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://api.flickr.com/services/rest/".to_string(),
            api_key: "YOUR_API_KEY".to_string(),
            data_file: "data/pins.yaml".to_string(),
            cache_dir: "cache/images".to_string(),
            box_half_width: 1.0,
            box_half_height: 1.0,
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("geopin.yaml"))
    }
}
