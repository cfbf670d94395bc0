//! Storage Layer
//!
//! Platform directories for configuration and fitted drift models.

use anyhow::Result;
use std::path::PathBuf;

/// File name of the default drift model artifact
pub const MODEL_FILE_NAME: &str = "drift_model.json";

/// File name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "ocrdrift", "OcrDriftMonitor")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Where `fit` writes and `score` reads the model unless told otherwise
pub fn default_model_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(MODEL_FILE_NAME))
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}
