use crate::models::EngineSettings;
use crate::services::persistence::write_atomic;
use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the settings document inside the settings directory.
pub const SETTINGS_FILE_NAME: &str = "AddonSwitch Settings.yaml";

/// Prefix of the environment variables that override settings,
/// e.g. `ADDONSWITCH_RETRY_ATTEMPTS=5`.
pub const ENV_PREFIX: &str = "ADDONSWITCH";

/// Loads and saves [`EngineSettings`].
///
/// Values come from `AddonSwitch Settings.yaml` when present, then from
/// `ADDONSWITCH_*` environment variables, then from the built-in defaults.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl SettingsManager {
    /// Create a SettingsManager rooted at `config_dir`, creating the directory
    /// if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE_NAME),
            config_dir,
        })
    }

    /// Load settings, layering the environment over the YAML file.
    pub fn load_settings(&self) -> Result<EngineSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let settings: EngineSettings = Config::builder()
            .add_source(File::new(self.settings_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    /// Save settings as YAML, replacing the file atomically.
    pub async fn save_settings(&self, settings: &EngineSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        write_atomic(&self.settings_path, yaml_string.as_bytes())
            .await
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}
