use super::item::CollectionPaths;
use anyhow::{Result, bail};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings from `AddonSwitch Settings.yaml`, overridable through
/// `ADDONSWITCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Root of the persisted state (configurations, backups, snapshots).
    #[serde(default = "default_data_dir")]
    pub data_dir: Utf8PathBuf,

    /// Vehicles collection, as reported by the path provider.
    #[serde(default)]
    pub vehicles_path: Option<Utf8PathBuf>,

    /// Maps collection, as reported by the path provider.
    #[serde(default)]
    pub maps_path: Option<Utf8PathBuf>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Rolling backups of the configurations file to keep.
    #[serde(default = "default_backup_count")]
    pub configuration_backup_count: usize,

    /// Snapshots to keep after each activation or restore.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,

    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vehicles_path: None,
            maps_path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            configuration_backup_count: default_backup_count(),
            snapshot_retention: default_snapshot_retention(),
            debug_mode: false,
        }
    }
}

impl EngineSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn is_fully_configured(&self) -> bool {
        self.vehicles_path.is_some() && self.maps_path.is_some()
    }

    /// Both collection directories, provided they are configured and exist.
    pub fn collection_paths(&self) -> Result<CollectionPaths> {
        let (Some(vehicles), Some(maps)) = (&self.vehicles_path, &self.maps_path) else {
            bail!("Collection paths are not configured (vehicles and maps are both required)");
        };

        for path in [vehicles, maps] {
            if !path.is_dir() {
                bail!("Collection directory does not exist: {}", path);
            }
        }

        Ok(CollectionPaths::new(vehicles.clone(), maps.clone()))
    }

    pub fn configurations_path(&self) -> Utf8PathBuf {
        self.data_dir.join("configurations.yaml")
    }

    pub fn backups_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("backups")
    }

    pub fn snapshots_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("snapshots")
    }
}

fn default_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("AddonSwitch Data")
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_backup_count() -> usize {
    10
}

fn default_snapshot_retention() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_engine_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.cache_ttl(), Duration::from_secs(300));
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.retry_delay(), Duration::from_millis(500));
        assert_eq!(settings.configuration_backup_count, 10);
        assert!(!settings.is_fully_configured());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: EngineSettings = serde_yaml_ng::from_str("retry_attempts: 5\n").unwrap();
        assert_eq!(settings.retry_attempts, 5);
        assert_eq!(settings.cache_ttl_secs, 300);
    }

    #[test]
    fn test_collection_paths_requires_configuration() {
        let settings = EngineSettings::default();
        assert!(settings.collection_paths().is_err());
    }

    #[test]
    fn test_collection_paths_requires_existing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        std::fs::create_dir(root.join("vehicles")).unwrap();

        let mut settings = EngineSettings {
            vehicles_path: Some(root.join("vehicles")),
            maps_path: Some(root.join("maps")),
            ..EngineSettings::default()
        };
        assert!(settings.collection_paths().is_err());

        std::fs::create_dir(root.join("maps")).unwrap();
        settings.maps_path = Some(root.join("maps"));
        let paths = settings.collection_paths().unwrap();
        assert_eq!(paths.maps, root.join("maps"));
    }
}
