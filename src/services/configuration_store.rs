use crate::events::{EngineEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::configuration::names_collide;
use crate::models::{Configuration, ConfigurationDocument, ConfigurationDraft, ConfigurationIssue};
use crate::services::persistence::{BackupRotation, sweep_stale_temp_files, write_atomic};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

/// Default number of rolling backups kept for the configurations file.
pub const DEFAULT_BACKUP_COUNT: usize = 10;

/// A configuration rejected by validation, with every rule it breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidConfiguration {
    pub name: String,
    pub issues: Vec<ConfigurationIssue>,
}

/// Errors from the configuration store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid configurations: {}", describe_invalid(.0))]
    Invalid(Vec<InvalidConfiguration>),

    #[error("A configuration named '{0}' already exists")]
    NameTaken(String),

    #[error("Configuration names must be unique, found duplicates: {}", .0.join(", "))]
    DuplicateNames(Vec<String>),

    #[error("Configuration {0} not found")]
    NotFound(String),

    #[error("Configurations file {path} is corrupted and no valid backup exists")]
    Corrupted { path: Utf8PathBuf },

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize configurations: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),
}

fn describe_invalid(invalid: &[InvalidConfiguration]) -> String {
    invalid
        .iter()
        .map(|entry| {
            let issues: Vec<String> = entry.issues.iter().map(ToString::to_string).collect();
            format!("'{}' ({})", entry.name, issues.join("; "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Durable store of every [`Configuration`].
///
/// The whole collection lives in one YAML document. Each public operation
/// holds a single async mutex for its full load-modify-save cycle, so
/// concurrent callers queue up instead of overwriting each other.
///
/// # Files
///
/// - `<data_dir>/configurations.yaml`: canonical document
/// - `<data_dir>/backups/configurations.<timestamp>.yaml`: one per successful
///   write, newest `backup_count` kept
pub struct ConfigurationStore {
    path: Utf8PathBuf,
    backups: BackupRotation,
    lock: Mutex<()>,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl ConfigurationStore {
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        backup_dir: impl Into<Utf8PathBuf>,
        backup_count: usize,
        events: EventBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        let path = path.into();
        Self {
            backups: BackupRotation::new(backup_dir, &path, backup_count),
            path,
            lock: Mutex::new(()),
            events,
            metrics,
        }
    }

    /// Store rooted at `data_dir` with default backup settings.
    pub fn in_dir(data_dir: &Utf8Path) -> Self {
        Self::new(
            data_dir.join("configurations.yaml"),
            data_dir.join("backups"),
            DEFAULT_BACKUP_COUNT,
            EventBus::new(),
            Arc::new(Metrics::new()),
        )
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupRotation {
        &self.backups
    }

    /// Every stored configuration, in stored order.
    pub async fn load_all(&self) -> Result<Vec<Configuration>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load_unlocked().await
    }

    /// Replace the whole collection. Nothing is written unless every entry is
    /// valid and all names are distinct.
    pub async fn save_all(&self, configs: &[Configuration]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.save_unlocked(configs).await
    }

    pub async fn create(&self, draft: ConfigurationDraft) -> Result<Configuration, StoreError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.load_unlocked().await?;

        if configs.iter().any(|c| c.has_name(&draft.name)) {
            return Err(StoreError::NameTaken(draft.name.trim().to_string()));
        }

        let config = Configuration::from_draft(draft, Utc::now());
        reject_invalid(&config)?;

        configs.push(config.clone());
        self.save_unlocked(&configs).await?;

        tracing::info!("Created configuration '{}' ({})", config.name, config.id);
        Ok(config)
    }

    /// Replace the stored entry with the same id. `id` and `created_at` of the
    /// stored entry are kept whatever the caller passes.
    pub async fn update(&self, edited: Configuration) -> Result<Configuration, StoreError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.load_unlocked().await?;

        let index = configs
            .iter()
            .position(|c| c.id == edited.id)
            .ok_or_else(|| StoreError::NotFound(edited.id.clone()))?;

        if configs
            .iter()
            .any(|c| c.id != edited.id && c.has_name(&edited.name))
        {
            return Err(StoreError::NameTaken(edited.name.trim().to_string()));
        }

        let merged = configs[index].apply_update(edited);
        reject_invalid(&merged)?;

        configs[index] = merged.clone();
        self.save_unlocked(&configs).await?;

        tracing::info!("Updated configuration '{}' ({})", merged.name, merged.id);
        Ok(merged)
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.load_unlocked().await?;

        let index = configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let removed = configs.remove(index);
        self.save_unlocked(&configs).await?;

        tracing::info!("Deleted configuration '{}' ({})", removed.name, removed.id);
        Ok(())
    }

    /// Copy an existing configuration under a new name.
    pub async fn duplicate(&self, id: &str, new_name: &str) -> Result<Configuration, StoreError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.load_unlocked().await?;

        let source = configs
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if configs.iter().any(|c| c.has_name(new_name)) {
            return Err(StoreError::NameTaken(new_name.trim().to_string()));
        }

        let copy = source.duplicate_as(new_name, Utc::now());
        reject_invalid(&copy)?;

        configs.push(copy.clone());
        self.save_unlocked(&configs).await?;

        tracing::info!("Duplicated configuration {} as '{}' ({})", id, copy.name, copy.id);
        Ok(copy)
    }

    /// Stamp `last_used_at` with the current time.
    pub async fn mark_used(&self, id: &str) -> Result<Configuration, StoreError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.load_unlocked().await?;

        let config = configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        config.last_used_at = Some(Utc::now());
        let used = config.clone();

        self.save_unlocked(&configs).await?;
        Ok(used)
    }

    /// Look up a configuration; an unknown id is `None`, not an error.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Configuration>, StoreError> {
        let _guard = self.lock.lock().await;
        let configs = self.load_unlocked().await?;
        Ok(configs.into_iter().find(|c| c.id == id))
    }

    async fn load_unlocked(&self) -> Result<Vec<Configuration>, StoreError> {
        sweep_stale_temp_files(&self.path).await;

        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No configurations file at {}, creating an empty one", self.path);
                self.save_unlocked(&[]).await?;
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_yaml_ng::from_str::<ConfigurationDocument>(&contents) {
            Ok(document) => {
                tracing::debug!(
                    "Loaded {} configurations from {}",
                    document.configurations.len(),
                    self.path
                );
                Ok(document.configurations)
            }
            Err(e) => {
                tracing::error!("Configurations file {} is unreadable: {}", self.path, e);
                self.recover_from_backup().await
            }
        }
    }

    /// Promote the newest backup that still parses to be the canonical file.
    async fn recover_from_backup(&self) -> Result<Vec<Configuration>, StoreError> {
        let candidates = self.backups.list_newest_first().await.unwrap_or_else(|e| {
            tracing::error!("Could not list backups in {}: {}", self.backups.dir(), e);
            Vec::new()
        });

        for backup in candidates {
            let contents = match fs::read_to_string(&backup).await {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("Skipping unreadable backup {}: {}", backup, e);
                    continue;
                }
            };
            let document = match serde_yaml_ng::from_str::<ConfigurationDocument>(&contents) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!("Skipping corrupted backup {}: {}", backup, e);
                    continue;
                }
            };

            write_atomic(&self.path, contents.as_bytes())
                .await
                .map_err(|source| StoreError::Io {
                    action: "restore backup into",
                    path: self.path.clone(),
                    source,
                })?;
            self.metrics.record_store_write();

            tracing::warn!("Recovered configurations from backup {}", backup);
            self.events
                .emit(EngineEvent::ConfigurationsRecovered { backup: backup.clone() });
            return Ok(document.configurations);
        }

        Err(StoreError::Corrupted {
            path: self.path.clone(),
        })
    }

    async fn save_unlocked(&self, configs: &[Configuration]) -> Result<(), StoreError> {
        let invalid: Vec<InvalidConfiguration> = configs
            .iter()
            .filter_map(|c| {
                let issues = c.validate();
                (!issues.is_empty()).then(|| InvalidConfiguration {
                    name: c.name.clone(),
                    issues,
                })
            })
            .collect();
        if !invalid.is_empty() {
            return Err(StoreError::Invalid(invalid));
        }

        let duplicates = duplicate_names(configs);
        if !duplicates.is_empty() {
            return Err(StoreError::DuplicateNames(duplicates));
        }

        let yaml = serde_yaml_ng::to_string(&ConfigurationDocument::new(configs.to_vec()))?;

        write_atomic(&self.path, yaml.as_bytes())
            .await
            .map_err(|source| StoreError::Io {
                action: "write",
                path: self.path.clone(),
                source,
            })?;
        self.metrics.record_store_write();
        tracing::debug!("Saved {} configurations to {}", configs.len(), self.path);

        // The canonical write already succeeded; backup trouble is only logged.
        match self.backups.write_backup(yaml.as_bytes(), Utc::now()).await {
            Ok(backup) => {
                tracing::debug!("Wrote configurations backup {}", backup);
                let pruned = self.backups.prune().await;
                self.metrics.record_pruned(pruned);
            }
            Err(e) => tracing::warn!("Failed to back up configurations: {}", e),
        }

        Ok(())
    }
}

fn reject_invalid(config: &Configuration) -> Result<(), StoreError> {
    let issues = config.validate();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Invalid(vec![InvalidConfiguration {
            name: config.name.clone(),
            issues,
        }]))
    }
}

/// Names that collide case-insensitively with an earlier entry.
fn duplicate_names(configs: &[Configuration]) -> Vec<String> {
    let mut duplicates = Vec::new();
    for (i, config) in configs.iter().enumerate() {
        if configs[..i].iter().any(|earlier| names_collide(&earlier.name, &config.name)) {
            duplicates.push(config.name.clone());
        }
    }
    duplicates
}
