// Addon engine facade
//
// Wires the services together from one EngineSettings value:
// - ItemStore (scanning with cache)
// - ActivationEngine (rename-based toggling)
// - SnapshotStore (restore points)
// - ConfigurationStore (named selections)
//
// It handles the multi-step workflows a front end needs: activating a stored
// configuration with an optional restore point, restoring a snapshot by id,
// checking a configuration against the live directories, and snapshot
// retention afterwards.

use crate::events::{EngineEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::{
    CollectionPaths, Configuration, EngineSettings, Item, ItemKind, Provenance, Snapshot,
};
use crate::services::activation::{
    ActivationEngine, ActivationReport, Renamer, RestoreAllReport, RetryPolicy, TokioRenamer,
};
use crate::services::configuration_store::ConfigurationStore;
use crate::services::item_store::ItemStore;
use crate::services::snapshot_store::{RestoreReport, SnapshotStore};
use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of [`AddonEngine::activate_configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationActivation {
    /// The configuration as stored after `last_used_at` was stamped
    pub configuration: Configuration,

    /// Snapshot taken before any rename, when one was requested
    pub restore_point: Option<Snapshot>,

    pub report: ActivationReport,
}

/// Selected item names that no longer exist in their collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingReferences {
    pub vehicles: Vec<String>,
    pub maps: Vec<String>,
}

impl MissingReferences {
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty() && self.maps.is_empty()
    }
}

/// Entry point owning every engine component.
///
/// # Example
/// ```ignore
/// let settings = SettingsManager::new("AddonSwitch Data")?.load_settings()?;
/// let engine = AddonEngine::new(settings)?;
///
/// let outcome = engine.activate_configuration(&id, true).await?;
/// println!("{} items enabled", outcome.report.enabled_count());
/// ```
pub struct AddonEngine {
    settings: EngineSettings,

    /// `None` until the path provider has reported both collections
    paths: Option<CollectionPaths>,

    items: Arc<ItemStore>,
    activation: Arc<ActivationEngine>,
    snapshots: SnapshotStore,
    configurations: ConfigurationStore,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl AddonEngine {
    /// Build an engine on the real filesystem.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::with_renamer(settings, Arc::new(TokioRenamer))
    }

    /// Build an engine whose directory renames go through `renamer`.
    pub fn with_renamer(settings: EngineSettings, renamer: Arc<dyn Renamer>) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)
            .with_context(|| format!("Failed to create data directory: {}", settings.data_dir))?;

        let events = EventBus::new();
        let metrics = Arc::new(Metrics::new());

        let items = Arc::new(ItemStore::new(
            settings.cache_ttl(),
            events.clone(),
            metrics.clone(),
        ));
        let activation = Arc::new(ActivationEngine::new(
            renamer,
            RetryPolicy::new(settings.retry_attempts, settings.retry_delay()),
            events.clone(),
            metrics.clone(),
        ));
        let snapshots = SnapshotStore::new(
            settings.snapshots_dir(),
            items.clone(),
            activation.clone(),
            events.clone(),
            metrics.clone(),
        );
        let configurations = ConfigurationStore::new(
            settings.configurations_path(),
            settings.backups_dir(),
            settings.configuration_backup_count,
            events.clone(),
            metrics.clone(),
        );

        let paths = match (&settings.vehicles_path, &settings.maps_path) {
            (Some(vehicles), Some(maps)) => Some(CollectionPaths::new(vehicles.clone(), maps.clone())),
            _ => {
                tracing::warn!("Collection paths not configured yet; only configuration editing is available");
                None
            }
        };

        tracing::info!("Addon engine initialized with data dir {}", settings.data_dir);

        Ok(Self {
            settings,
            paths,
            items,
            activation,
            snapshots,
            configurations,
            events,
            metrics,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn paths(&self) -> Result<&CollectionPaths> {
        self.paths
            .as_ref()
            .ok_or_else(|| anyhow!("Vehicles and maps directories are not configured"))
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn activation(&self) -> &ActivationEngine {
        &self.activation
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn configurations(&self) -> &ConfigurationStore {
        &self.configurations
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Receive every [`EngineEvent`] emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Current vehicles and maps.
    pub async fn scan(&self) -> Result<(Vec<Item>, Vec<Item>)> {
        let paths = self.paths()?;
        Ok(self.items.scan_all(&paths.vehicles, &paths.maps).await)
    }

    /// Current items of one collection.
    pub async fn scan_kind(&self, kind: ItemKind) -> Result<Vec<Item>> {
        let collection = self.paths()?.for_kind(kind);
        Ok(self.items.scan(collection, kind).await)
    }

    /// Make the enabled items match a stored configuration.
    ///
    /// With `create_restore_point` a snapshot tagged with the configuration is
    /// captured before anything is renamed. Per-item failures are reported in
    /// the returned [`ActivationReport`]; only whole-operation failures are
    /// errors.
    pub async fn activate_configuration(
        &self,
        id: &str,
        create_restore_point: bool,
    ) -> Result<ConfigurationActivation> {
        let paths = self.paths()?;
        let config = self
            .configurations
            .get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Configuration {} not found", id))?;

        let restore_point = if create_restore_point {
            let snapshot = self
                .snapshots
                .capture(paths, Provenance::for_configuration(&config.id, &config.name))
                .await
                .context("Failed to create restore point")?;
            Some(snapshot)
        } else {
            None
        };

        tracing::info!("Activating configuration '{}' ({})", config.name, config.id);
        let report = self
            .activation
            .activate(paths, &config.selected_vehicles, &config.selected_maps)
            .await
            .with_context(|| format!("Failed to activate configuration '{}'", config.name))?;
        self.items.invalidate().await;

        let configuration = self.configurations.mark_used(&config.id).await?;
        self.apply_snapshot_retention().await;

        Ok(ConfigurationActivation {
            configuration,
            restore_point,
            report,
        })
    }

    /// Restore a stored snapshot by id.
    pub async fn restore_snapshot(&self, id: &str) -> Result<RestoreReport> {
        let paths = self.paths()?;
        let snapshot = self.snapshots.get(id).await?;

        let result = self.snapshots.restore(&snapshot, paths).await;
        self.items.invalidate().await;
        self.apply_snapshot_retention().await;

        Ok(result?)
    }

    /// Enable every disabled item in both collections.
    pub async fn enable_everything(&self) -> Result<(RestoreAllReport, RestoreAllReport)> {
        let paths = self.paths()?;
        let vehicles = self.activation.restore_all(&paths.vehicles).await?;
        let maps = self.activation.restore_all(&paths.maps).await?;
        self.items.invalidate().await;
        Ok((vehicles, maps))
    }

    /// Names a configuration selects that no directory provides, enabled or
    /// disabled.
    pub async fn missing_references(&self, config: &Configuration) -> Result<MissingReferences> {
        let (vehicles, maps) = self.scan().await?;
        Ok(MissingReferences {
            vehicles: missing_from(&config.selected_vehicles, &vehicles),
            maps: missing_from(&config.selected_maps, &maps),
        })
    }

    /// Prune snapshots down to the configured count. At least the newest one
    /// always survives.
    async fn apply_snapshot_retention(&self) {
        let keep = self.settings.snapshot_retention.max(1);
        self.snapshots.cleanup(keep).await;
    }
}

fn missing_from(selected: &IndexSet<String>, items: &[Item]) -> Vec<String> {
    selected
        .iter()
        .filter(|name| !items.iter().any(|item| &item.name == *name))
        .cloned()
        .collect()
}
