use crate::events::{EngineEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::{CollectionPaths, Provenance, Snapshot};
use crate::services::activation::{ActivationEngine, ActivationError, ActivationReport};
use crate::services::item_store::{CollectionUnavailable, ItemStore};
use crate::services::persistence::write_atomic;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

const SNAPSHOT_EXTENSION: &str = "yaml";

/// Errors from the snapshot store
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Collection directory not found: {0}")]
    CollectionMissing(Utf8PathBuf),

    #[error("Collection directory {path} could not be read: {error}")]
    CollectionUnreadable { path: Utf8PathBuf, error: String },

    #[error("Snapshot {0} not found")]
    NotFound(String),

    #[error("Snapshot file {path} is corrupted: {error}")]
    Corrupted { path: Utf8PathBuf, error: String },

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),

    #[error("Restore failed: {source} (safety snapshot {safety_id}{})",
        .rollback_error.as_ref().map(|e| format!(", rollback failed: {e}")).unwrap_or_default())]
    RestoreFailed {
        #[source]
        source: ActivationError,
        safety_id: String,
        rollback_error: Option<String>,
    },
}

impl From<CollectionUnavailable> for SnapshotError {
    fn from(error: CollectionUnavailable) -> Self {
        match error {
            CollectionUnavailable::Missing(path) => Self::CollectionMissing(path),
            CollectionUnavailable::Unreadable { path, error } => {
                Self::CollectionUnreadable { path, error }
            }
        }
    }
}

/// Outcome of a successful [`SnapshotStore::restore`].
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// State captured just before the restore; restoring it undoes the call.
    pub safety: Snapshot,
    pub activation: ActivationReport,
}

/// Every readable snapshot plus the files that failed to parse.
#[derive(Debug, Clone, Default)]
pub struct SnapshotListing {
    /// Newest first.
    pub snapshots: Vec<Snapshot>,
    pub corrupt: Vec<(Utf8PathBuf, String)>,
}

/// Snapshot files live in one directory, one YAML file per snapshot named
/// after its id.
pub struct SnapshotStore {
    dir: Utf8PathBuf,
    items: Arc<ItemStore>,
    activation: Arc<ActivationEngine>,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl SnapshotStore {
    pub fn new(
        dir: impl Into<Utf8PathBuf>,
        items: Arc<ItemStore>,
        activation: Arc<ActivationEngine>,
        events: EventBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dir: dir.into(),
            items,
            activation,
            events,
            metrics,
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Record which items are enabled right now.
    ///
    /// Both collections must be listable; nothing is written otherwise.
    pub async fn capture(
        &self,
        paths: &CollectionPaths,
        provenance: Provenance,
    ) -> Result<Snapshot, SnapshotError> {
        // A snapshot must reflect the disk, not a cached scan.
        self.items.invalidate().await;
        let (vehicles, maps) = self
            .items
            .enabled_names(&paths.vehicles, &paths.maps)
            .await?;

        let snapshot = Snapshot::new(vehicles, maps, provenance, Utc::now());
        let yaml = serde_yaml_ng::to_string(&snapshot)?;
        let path = self.file_for(&snapshot.id);

        write_atomic(&path, yaml.as_bytes())
            .await
            .map_err(|source| SnapshotError::Io {
                action: "write",
                path: path.clone(),
                source,
            })?;

        self.metrics.record_snapshot();
        self.events.emit(EngineEvent::SnapshotCaptured {
            id: snapshot.id.clone(),
        });
        tracing::info!(
            "Captured snapshot {} ({} items enabled)",
            snapshot.id,
            snapshot.total_enabled()
        );

        Ok(snapshot)
    }

    /// Apply `snapshot`'s enabled sets to the collections.
    ///
    /// A safety snapshot of the current state is always written first. If the
    /// activation fails as a whole, the safety snapshot is re-applied on a
    /// best-effort basis and the original error is returned together with the
    /// rollback outcome. The safety snapshot is kept on disk either way.
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
        paths: &CollectionPaths,
    ) -> Result<RestoreReport, SnapshotError> {
        for collection in [&paths.vehicles, &paths.maps] {
            if !fs::metadata(collection)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                return Err(SnapshotError::CollectionMissing(collection.clone()));
            }
        }

        let safety = self
            .capture(paths, Provenance::safety_for(&snapshot.id))
            .await?;
        tracing::info!("Restoring snapshot {} (safety snapshot {})", snapshot.id, safety.id);

        let result = self
            .activation
            .activate(paths, &snapshot.enabled_vehicles, &snapshot.enabled_maps)
            .await;
        self.items.invalidate().await;

        match result {
            Ok(activation) => {
                self.events.emit(EngineEvent::SnapshotRestored {
                    id: snapshot.id.clone(),
                });
                tracing::info!("Restored snapshot {}: {}", snapshot.id, describe(&activation));
                Ok(RestoreReport { safety, activation })
            }
            Err(source) => {
                tracing::error!("Restoring snapshot {} failed: {}", snapshot.id, source);
                let rollback_error = self.roll_back(&safety, paths).await;
                Err(SnapshotError::RestoreFailed {
                    source,
                    safety_id: safety.id,
                    rollback_error,
                })
            }
        }
    }

    /// Re-apply the safety snapshot. Returns a description of what went wrong,
    /// if anything.
    async fn roll_back(&self, safety: &Snapshot, paths: &CollectionPaths) -> Option<String> {
        let outcome = self
            .activation
            .activate(paths, &safety.enabled_vehicles, &safety.enabled_maps)
            .await;
        self.items.invalidate().await;

        let error = match outcome {
            Ok(report) if report.is_clean() => {
                tracing::warn!("Rolled back to safety snapshot {}", safety.id);
                return None;
            }
            Ok(report) => {
                let names: Vec<String> = report
                    .vehicles
                    .failed
                    .iter()
                    .chain(&report.maps.failed)
                    .map(ToString::to_string)
                    .collect();
                format!("{} items could not be rolled back: {}", names.len(), names.join(", "))
            }
            Err(e) => e.to_string(),
        };

        tracing::error!(
            "Rollback to safety snapshot {} failed, manual intervention needed: {}",
            safety.id,
            error
        );
        self.events.emit(EngineEvent::RollbackFailed {
            safety_id: safety.id.clone(),
            error: error.clone(),
        });
        Some(error)
    }

    /// All snapshots, newest first. Files that fail to parse are reported in
    /// the listing instead of failing it.
    pub async fn list(&self) -> Result<SnapshotListing, SnapshotError> {
        let mut listing = SnapshotListing::default();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(listing),
            Err(source) => {
                return Err(SnapshotError::Io {
                    action: "list",
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(SnapshotError::Io {
                        action: "list",
                        path: self.dir.clone(),
                        source,
                    });
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let path = self.dir.join(&name);
            if path.extension() != Some(SNAPSHOT_EXTENSION) {
                continue;
            }

            match read_snapshot(&path).await {
                Ok(snapshot) => listing.snapshots.push(snapshot),
                Err(e) => {
                    tracing::warn!("Skipping unreadable snapshot {}: {}", path, e);
                    listing.corrupt.push((path, e.to_string()));
                }
            }
        }

        listing
            .snapshots
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(listing)
    }

    pub async fn get(&self, id: &str) -> Result<Snapshot, SnapshotError> {
        if !is_valid_id(id) {
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        read_snapshot(&self.file_for(id)).await.map_err(|e| match e {
            SnapshotError::Io { ref source, .. } if source.kind() == ErrorKind::NotFound => {
                SnapshotError::NotFound(id.to_string())
            }
            other => other,
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), SnapshotError> {
        if !is_valid_id(id) {
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        let path = self.file_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted snapshot {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SnapshotError::NotFound(id.to_string())),
            Err(source) => Err(SnapshotError::Io {
                action: "delete",
                path,
                source,
            }),
        }
    }

    /// Delete all but the `keep` most recent snapshots. One failed delete does
    /// not stop the rest. Returns how many were deleted.
    pub async fn cleanup(&self, keep: usize) -> usize {
        let listing = match self.list().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!("Snapshot cleanup skipped: {}", e);
                return 0;
            }
        };

        let mut deleted = 0;
        for stale in listing.snapshots.iter().skip(keep) {
            let path = self.file_for(&stale.id);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!("Pruned snapshot {}", stale.id);
                    deleted += 1;
                }
                Err(e) => tracing::warn!("Failed to prune snapshot {}: {}", path, e),
            }
        }

        if deleted > 0 {
            tracing::info!("Pruned {} old snapshots, kept {}", deleted, keep);
        }
        self.metrics.record_pruned(deleted);
        deleted
    }

    fn file_for(&self, id: &str) -> Utf8PathBuf {
        self.dir.join(format!("{id}.{SNAPSHOT_EXTENSION}"))
    }
}

async fn read_snapshot(path: &Utf8Path) -> Result<Snapshot, SnapshotError> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|source| SnapshotError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        })?;
    serde_yaml_ng::from_str(&contents).map_err(|e| SnapshotError::Corrupted {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Ids never contain path separators or dots.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn describe(report: &ActivationReport) -> String {
    format!(
        "{} enabled, {} already enabled, {} not found, {} failed",
        report.enabled_count(),
        report.already_enabled_count(),
        report.not_found_count(),
        report.failed_count()
    )
}
