use crate::events::{EngineEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::CollectionPaths;
use crate::services::disabled_suffix::{is_disabled, mark_disabled};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::fmt;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;

/// Filesystem seam for the one mutating primitive the engine needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renamer: Send + Sync {
    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> io::Result<()>;
}

/// [`Renamer`] backed by `tokio::fs::rename`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRenamer;

#[async_trait]
impl Renamer for TokioRenamer {
    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
        fs::rename(from, to).await
    }
}

/// How a failed filesystem call should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailureClass {
    /// Someone else holds the directory open; worth another try.
    Transient,
    /// Access denied; retrying will not help.
    Permission,
    Other,
}

/// Classify an I/O error for the retry policy.
pub fn classify_io_failure(error: &io::Error) -> IoFailureClass {
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        if matches!(error.raw_os_error(), Some(32) | Some(33)) {
            return IoFailureClass::Transient;
        }
    }

    match error.kind() {
        ErrorKind::ResourceBusy | ErrorKind::ExecutableFileBusy | ErrorKind::WouldBlock => {
            IoFailureClass::Transient
        }
        ErrorKind::PermissionDenied => IoFailureClass::Permission,
        _ => IoFailureClass::Other,
    }
}

/// Attempts and spacing for renames that hit a locked directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Which half of a toggle pass an item failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TogglePass {
    Disable,
    Enable,
    Restore,
}

/// Why a single item could not be toggled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The rename target already exists.
    Conflict { existing: Utf8PathBuf },
    /// Still locked after every attempt.
    Locked { attempts: u32 },
    PermissionDenied,
    /// The name would resolve outside the collection directory.
    InvalidName,
    Io(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Conflict { existing } => write!(f, "{existing} already exists"),
            FailureReason::Locked { attempts } => {
                write!(f, "in use by another process after {attempts} attempts")
            }
            FailureReason::PermissionDenied => write!(f, "permission denied"),
            FailureReason::InvalidName => write!(f, "not a plain directory name"),
            FailureReason::Io(message) => write!(f, "{message}"),
        }
    }
}

/// One item that a bulk pass could not toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub name: String,
    pub pass: TogglePass,
    pub reason: FailureReason,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Outcome of [`ActivationEngine::set_enabled`] on one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleReport {
    /// Items renamed to their disabled form.
    pub disabled: Vec<String>,
    /// Wanted items renamed back to their enabled form.
    pub enabled: Vec<String>,
    /// Wanted items that were already enabled.
    pub already_enabled: Vec<String>,
    /// Wanted items with no directory in either form.
    pub not_found: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl ToggleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} enabled, {} already enabled, {} not found, {} failed",
            self.enabled.len(),
            self.already_enabled.len(),
            self.not_found.len(),
            self.failed.len()
        )
    }
}

/// Outcome of [`ActivationEngine::activate`] across both collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub vehicles: ToggleReport,
    pub maps: ToggleReport,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.vehicles.is_clean() && self.maps.is_clean()
    }

    pub fn enabled_count(&self) -> usize {
        self.vehicles.enabled.len() + self.maps.enabled.len()
    }

    pub fn already_enabled_count(&self) -> usize {
        self.vehicles.already_enabled.len() + self.maps.already_enabled.len()
    }

    pub fn not_found_count(&self) -> usize {
        self.vehicles.not_found.len() + self.maps.not_found.len()
    }

    pub fn failed_count(&self) -> usize {
        self.vehicles.failed.len() + self.maps.failed.len()
    }
}

/// Outcome of [`ActivationEngine::restore_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreAllReport {
    pub restored: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

/// Whole-collection failures; per-item problems end up in the reports instead.
#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("Collection directory not found: {0}")]
    CollectionMissing(Utf8PathBuf),

    #[error("Cannot read collection directory {path}: {source}")]
    CollectionUnreadable {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A rename that could not be completed.
#[derive(Debug)]
struct RenameFailure {
    class: IoFailureClass,
    attempts: u32,
    error: io::Error,
}

impl RenameFailure {
    fn into_reason(self) -> FailureReason {
        match self.class {
            IoFailureClass::Transient => FailureReason::Locked {
                attempts: self.attempts,
            },
            IoFailureClass::Permission => FailureReason::PermissionDenied,
            IoFailureClass::Other => FailureReason::Io(self.error.to_string()),
        }
    }
}

/// Applies enabled/disabled state to collection directories by renaming.
///
/// Nothing here is transactional: an interrupted pass leaves whatever renames
/// already happened in place. Snapshots are the recovery path.
pub struct ActivationEngine {
    renamer: Arc<dyn Renamer>,
    retry: RetryPolicy,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl ActivationEngine {
    pub fn new(
        renamer: Arc<dyn Renamer>,
        retry: RetryPolicy,
        events: EventBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            renamer,
            retry,
            events,
            metrics,
        }
    }

    /// Engine on the real filesystem with the default retry policy.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(TokioRenamer),
            RetryPolicy::default(),
            EventBus::new(),
            Arc::new(Metrics::new()),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Make the collection's enabled set equal `wanted`.
    ///
    /// Every enabled directory outside `wanted` is disabled first; only then
    /// are the wanted ones enabled. Wanted directories that are already
    /// enabled are left alone rather than bounced through their disabled
    /// form.
    pub async fn set_enabled(
        &self,
        collection: &Utf8Path,
        wanted: &IndexSet<String>,
    ) -> Result<ToggleReport, ActivationError> {
        let entries = list_subdirectories(collection).await?;
        let mut report = ToggleReport::default();

        // Disable pass.
        for dir_name in &entries {
            let (disabled, _) = is_disabled(dir_name);
            if disabled || wanted.contains(dir_name) {
                continue;
            }

            let from = collection.join(dir_name);
            let to = collection.join(mark_disabled(dir_name));
            if path_exists(&to).await {
                self.record_failure(
                    &mut report.failed,
                    collection,
                    dir_name,
                    TogglePass::Disable,
                    FailureReason::Conflict { existing: to },
                );
                continue;
            }

            match self.rename_with_retry(&from, &to).await {
                Ok(()) => {
                    tracing::debug!("Disabled {}", from);
                    report.disabled.push(dir_name.clone());
                }
                Err(failure) => self.record_failure(
                    &mut report.failed,
                    collection,
                    dir_name,
                    TogglePass::Disable,
                    failure.into_reason(),
                ),
            }
        }

        // Enable pass.
        for name in wanted {
            if !is_plain_name(name) {
                self.record_failure(
                    &mut report.failed,
                    collection,
                    name,
                    TogglePass::Enable,
                    FailureReason::InvalidName,
                );
                continue;
            }

            let enabled_path = collection.join(name);
            let disabled_path = collection.join(mark_disabled(name));

            if !path_exists(&disabled_path).await {
                if is_dir(&enabled_path).await {
                    report.already_enabled.push(name.clone());
                } else {
                    tracing::warn!("Wanted item '{}' not found in {}", name, collection);
                    report.not_found.push(name.clone());
                }
                continue;
            }

            if path_exists(&enabled_path).await {
                self.record_failure(
                    &mut report.failed,
                    collection,
                    name,
                    TogglePass::Enable,
                    FailureReason::Conflict {
                        existing: enabled_path,
                    },
                );
                continue;
            }

            match self.rename_with_retry(&disabled_path, &enabled_path).await {
                Ok(()) => {
                    tracing::debug!("Enabled {}", enabled_path);
                    report.enabled.push(name.clone());
                }
                Err(failure) => self.record_failure(
                    &mut report.failed,
                    collection,
                    name,
                    TogglePass::Enable,
                    failure.into_reason(),
                ),
            }
        }

        tracing::info!(
            "Applied selection to {}: {} disabled, {}",
            collection,
            report.disabled.len(),
            report.summary()
        );

        Ok(report)
    }

    /// Disable everything, then enable the wanted subset, independently in
    /// each collection. Both directories must exist before anything is
    /// renamed.
    pub async fn activate(
        &self,
        paths: &CollectionPaths,
        wanted_vehicles: &IndexSet<String>,
        wanted_maps: &IndexSet<String>,
    ) -> Result<ActivationReport, ActivationError> {
        for collection in [&paths.vehicles, &paths.maps] {
            if !is_dir(collection).await {
                return Err(ActivationError::CollectionMissing(collection.clone()));
            }
        }

        let started = Instant::now();
        tracing::info!(
            "Activating {} vehicles and {} maps",
            wanted_vehicles.len(),
            wanted_maps.len()
        );

        // Vehicles first, then maps; a failure in one leaves the other as is.
        let vehicles = self.set_enabled(&paths.vehicles, wanted_vehicles).await?;
        let maps = self.set_enabled(&paths.maps, wanted_maps).await?;
        let report = ActivationReport { vehicles, maps };

        self.metrics.record_activation(started.elapsed());
        self.events.emit(EngineEvent::ActivationFinished {
            enabled: report.enabled_count(),
            already_enabled: report.already_enabled_count(),
            not_found: report.not_found_count(),
            failed: report.failed_count(),
        });

        if report.is_clean() {
            tracing::info!("Activation finished in {:.2}s", started.elapsed().as_secs_f32());
        } else {
            tracing::warn!(
                "Activation finished with {} failures in {:.2}s",
                report.failed_count(),
                started.elapsed().as_secs_f32()
            );
        }

        Ok(report)
    }

    /// Rename every disabled directory in the collection back to its enabled
    /// name.
    pub async fn restore_all(
        &self,
        collection: &Utf8Path,
    ) -> Result<RestoreAllReport, ActivationError> {
        let entries = list_subdirectories(collection).await?;
        let mut report = RestoreAllReport::default();

        for dir_name in &entries {
            let (disabled, base) = is_disabled(dir_name);
            if !disabled {
                continue;
            }

            let from = collection.join(dir_name);
            let to = collection.join(base);
            if path_exists(&to).await {
                self.record_failure(
                    &mut report.failed,
                    collection,
                    base,
                    TogglePass::Restore,
                    FailureReason::Conflict { existing: to },
                );
                continue;
            }

            match self.rename_with_retry(&from, &to).await {
                Ok(()) => report.restored.push(base.to_string()),
                Err(failure) => self.record_failure(
                    &mut report.failed,
                    collection,
                    base,
                    TogglePass::Restore,
                    failure.into_reason(),
                ),
            }
        }

        tracing::info!(
            "Restored {} items in {} ({} failed)",
            report.restored.len(),
            collection,
            report.failed.len()
        );

        Ok(report)
    }

    /// Rename, retrying only while the failure classifies as transient.
    async fn rename_with_retry(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), RenameFailure> {
        let mut attempt = 1;
        loop {
            let error = match self.renamer.rename(from, to).await {
                Ok(()) => {
                    self.metrics.record_rename();
                    return Ok(());
                }
                Err(error) => error,
            };

            let class = classify_io_failure(&error);
            if class != IoFailureClass::Transient || attempt >= self.retry.max_attempts {
                self.metrics.record_rename_failed();
                return Err(RenameFailure {
                    class,
                    attempts: attempt,
                    error,
                });
            }

            tracing::warn!(
                "{} is locked (attempt {}/{}), retrying in {:?}",
                from,
                attempt,
                self.retry.max_attempts,
                self.retry.delay
            );
            self.metrics.record_rename_retry();
            self.events.emit(EngineEvent::RenameRetried {
                path: from.to_path_buf(),
                attempt,
            });

            tokio::time::sleep(self.retry.delay).await;
            attempt += 1;
        }
    }

    fn record_failure(
        &self,
        failures: &mut Vec<ItemFailure>,
        collection: &Utf8Path,
        name: &str,
        pass: TogglePass,
        reason: FailureReason,
    ) {
        tracing::error!("Could not toggle '{}' in {}: {}", name, collection, reason);
        self.events.emit(EngineEvent::ItemToggleFailed {
            path: collection.join(name),
            name: name.to_string(),
            reason: reason.to_string(),
        });
        failures.push(ItemFailure {
            name: name.to_string(),
            pass,
            reason,
        });
    }
}

/// A single path component naming an entry directly inside the collection.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

/// Names of the immediate subdirectories of `collection`.
async fn list_subdirectories(collection: &Utf8Path) -> Result<Vec<String>, ActivationError> {
    let mut entries = match fs::read_dir(collection).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ActivationError::CollectionMissing(collection.to_path_buf()));
        }
        Err(source) => {
            return Err(ActivationError::CollectionUnreadable {
                path: collection.to_path_buf(),
                source,
            });
        }
    };

    let mut names = Vec::new();
    while let Some(entry) =
        entries
            .next_entry()
            .await
            .map_err(|source| ActivationError::CollectionUnreadable {
                path: collection.to_path_buf(),
                source,
            })?
    {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!("Skipping non UTF-8 entry {:?} in {}", raw, collection);
                continue;
            }
        };
        if is_dir(&collection.join(&name)).await {
            names.push(name);
        }
    }

    Ok(names)
}

async fn path_exists(path: &Utf8Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

async fn is_dir(path: &Utf8Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
