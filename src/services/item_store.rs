use crate::events::{EngineEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::{Item, ItemKind};
use crate::services::disabled_suffix::is_disabled;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

/// Default lifetime of a cached scan.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Non-fatal findings from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    /// The collection directory does not exist.
    CollectionMissing,
    /// The collection directory could not be listed.
    CollectionUnreadable(String),
    /// More than one directory maps to this item name.
    Duplicate(String),
    /// Both `name` and `name.disabled` exist; the disabled one is the orphan.
    Orphan(String),
    /// The item directory is empty.
    EmptyDirectory(String),
    /// A directory name that is not valid UTF-8 was skipped.
    NonUtf8Name(String),
}

/// Items found in one collection plus everything worth warning about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub items: Vec<Item>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanOutcome {
    pub fn enabled_names(&self) -> IndexSet<String> {
        self.items
            .iter()
            .filter(|item| item.enabled)
            .map(|item| item.name.clone())
            .collect()
    }

    /// Fails when the collection itself could not be listed.
    pub fn check_available(&self, collection: &Utf8Path) -> Result<(), CollectionUnavailable> {
        for warning in &self.warnings {
            match warning {
                ScanWarning::CollectionMissing => {
                    return Err(CollectionUnavailable::Missing(collection.to_path_buf()));
                }
                ScanWarning::CollectionUnreadable(error) => {
                    return Err(CollectionUnavailable::Unreadable {
                        path: collection.to_path_buf(),
                        error: error.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn duplicates(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                ScanWarning::Duplicate(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A collection that scanned as empty because it could not be listed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionUnavailable {
    #[error("Collection directory not found: {0}")]
    Missing(Utf8PathBuf),

    #[error("Collection directory {path} could not be read: {error}")]
    Unreadable { path: Utf8PathBuf, error: String },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: Utf8PathBuf,
    scanned_at: Instant,
    outcome: ScanOutcome,
}

impl CacheEntry {
    fn is_valid_for(&self, path: &Utf8Path, ttl: Duration) -> bool {
        self.path == path && self.scanned_at.elapsed() < ttl
    }
}

/// Caching enumerator for the vehicle and map collections.
///
/// Holds one cache entry per collection kind. The cache lock only guards the
/// lookup and the replacement, never the directory walk itself, so a slow
/// vehicles scan does not hold up a maps lookup. A scan that overlaps an
/// [`invalidate`](Self::invalidate) is returned but not cached.
pub struct ItemStore {
    cache: Mutex<HashMap<ItemKind, CacheEntry>>,
    generation: AtomicU64,
    ttl: Duration,
    events: EventBus,
    metrics: Arc<Metrics>,
}

impl ItemStore {
    pub fn new(ttl: Duration, events: EventBus, metrics: Arc<Metrics>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
            events,
            metrics,
        }
    }

    /// Store with its own event bus and metrics; handy for callers that only
    /// need scanning.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ttl, EventBus::new(), Arc::new(Metrics::new()))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Items of one collection, sorted by name (case-insensitive).
    pub async fn scan(&self, collection: &Utf8Path, kind: ItemKind) -> Vec<Item> {
        self.scan_detailed(collection, kind).await.items
    }

    /// Like [`scan`](Self::scan) but also returns the warnings raised while
    /// building the result.
    pub async fn scan_detailed(&self, collection: &Utf8Path, kind: ItemKind) -> ScanOutcome {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&kind) {
                if entry.is_valid_for(collection, self.ttl) {
                    self.metrics.record_cache_hit();
                    tracing::debug!("Scan cache hit for {} collection {}", kind, collection);
                    return entry.outcome.clone();
                }
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let started = Instant::now();
        let (outcome, cacheable) = self.read_collection(collection, kind).await;
        self.metrics.record_scan();

        if cacheable {
            let entry = CacheEntry {
                path: collection.to_path_buf(),
                scanned_at: started,
                outcome: outcome.clone(),
            };
            self.store_if_current(kind, entry, generation).await;
        }

        outcome
    }

    /// Cache `entry` unless the cache was invalidated after `generation` was
    /// read. Returns whether the entry was stored.
    async fn store_if_current(&self, kind: ItemKind, entry: CacheEntry, generation: u64) -> bool {
        let mut cache = self.cache.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!("Discarding {} scan that overlapped an invalidation", kind);
            return false;
        }
        cache.insert(kind, entry);
        true
    }

    /// Scan both collections concurrently.
    pub async fn scan_all(&self, vehicles: &Utf8Path, maps: &Utf8Path) -> (Vec<Item>, Vec<Item>) {
        tokio::join!(
            self.scan(vehicles, ItemKind::Vehicle),
            self.scan(maps, ItemKind::Map)
        )
    }

    /// Names of the enabled vehicles and maps.
    ///
    /// Unlike [`scan`](Self::scan), a collection that cannot be listed is an
    /// error here, so an empty set always means nothing is enabled.
    pub async fn enabled_names(
        &self,
        vehicles: &Utf8Path,
        maps: &Utf8Path,
    ) -> Result<(IndexSet<String>, IndexSet<String>), CollectionUnavailable> {
        let (vehicle_scan, map_scan) = tokio::join!(
            self.scan_detailed(vehicles, ItemKind::Vehicle),
            self.scan_detailed(maps, ItemKind::Map)
        );
        vehicle_scan.check_available(vehicles)?;
        map_scan.check_available(maps)?;
        Ok((vehicle_scan.enabled_names(), map_scan.enabled_names()))
    }

    /// Drop every cache entry; the next scan of each collection hits the disk.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
        tracing::debug!("Scan cache invalidated");
    }

    /// Walk the collection. The flag tells whether the result may be cached;
    /// missing or unreadable collections are always re-checked. A listing that
    /// fails partway yields no items, never a partial list.
    async fn read_collection(&self, collection: &Utf8Path, kind: ItemKind) -> (ScanOutcome, bool) {
        let mut outcome = ScanOutcome::default();

        let mut entries = match fs::read_dir(collection).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("{} collection not found at {}", kind, collection);
                self.events.emit(EngineEvent::CollectionMissing {
                    kind,
                    path: collection.to_path_buf(),
                });
                outcome.warnings.push(ScanWarning::CollectionMissing);
                return (outcome, false);
            }
            Err(e) => return (self.unreadable(collection, kind, &e), false),
        };

        // Lower-cased name -> (enabled forms, disabled forms) seen so far.
        let mut seen: HashMap<String, (usize, usize)> = HashMap::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return (self.unreadable(collection, kind, &e), false),
            };

            let entry_path = entry.path();
            if !is_directory(&entry).await {
                continue;
            }

            let dir_name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    let lossy = raw.to_string_lossy().into_owned();
                    tracing::warn!("Skipping non UTF-8 directory name in {}: {}", collection, lossy);
                    outcome.warnings.push(ScanWarning::NonUtf8Name(lossy));
                    continue;
                }
            };

            let (disabled, base) = is_disabled(&dir_name);
            let name = base.to_string();

            let last_modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => Some(DateTime::<Utc>::from(modified)),
                Err(e) => {
                    tracing::debug!("No modification time for {:?}: {}", entry_path, e);
                    None
                }
            };

            if is_empty_dir(&entry_path).await {
                tracing::warn!("{} '{}' is an empty directory", kind, name);
                self.events.emit(EngineEvent::EmptyItemDirectory {
                    kind,
                    name: name.clone(),
                });
                outcome.warnings.push(ScanWarning::EmptyDirectory(name.clone()));
            }

            let counts = seen.entry(name.to_lowercase()).or_insert((0, 0));
            if disabled {
                counts.1 += 1;
            } else {
                counts.0 += 1;
            }

            outcome.items.push(Item {
                path: collection.join(&name),
                name,
                kind,
                enabled: !disabled,
                last_modified,
            });
        }

        outcome
            .items
            .sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| b.enabled.cmp(&a.enabled))
                    .then_with(|| a.name.cmp(&b.name))
            });

        self.report_duplicates(kind, &seen, &mut outcome);

        tracing::info!(
            "Scanned {} collection {}: {} items ({} enabled)",
            kind,
            collection,
            outcome.items.len(),
            outcome.items.iter().filter(|i| i.enabled).count()
        );

        (outcome, true)
    }

    fn unreadable(
        &self,
        collection: &Utf8Path,
        kind: ItemKind,
        error: &std::io::Error,
    ) -> ScanOutcome {
        tracing::error!("Failed to list {} collection {}: {}", kind, collection, error);
        self.events.emit(EngineEvent::CollectionUnreadable {
            kind,
            path: collection.to_path_buf(),
            error: error.to_string(),
        });
        ScanOutcome {
            items: Vec::new(),
            warnings: vec![ScanWarning::CollectionUnreadable(error.to_string())],
        }
    }

    fn report_duplicates(
        &self,
        kind: ItemKind,
        seen: &HashMap<String, (usize, usize)>,
        outcome: &mut ScanOutcome,
    ) {
        // Walk the sorted items so warnings come out in display order.
        let mut reported: IndexSet<String> = IndexSet::new();
        for item in &outcome.items {
            let key = item.name.to_lowercase();
            let Some(&(enabled, disabled)) = seen.get(&key) else {
                continue;
            };
            if enabled + disabled < 2 || !reported.insert(key) {
                continue;
            }

            tracing::warn!(
                "Duplicate {} '{}': {} enabled and {} disabled directories",
                kind,
                item.name,
                enabled,
                disabled
            );
            self.events.emit(EngineEvent::DuplicateItem {
                kind,
                name: item.name.clone(),
            });
            outcome.warnings.push(ScanWarning::Duplicate(item.name.clone()));

            if enabled > 0 && disabled > 0 {
                self.events.emit(EngineEvent::OrphanedDisabledCopy {
                    kind,
                    name: item.name.clone(),
                });
                outcome.warnings.push(ScanWarning::Orphan(item.name.clone()));
            }
        }
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }
}

/// Directories and symlinks to directories count as items.
async fn is_directory(entry: &fs::DirEntry) -> bool {
    match entry.file_type().await {
        Ok(ft) if ft.is_dir() => true,
        Ok(ft) if ft.is_symlink() => fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false),
        _ => false,
    }
}

/// Unreadable directories are not reported as empty.
async fn is_empty_dir(path: &std::path::Path) -> bool {
    match fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}
