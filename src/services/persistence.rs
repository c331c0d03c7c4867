//! Crash-consistent file writes and rolling backups.
//!
//! Every canonical document is written to a temporary sibling first and then
//! renamed over the target, so a reader sees either the old bytes or the new
//! bytes and never a truncated file. Leftover temporaries from an interrupted
//! write are named `<file>.tmp.<random>` and are never read back.

use crate::models::configuration::random_suffix;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::io::{self, ErrorKind};
use std::sync::LazyLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const TEMP_MARKER: &str = ".tmp.";

/// Write `data` to `path` through a temporary sibling and a rename.
pub async fn write_atomic(path: &Utf8Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, format!("no file name in {path}")))?;
    let tmp_path = parent.join(format!("{file_name}{TEMP_MARKER}{}", random_suffix(8)));

    let written = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok::<_, io::Error>(())
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tracing::debug!("Atomically wrote {} bytes to {}", data.len(), path);
    Ok(())
}

/// Remove `<file>.tmp.*` siblings left behind by an interrupted write.
/// Returns how many were removed.
pub async fn sweep_stale_temp_files(path: &Utf8Path) -> usize {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return 0;
    };
    let prefix = format!("{file_name}{TEMP_MARKER}");

    let Ok(mut entries) = fs::read_dir(parent).await else {
        return 0;
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(&prefix) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                tracing::warn!("Removed stale temporary file {}", name);
                removed += 1;
            }
            Err(e) => tracing::warn!("Could not remove stale temporary file {}: {}", name, e),
        }
    }
    removed
}

static BACKUP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)\.(?P<stamp>\d{8}-\d{6}-\d{3})(?:-(?P<seq>\d+))?\.(?P<ext>[A-Za-z0-9]+)$")
        .expect("Invalid backup name regex")
});

/// Timestamped copies of a canonical file, capped at `keep` files.
///
/// Backups of `configurations.yaml` are named
/// `configurations.<YYYYMMDD-HHMMSS-mmm>.yaml`, with a `-N` sequence appended
/// when two backups land in the same millisecond.
#[derive(Debug, Clone)]
pub struct BackupRotation {
    dir: Utf8PathBuf,
    stem: String,
    extension: String,
    keep: usize,
}

impl BackupRotation {
    pub fn new(dir: impl Into<Utf8PathBuf>, canonical: &Utf8Path, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            stem: canonical.file_stem().unwrap_or("backup").to_string(),
            extension: canonical.extension().unwrap_or("yaml").to_string(),
            keep,
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Write `data` as a new backup and return its path.
    pub async fn write_backup(&self, data: &[u8], now: DateTime<Utc>) -> io::Result<Utf8PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let stamp = now.format("%Y%m%d-%H%M%S-%3f").to_string();
        let mut path = self.dir.join(format!("{}.{}.{}", self.stem, stamp, self.extension));
        let mut seq = 1;
        while fs::try_exists(&path).await.unwrap_or(false) {
            path = self
                .dir
                .join(format!("{}.{}-{}.{}", self.stem, stamp, seq, self.extension));
            seq += 1;
        }

        write_atomic(&path, data).await?;
        Ok(path)
    }

    /// Backups of this file, newest first.
    pub async fn list_newest_first(&self) -> io::Result<Vec<Utf8PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found: Vec<(String, u32, Utf8PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(caps) = BACKUP_NAME.captures(&name) else {
                continue;
            };
            if caps["stem"] != self.stem || caps["ext"] != self.extension {
                continue;
            }
            let seq = caps
                .name("seq")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            found.push((caps["stamp"].to_string(), seq, self.dir.join(&name)));
        }

        found.sort_by(|a, b| (&b.0, b.1).cmp(&(&a.0, a.1)));
        Ok(found.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Delete all but the newest `keep` backups. Failures are logged and
    /// skipped. Returns how many files were deleted.
    pub async fn prune(&self) -> usize {
        let backups = match self.list_newest_first().await {
            Ok(backups) => backups,
            Err(e) => {
                tracing::warn!("Could not list backups in {}: {}", self.dir, e);
                return 0;
            }
        };

        let mut deleted = 0;
        for stale in backups.iter().skip(self.keep) {
            match fs::remove_file(stale).await {
                Ok(()) => {
                    tracing::debug!("Pruned backup {}", stale);
                    deleted += 1;
                }
                Err(e) => tracing::warn!("Failed to prune backup {}: {}", stale, e),
            }
        }
        deleted
    }
}
