use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which collection an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Vehicle,
    Map,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Vehicle => write!(f, "vehicle"),
            ItemKind::Map => write!(f, "map"),
        }
    }
}

/// One toggle-able directory inside a collection.
///
/// Items are rebuilt on every scan and handed out by value; nothing holds on
/// to them across scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Directory base name with the disabled suffix stripped.
    pub name: String,
    pub kind: ItemKind,
    pub enabled: bool,
    /// Location of the enabled form (`<collection>/<name>`), which may not
    /// exist on disk while the item is disabled.
    pub path: Utf8PathBuf,
    /// Best-effort modification time; `None` when metadata was unreadable.
    pub last_modified: Option<DateTime<Utc>>,
}

/// The two collection directories supplied by the caller's path provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPaths {
    pub vehicles: Utf8PathBuf,
    pub maps: Utf8PathBuf,
}

impl CollectionPaths {
    pub fn new(vehicles: impl Into<Utf8PathBuf>, maps: impl Into<Utf8PathBuf>) -> Self {
        Self {
            vehicles: vehicles.into(),
            maps: maps.into(),
        }
    }

    /// Path of the collection holding items of `kind`.
    pub fn for_kind(&self, kind: ItemKind) -> &Utf8PathBuf {
        match kind {
            ItemKind::Vehicle => &self.vehicles,
            ItemKind::Map => &self.maps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths_for_kind() {
        let paths = CollectionPaths::new("/v", "/m");
        assert_eq!(paths.for_kind(ItemKind::Vehicle).as_str(), "/v");
        assert_eq!(paths.for_kind(ItemKind::Map).as_str(), "/m");
    }
}
