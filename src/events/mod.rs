// Engine event module
//
// Warning and error signals raised while scanning, toggling and persisting are
// published on a tokio broadcast channel so a UI can surface them without
// polling. Every event is also logged where it is raised.

use crate::models::ItemKind;
use camino::Utf8PathBuf;
use tokio::sync::broadcast;

/// Signals emitted by the engine components.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A collection directory does not exist; the scan returned no items.
    CollectionMissing { kind: ItemKind, path: Utf8PathBuf },

    /// A collection directory could not be listed.
    CollectionUnreadable {
        kind: ItemKind,
        path: Utf8PathBuf,
        error: String,
    },

    /// Two directories in one collection map to the same item name.
    DuplicateItem { kind: ItemKind, name: String },

    /// `name.disabled` sits next to an enabled `name`.
    OrphanedDisabledCopy { kind: ItemKind, name: String },

    /// An item directory has no contents.
    EmptyItemDirectory { kind: ItemKind, name: String },

    /// A rename was retried because the directory was locked.
    RenameRetried {
        path: Utf8PathBuf,
        attempt: u32,
    },

    /// A single item could not be toggled.
    ItemToggleFailed {
        path: Utf8PathBuf,
        name: String,
        reason: String,
    },

    /// An activation pass over both collections finished.
    ActivationFinished {
        enabled: usize,
        already_enabled: usize,
        not_found: usize,
        failed: usize,
    },

    /// A snapshot was written to disk.
    SnapshotCaptured { id: String },

    /// A snapshot was applied successfully.
    SnapshotRestored { id: String },

    /// Rolling back to the safety snapshot after a failed restore also failed.
    RollbackFailed { safety_id: String, error: String },

    /// The configurations file was unreadable and a backup was promoted.
    ConfigurationsRecovered { backup: Utf8PathBuf },
}

/// Broadcast hub for [`EngineEvent`]s.
///
/// Cloning is cheap and every clone publishes to the same subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to 100 undelivered events per subscriber.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
