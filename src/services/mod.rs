//! Services module - the addon state engine.
//!
//! Everything that touches the collection directories or the persisted state
//! lives here. The services have no UI dependencies and take every input as an
//! explicit parameter, so they can be driven from tests or any front end.
//!
//! # Components
//!
//! - [`ItemStore`]: lists the items of a collection and whether each is
//!   enabled, behind a short-lived cache. Missing or unreadable directories
//!   produce warnings, not errors.
//! - [`ActivationEngine`]: makes a collection's enabled set match a wanted set
//!   by renaming directories to and from their `.disabled` form. Locked
//!   directories are retried according to a [`RetryPolicy`].
//! - [`SnapshotStore`]: records and re-applies which items were enabled, with
//!   a safety snapshot and rollback around every restore.
//! - [`ConfigurationStore`]: the durable list of named configurations, with
//!   atomic writes, rolling backups and recovery from a corrupted file.
//!
//! # On-disk convention
//!
//! An item is a directory. `Name` is enabled, `Name.disabled` is disabled.
//! All suffix handling goes through [`disabled_suffix`].
//!
//! # Usage Example
//!
//! ```ignore
//! use addonswitch::services::ActivationEngine;
//!
//! let engine = ActivationEngine::with_defaults();
//! let report = engine.activate(&paths, &wanted_vehicles, &wanted_maps).await?;
//! for failure in &report.vehicles.failed {
//!     println!("{failure}");
//! }
//! ```

pub mod activation;
pub mod configuration_store;
pub mod disabled_suffix;
pub mod item_store;
pub mod persistence;
pub mod snapshot_store;

pub use activation::{
    ActivationEngine, ActivationError, ActivationReport, FailureReason, IoFailureClass,
    ItemFailure, Renamer, RestoreAllReport, RetryPolicy, TogglePass, ToggleReport, TokioRenamer,
    classify_io_failure,
};
pub use configuration_store::{ConfigurationStore, InvalidConfiguration, StoreError};
pub use disabled_suffix::{DISABLED_SUFFIX, is_disabled, mark_disabled};
pub use item_store::{CollectionUnavailable, ItemStore, ScanOutcome, ScanWarning};
pub use persistence::{BackupRotation, write_atomic};
pub use snapshot_store::{RestoreReport, SnapshotError, SnapshotListing, SnapshotStore};
