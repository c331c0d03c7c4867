//! Data models for AddonSwitch.
//!
//! - [`Item`]: one vehicle or map directory as seen by the last scan
//! - [`Configuration`]: a named, persisted selection of item names (a profile)
//! - [`Snapshot`]: a persisted record of which items were enabled at a point in time
//! - [`EngineSettings`]: paths, retry policy, cache TTL and retention counts
//!
//! Everything persisted derives `Serialize`/`Deserialize` and is written as YAML.

pub mod configuration;
pub mod item;
pub mod settings;
pub mod snapshot;

pub use configuration::{
    Configuration, ConfigurationDocument, ConfigurationDraft, ConfigurationIssue,
    MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
};
pub use item::{CollectionPaths, Item, ItemKind};
pub use settings::EngineSettings;
pub use snapshot::{Provenance, Snapshot};
