// AddonSwitch - Profile-based enabling and disabling of vehicle and map addons
//
// This is the library crate containing the addon state engine: directory
// scanning, rename-based activation, snapshots, and the configuration store.

pub mod config;
pub mod engine;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::SettingsManager;
pub use engine::{AddonEngine, ConfigurationActivation, MissingReferences};
pub use events::{EngineEvent, EventBus};
pub use metrics::Metrics;
pub use models::{
    CollectionPaths, Configuration, ConfigurationDraft, EngineSettings, Item, ItemKind,
    Provenance, Snapshot,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
