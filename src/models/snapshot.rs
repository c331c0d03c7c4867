use super::configuration::random_suffix;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Point-in-time record of exactly which items were enabled.
///
/// Immutable once written. `associated_configuration_*` record why the
/// snapshot was taken and carry no behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub enabled_vehicles: IndexSet<String>,
    #[serde(default)]
    pub enabled_maps: IndexSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_configuration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_configuration_name: Option<String>,
}

/// Optional metadata describing what a snapshot was taken for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub configuration_id: Option<String>,
    pub configuration_name: Option<String>,
}

impl Provenance {
    pub fn for_configuration(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            configuration_id: Some(id.into()),
            configuration_name: Some(name.into()),
        }
    }

    /// Provenance of the safety snapshot taken before restoring `snapshot_id`.
    pub fn safety_for(snapshot_id: &str) -> Self {
        Self {
            configuration_id: None,
            configuration_name: Some(format!("Before restoring {snapshot_id}")),
        }
    }
}

impl Snapshot {
    pub fn new(
        enabled_vehicles: IndexSet<String>,
        enabled_maps: IndexSet<String>,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_snapshot_id(now),
            created_at: now,
            enabled_vehicles,
            enabled_maps,
            associated_configuration_id: provenance.configuration_id,
            associated_configuration_name: provenance.configuration_name,
        }
    }

    pub fn total_enabled(&self) -> usize {
        self.enabled_vehicles.len() + self.enabled_maps.len()
    }
}

/// Timestamp-derived id with millisecond precision and a random tail, e.g.
/// `20261017-143005-127-x8Qa1Z`.
pub fn generate_snapshot_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%d-%H%M%S-%3f"), random_suffix(6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_ids_do_not_collide_within_same_instant() {
        let now = Utc::now();
        let a = generate_snapshot_id(now);
        let b = generate_snapshot_id(now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_provenance_is_carried_into_snapshot() {
        let snapshot = Snapshot::new(
            IndexSet::from(["BusA".to_string()]),
            IndexSet::new(),
            Provenance::for_configuration("cfg-1", "Daily"),
            Utc::now(),
        );

        assert_eq!(snapshot.associated_configuration_id.as_deref(), Some("cfg-1"));
        assert_eq!(snapshot.associated_configuration_name.as_deref(), Some("Daily"));
        assert_eq!(snapshot.total_enabled(), 1);
    }

    #[test]
    fn test_snapshot_yaml_is_human_readable() {
        let snapshot = Snapshot::new(
            IndexSet::from(["BusA".to_string()]),
            IndexSet::from(["Grundorf".to_string()]),
            Provenance::default(),
            Utc::now(),
        );

        let yaml = serde_yaml_ng::to_string(&snapshot).unwrap();
        assert!(yaml.contains("enabledVehicles"));
        assert!(yaml.contains("- BusA"));
        assert!(!yaml.contains("associatedConfigurationId"));
    }
}
