use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a configuration name, in characters.
pub const MAX_NAME_LEN: usize = 50;

/// Maximum length of a configuration description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Current on-disk schema version of the configurations document.
pub const CONFIGURATION_DOCUMENT_VERSION: u32 = 1;

/// A named selection of vehicles and maps (a profile).
///
/// `id` and `created_at` never change after creation. Selections are
/// insertion-ordered sets: membership is what matters for activation, the
/// order is kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub selected_vehicles: IndexSet<String>,
    #[serde(default)]
    pub selected_maps: IndexSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Caller-supplied fields for a new configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDraft {
    pub name: String,
    pub description: Option<String>,
    pub vehicles: IndexSet<String>,
    pub maps: IndexSet<String>,
}

impl ConfigurationDraft {
    pub fn new<V, M>(name: impl Into<String>, vehicles: V, maps: M) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            vehicles: vehicles.into_iter().map(Into::into).collect(),
            maps: maps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single rule a configuration breaks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationIssue {
    #[error("name is required")]
    EmptyName,

    #[error("name is {0} characters long (max 50)")]
    NameTooLong(usize),

    #[error("description is {0} characters long (max 200)")]
    DescriptionTooLong(usize),

    #[error("at least one vehicle or map must be selected")]
    EmptySelection,
}

impl Configuration {
    /// Build a brand-new configuration from a draft, stamping a fresh id and
    /// creation time.
    pub fn from_draft(draft: ConfigurationDraft, now: DateTime<Utc>) -> Self {
        let ConfigurationDraft {
            name,
            description,
            vehicles,
            maps,
        } = draft;

        Self {
            id: generate_configuration_id(now),
            name: name.trim().to_string(),
            description: normalize_description(description),
            selected_vehicles: vehicles,
            selected_maps: maps,
            created_at: now,
            last_used_at: None,
        }
    }

    /// Copy of this configuration under a new name, with a fresh id and
    /// creation time and no usage history.
    pub fn duplicate_as(&self, new_name: &str, now: DateTime<Utc>) -> Self {
        // Every field is listed; a new one must be handled here.
        let Configuration {
            id: _,
            name: _,
            description,
            selected_vehicles,
            selected_maps,
            created_at: _,
            last_used_at: _,
        } = self;

        Self {
            id: generate_configuration_id(now),
            name: new_name.trim().to_string(),
            description: description.clone(),
            selected_vehicles: selected_vehicles.clone(),
            selected_maps: selected_maps.clone(),
            created_at: now,
            last_used_at: None,
        }
    }

    /// Merge caller edits onto the stored entry. Identity (`id`, `created_at`)
    /// always comes from the stored entry.
    pub fn apply_update(&self, edited: Configuration) -> Self {
        let Configuration {
            id: _,
            name,
            description,
            selected_vehicles,
            selected_maps,
            created_at: _,
            last_used_at,
        } = edited;

        Self {
            id: self.id.clone(),
            name: name.trim().to_string(),
            description: normalize_description(description),
            selected_vehicles,
            selected_maps,
            created_at: self.created_at,
            last_used_at,
        }
    }

    /// Every rule this configuration breaks; empty when valid.
    pub fn validate(&self) -> Vec<ConfigurationIssue> {
        let mut issues = Vec::new();

        let name_len = self.name.trim().chars().count();
        if name_len == 0 {
            issues.push(ConfigurationIssue::EmptyName);
        } else if name_len > MAX_NAME_LEN {
            issues.push(ConfigurationIssue::NameTooLong(name_len));
        }

        if let Some(description) = &self.description {
            let len = description.chars().count();
            if len > MAX_DESCRIPTION_LEN {
                issues.push(ConfigurationIssue::DescriptionTooLong(len));
            }
        }

        if self.selected_vehicles.is_empty() && self.selected_maps.is_empty() {
            issues.push(ConfigurationIssue::EmptySelection);
        }

        issues
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Case-insensitive name comparison used for collision detection.
    pub fn has_name(&self, name: &str) -> bool {
        names_collide(&self.name, name)
    }
}

/// Whether two configuration names would collide.
pub fn names_collide(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Serialized form of the whole configuration collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDocument {
    pub version: u32,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

impl ConfigurationDocument {
    pub fn new(configurations: Vec<Configuration>) -> Self {
        Self {
            version: CONFIGURATION_DOCUMENT_VERSION,
            configurations,
        }
    }
}

/// Date-prefixed id with a random suffix, e.g. `20261017-143005-a8Kd02Lq`.
pub fn generate_configuration_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), random_suffix(8))
}

pub(crate) fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        Configuration::from_draft(
            ConfigurationDraft::new("Daily", ["BusA", "BusB"], ["Grundorf"])
                .with_description("weekday routes"),
            Utc::now(),
        )
    }

    #[test]
    fn test_from_draft_trims_and_stamps() {
        let config = Configuration::from_draft(
            ConfigurationDraft::new("  Daily  ", ["BusA"], Vec::<String>::new()),
            Utc::now(),
        );

        assert_eq!(config.name, "Daily");
        assert!(config.last_used_at.is_none());
        assert!(!config.id.is_empty());
        assert!(config.is_valid());
    }

    #[test]
    fn test_validate_reports_every_issue() {
        let mut config = sample();
        config.name = "x".repeat(MAX_NAME_LEN + 1);
        config.description = Some("d".repeat(MAX_DESCRIPTION_LEN + 1));
        config.selected_vehicles.clear();
        config.selected_maps.clear();

        let issues = config.validate();
        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&ConfigurationIssue::NameTooLong(MAX_NAME_LEN + 1)));
        assert!(issues.contains(&ConfigurationIssue::DescriptionTooLong(MAX_DESCRIPTION_LEN + 1)));
        assert!(issues.contains(&ConfigurationIssue::EmptySelection));
    }

    #[test]
    fn test_blank_name_is_invalid() {
        let mut config = sample();
        config.name = "   ".to_string();
        assert_eq!(config.validate(), vec![ConfigurationIssue::EmptyName]);
    }

    #[test]
    fn test_name_length_counts_characters_not_bytes() {
        let mut config = sample();
        config.name = "ü".repeat(MAX_NAME_LEN);
        assert!(config.is_valid());
    }

    #[test]
    fn test_duplicate_resets_identity_and_usage() {
        let mut original = sample();
        original.last_used_at = Some(Utc::now());

        let copy = original.duplicate_as("Daily (copy)", Utc::now());

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.name, "Daily (copy)");
        assert_eq!(copy.description, original.description);
        assert_eq!(copy.selected_vehicles, original.selected_vehicles);
        assert_eq!(copy.selected_maps, original.selected_maps);
        assert!(copy.last_used_at.is_none());
    }

    #[test]
    fn test_apply_update_keeps_identity() {
        let stored = sample();
        let mut edited = stored.clone();
        edited.id = "forged".to_string();
        edited.created_at = Utc::now() + chrono::Duration::days(1);
        edited.name = "Weekend".to_string();
        edited.description = Some("   ".to_string());

        let merged = stored.apply_update(edited);

        assert_eq!(merged.id, stored.id);
        assert_eq!(merged.created_at, stored.created_at);
        assert_eq!(merged.name, "Weekend");
        assert!(merged.description.is_none());
    }

    #[test]
    fn test_names_collide_ignores_case_and_padding() {
        assert!(names_collide("Daily", "daily"));
        assert!(names_collide("Daily ", " DAILY"));
        assert!(!names_collide("Daily", "Dailies"));
    }

    #[test]
    fn test_selection_order_survives_yaml() {
        let config = Configuration::from_draft(
            ConfigurationDraft::new("Order", ["Zeta", "Alpha", "Mid"], Vec::<String>::new()),
            Utc::now(),
        );

        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert!(yaml.contains("selectedVehicles"));
        let loaded: Configuration = serde_yaml_ng::from_str(&yaml).unwrap();

        let order: Vec<_> = loaded.selected_vehicles.iter().cloned().collect();
        assert_eq!(order, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_generated_id_is_date_prefixed() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 17, 14, 30, 5).unwrap();
        let id = generate_configuration_id(now);
        assert!(id.starts_with("20261017-143005-"));
        assert_eq!(id.len(), "20261017-143005-".len() + 8);
    }
}
