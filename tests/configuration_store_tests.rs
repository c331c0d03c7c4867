//! Integration tests for ConfigurationStore
//!
//! These tests verify:
//! - Save/load round trips, including for generated configuration sets
//! - Case-insensitive name uniqueness across create/update/duplicate
//! - Whole-write rejection of invalid configurations
//! - Crash leftovers and backup-based recovery
//! - Backup rotation
//! - Serialized access from concurrent callers

use addonswitch::events::EngineEvent;
use addonswitch::models::{Configuration, ConfigurationDraft, ConfigurationIssue};
use addonswitch::services::{ConfigurationStore, StoreError};
use addonswitch::{EventBus, Metrics};
use camino::Utf8PathBuf;
use chrono::Utc;
use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_store(backup_count: usize) -> (ConfigurationStore, EventBus, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let events = EventBus::new();
    let store = ConfigurationStore::new(
        root.join("configurations.yaml"),
        root.join("backups"),
        backup_count,
        events.clone(),
        Arc::new(Metrics::new()),
    );
    (store, events, temp_dir)
}

fn draft(name: &str, vehicles: &[&str], maps: &[&str]) -> ConfigurationDraft {
    ConfigurationDraft::new(name, vehicles.iter().copied(), maps.iter().copied())
}

#[tokio::test]
async fn test_save_and_reload_round_trip() {
    let (store, _events, _temp_dir) = create_test_store(10);
    store
        .create(draft("Daily", &["BusA", "BusB"], &["Harbor"]).with_description("Weekday routes"))
        .await
        .unwrap();
    store.create(draft("Night", &[], &["Canyon"])).await.unwrap();

    let before = store.load_all().await.unwrap();
    store.save_all(&before).await.unwrap();
    let after = store.load_all().await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after.len(), 2);
    assert_eq!(after[0].description.as_deref(), Some("Weekday routes"));
    assert_eq!(
        after[0].selected_vehicles.iter().collect::<Vec<_>>(),
        vec!["BusA", "BusB"]
    );
}

#[tokio::test]
async fn test_creating_same_name_twice_is_rejected() {
    let (store, _events, _temp_dir) = create_test_store(10);
    store.create(draft("Daily", &["BusA"], &[])).await.unwrap();

    let second = store.create(draft("Daily", &["BusC"], &["Harbor"])).await;

    assert!(matches!(second, Err(StoreError::NameTaken(ref name)) if name == "Daily"));
    let all = store.load_all().await.unwrap();
    assert_eq!(all.iter().filter(|c| c.name == "Daily").count(), 1);
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_name_collision_ignores_case_and_whitespace() {
    let (store, _events, _temp_dir) = create_test_store(10);
    store.create(draft("Daily", &["BusA"], &[])).await.unwrap();

    let result = store.create(draft("  dAILY ", &["BusA"], &[])).await;
    assert!(matches!(result, Err(StoreError::NameTaken(_))));
}

#[tokio::test]
async fn test_invalid_configuration_is_not_saved() {
    let (store, _events, _temp_dir) = create_test_store(10);

    let result = store.create(draft("", &[], &[])).await;

    match result {
        Err(StoreError::Invalid(invalid)) => {
            assert_eq!(invalid.len(), 1);
            assert!(invalid[0].issues.contains(&ConfigurationIssue::EmptyName));
            assert!(invalid[0].issues.contains(&ConfigurationIssue::EmptySelection));
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
    assert!(store.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_all_rejects_whole_set_when_one_entry_is_invalid() {
    let (store, _events, _temp_dir) = create_test_store(10);
    let good = store.create(draft("Daily", &["BusA"], &[])).await.unwrap();

    let mut bad = good.clone();
    bad.id = "other".to_string();
    bad.name = "x".repeat(51);
    let mut renamed = good.clone();
    renamed.name = "Renamed".to_string();

    let result = store.save_all(&[renamed, bad]).await;

    assert!(matches!(result, Err(StoreError::Invalid(ref v)) if v.len() == 1));
    assert_eq!(store.load_all().await.unwrap(), vec![good]);
}

#[tokio::test]
async fn test_save_all_rejects_duplicate_names() {
    let (store, _events, _temp_dir) = create_test_store(10);
    let daily = store.create(draft("Daily", &["BusA"], &[])).await.unwrap();
    let mut copy = daily.clone();
    copy.id = "another-id".to_string();
    copy.name = "DAILY".to_string();

    let result = store.save_all(&[daily, copy]).await;

    assert!(matches!(result, Err(StoreError::DuplicateNames(_))));
}

#[tokio::test]
async fn test_update_keeps_identity_and_checks_collisions() {
    let (store, _events, _temp_dir) = create_test_store(10);
    let daily = store.create(draft("Daily", &["BusA"], &[])).await.unwrap();
    store.create(draft("Night", &["BusB"], &[])).await.unwrap();

    let mut edited = daily.clone();
    edited.name = "Weekday".to_string();
    edited.selected_maps.insert("Harbor".to_string());
    edited.created_at = chrono::Utc::now() + chrono::Duration::days(1);
    let updated = store.update(edited).await.unwrap();

    assert_eq!(updated.id, daily.id);
    assert_eq!(updated.created_at, daily.created_at);
    assert_eq!(updated.name, "Weekday");
    assert!(updated.selected_maps.contains("Harbor"));

    let mut clash = updated.clone();
    clash.name = "night".to_string();
    assert!(matches!(store.update(clash).await, Err(StoreError::NameTaken(_))));

    // Keeping its own name is not a collision.
    let mut same = updated.clone();
    same.description = Some("unchanged name".to_string());
    store.update(same).await.unwrap();
}

#[tokio::test]
async fn test_update_and_delete_unknown_id() {
    let (store, _events, _temp_dir) = create_test_store(10);
    let daily = store.create(draft("Daily", &["BusA"], &[])).await.unwrap();

    let mut ghost = daily.clone();
    ghost.id = "does-not-exist".to_string();
    assert!(matches!(store.update(ghost).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete("does-not-exist").await, Err(StoreError::NotFound(_))));

    store.delete(&daily.id).await.unwrap();
    assert!(store.get_by_id(&daily.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_copies_selection_under_new_identity() {
    let (store, _events, _temp_dir) = create_test_store(10);
    let daily = store
        .create(draft("Daily", &["BusA"], &["Harbor"]).with_description("routes"))
        .await
        .unwrap();
    store.mark_used(&daily.id).await.unwrap();

    let copy = store.duplicate(&daily.id, "Daily (copy)").await.unwrap();

    assert_ne!(copy.id, daily.id);
    assert_eq!(copy.name, "Daily (copy)");
    assert_eq!(copy.selected_vehicles, daily.selected_vehicles);
    assert_eq!(copy.selected_maps, daily.selected_maps);
    assert_eq!(copy.description, daily.description);
    assert!(copy.last_used_at.is_none());

    assert!(matches!(
        store.duplicate(&daily.id, "daily").await,
        Err(StoreError::NameTaken(_))
    ));
    assert!(matches!(
        store.duplicate("nope", "Fresh").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_interrupted_write_leaves_previous_content() {
    let (store, _events, temp_dir) = create_test_store(10);
    let daily = store.create(draft("Daily", &["BusA"], &[])).await.unwrap();

    // A crash between writing the temporary file and renaming it.
    let leftover = temp_dir.path().join("configurations.yaml.tmp.Xk3v9QaB");
    fs::write(&leftover, "version: 1\nconfigurations:\n  - id: half").unwrap();

    let loaded = store.load_all().await.unwrap();

    assert_eq!(loaded, vec![daily]);
    assert!(!leftover.exists());
}

#[tokio::test]
async fn test_corrupted_file_is_recovered_from_newest_backup() {
    let (store, events, _temp_dir) = create_test_store(10);
    let mut rx = events.subscribe();
    store.create(draft("Daily", &["BusA"], &[])).await.unwrap();
    store.create(draft("Night", &["BusB"], &[])).await.unwrap();

    // Corrupt the newest backup too; recovery should fall back past it.
    let backups = store.backups().list_newest_first().await.unwrap();
    fs::write(&backups[0], "{{{{ not yaml").unwrap();
    fs::write(store.path(), "\u{0}\u{0}garbage: [").unwrap();

    let recovered = store.load_all().await.unwrap();

    let names: Vec<&str> = recovered.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Daily"]);

    // The canonical file was replaced by the promoted backup.
    let canonical = fs::read_to_string(store.path()).unwrap();
    assert!(canonical.contains("Daily"));

    let mut saw_recovery = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::ConfigurationsRecovered { backup } = event {
            assert_eq!(backup, backups[1]);
            saw_recovery = true;
        }
    }
    assert!(saw_recovery);
}

#[tokio::test]
async fn test_corrupted_file_without_backup_is_fatal() {
    let (store, _events, _temp_dir) = create_test_store(10);
    fs::write(store.path(), "configurations: [oops").unwrap();

    assert!(matches!(store.load_all().await, Err(StoreError::Corrupted { .. })));
}

#[tokio::test]
async fn test_backups_are_rotated() {
    let (store, _events, _temp_dir) = create_test_store(3);
    for i in 0..5 {
        store
            .create(draft(&format!("Profile {i}"), &["BusA"], &[]))
            .await
            .unwrap();
    }

    let backups = store.backups().list_newest_first().await.unwrap();
    assert_eq!(backups.len(), 3);

    // The newest backup matches the canonical file byte for byte.
    assert_eq!(
        fs::read(&backups[0]).unwrap(),
        fs::read(store.path()).unwrap()
    );
}

#[tokio::test]
async fn test_concurrent_creates_do_not_lose_updates() {
    let (store, _events, _temp_dir) = create_test_store(10);

    let (a, b, c, d) = tokio::join!(
        store.create(draft("A", &["BusA"], &[])),
        store.create(draft("B", &["BusA"], &[])),
        store.create(draft("C", &["BusA"], &[])),
        store.create(draft("D", &["BusA"], &[])),
    );
    for result in [a, b, c, d] {
        result.unwrap();
    }

    assert_eq!(store.load_all().await.unwrap().len(), 4);
}

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Rename(usize, String),
    Duplicate(usize, String),
}

fn name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Daily", "daily", " DAILY", "Night", "night ", "Weekend"])
        .prop_map(str::to_string)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        name_strategy().prop_map(Op::Create),
        (0usize..4, name_strategy()).prop_map(|(i, n)| Op::Rename(i, n)),
        (0usize..4, name_strategy()).prop_map(|(i, n)| Op::Duplicate(i, n)),
    ]
}

#[derive(Debug, Clone)]
struct GeneratedConfiguration {
    name_stem: String,
    description: Option<String>,
    vehicles: Vec<String>,
    maps: Vec<String>,
    used: bool,
}

fn configuration_strategy() -> impl Strategy<Value = GeneratedConfiguration> {
    (
        "[A-Za-z][A-Za-z ]{0,20}",
        prop::option::of("[A-Za-z][A-Za-z0-9 ,.]{0,59}"),
        prop::collection::vec("Bus[A-Za-z0-9_]{0,10}", 1..5),
        prop::collection::vec("Map[A-Za-z0-9_]{0,10}", 0..5),
        any::<bool>(),
    )
        .prop_map(|(name_stem, description, vehicles, maps, used)| GeneratedConfiguration {
            name_stem,
            description,
            vehicles,
            maps,
            used,
        })
}

/// Turn generated values into valid configurations with distinct names.
fn build_configurations(generated: Vec<GeneratedConfiguration>) -> Vec<Configuration> {
    generated
        .into_iter()
        .enumerate()
        .map(|(i, g)| {
            let name = format!("{} {i}", g.name_stem.trim());
            let mut draft = ConfigurationDraft::new(name, g.vehicles, g.maps);
            if let Some(description) = g.description {
                draft = draft.with_description(description);
            }
            let now = Utc::now();
            let mut config = Configuration::from_draft(draft, now);
            if g.used {
                config.last_used_at = Some(now);
            }
            config
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_save_load_round_trip(generated in prop::collection::vec(configuration_strategy(), 1..6)) {
        let configs = build_configurations(generated);
        prop_assert!(configs.iter().all(Configuration::is_valid));

        let loaded = tokio_test::block_on(async {
            let (store, _events, _temp_dir) = create_test_store(2);
            store.save_all(&configs).await.unwrap();
            store.load_all().await.unwrap()
        });

        prop_assert_eq!(loaded, configs);
    }

    #[test]
    fn prop_names_stay_unique(ops in prop::collection::vec(op_strategy(), 1..10)) {
        tokio_test::block_on(async {
            let (store, _events, _temp_dir) = create_test_store(2);

            for op in ops {
                let existing = store.load_all().await.unwrap();
                // Rejections are expected; only the state at rest matters.
                let _ = match op {
                    Op::Create(name) => store.create(draft(&name, &["BusA"], &[])).await.map(|_| ()),
                    Op::Rename(i, name) => match existing.get(i) {
                        Some(config) => {
                            let mut edited = config.clone();
                            edited.name = name;
                            store.update(edited).await.map(|_| ())
                        }
                        None => Ok(()),
                    },
                    Op::Duplicate(i, name) => match existing.get(i) {
                        Some(config) => store.duplicate(&config.id, &name).await.map(|_| ()),
                        None => Ok(()),
                    },
                };

                let names: Vec<String> = store
                    .load_all()
                    .await
                    .unwrap()
                    .iter()
                    .map(|c| c.name.trim().to_lowercase())
                    .collect();
                let mut deduped = names.clone();
                deduped.sort();
                deduped.dedup();
                assert_eq!(deduped.len(), names.len(), "duplicate names at rest: {names:?}");
            }
        });
    }
}
