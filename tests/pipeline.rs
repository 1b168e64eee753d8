//! End-to-end tests of capture, split exclusion, debouncing and delivery.

use config_auto_export::prelude::*;
use config_auto_export::schedule::STATE_KEY_DUE_TIMESTAMP;
use config_auto_export::store::ManualClock;
use mockito::{Matcher, Server};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn yaml(raw: &str) -> ConfigData {
    serde_yaml::from_str(raw).unwrap()
}

fn exported_keys(directory: &Path) -> BTreeSet<String> {
    if !directory.is_dir() {
        return BTreeSet::new();
    }
    fs::read_dir(directory)
        .unwrap()
        .filter_map(|entry| {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            name.strip_suffix(".yml").map(str::to_string)
        })
        .collect()
}

#[test]
fn test_full_pipeline_with_file_stores() {
    let temp_dir = TempDir::new().unwrap();
    let active_dir = temp_dir.path().join("active");
    let split_dir = temp_dir.path().join("split").join("dev");
    let export_dir = temp_dir.path().join("export");
    let state_path = temp_dir.path().join("state.json");
    fs::create_dir_all(&active_dir).unwrap();
    fs::create_dir_all(&split_dir).unwrap();

    fs::write(
        active_dir.join("config_split.config_split.dev.yml"),
        "label: Development\nfolder: ../split/dev\nmodule:\n  devel: 0\n",
    )
    .unwrap();
    fs::write(
        active_dir.join("core.extension.yml"),
        "module:\n  devel: 0\n  node: 0\n  system: 0\ntheme:\n  olivero: 0\n",
    )
    .unwrap();
    fs::write(active_dir.join("system.site.yml"), "name: Example\n").unwrap();
    fs::write(active_dir.join("devel.settings.yml"), "page_alter: true\n").unwrap();
    fs::write(split_dir.join("devel.settings.yml"), "page_alter: false\n").unwrap();

    let config_dir = active_dir.canonicalize().unwrap().display().to_string();
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/trigger")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("ref".into(), "main".into()),
            Matcher::UrlEncoded("variables[CONFIG_DIR]".into(), config_dir),
        ]))
        .with_status(200)
        .expect(1)
        .create();

    let store = Arc::new(FileConfigStore::new(&active_dir));
    let clock = Arc::new(ManualClock::new(1_000));
    let exporter = Exporter::builder()
        .with_settings(SettingsHandle::new(ExportSettings {
            enabled: true,
            directory: export_dir.clone(),
            webhook: format!("{}/trigger", server.url()),
            webhook_params: "ref: main\nvariables:\n  CONFIG_DIR: '[config directory]'\n"
                .to_string(),
            delay: 300,
            delay_from_first: false,
            config_directory: active_dir.clone(),
        }))
        .with_reader(store.clone())
        .with_state(Arc::new(FileStateStore::new(&state_path)))
        .with_split_provider(Arc::new(
            ConfigSplitProvider::new(store).with_base_dir(&active_dir),
        ))
        .with_clock(clock.clone())
        .build()
        .unwrap();

    {
        let mut work = exporter.begin();
        assert_eq!(
            work.on_config_saved("system.site").unwrap(),
            CaptureOutcome::Written
        );
        assert_eq!(
            work.on_config_saved("devel.settings").unwrap(),
            CaptureOutcome::Excluded
        );
    }

    clock.set(1_100);
    {
        let mut work = exporter.begin();
        work.on_config_saved("core.extension").unwrap();
    }

    assert_eq!(
        exported_keys(&export_dir),
        BTreeSet::from(["core.extension".to_string(), "system.site".to_string()])
    );
    let modules = FileTarget::new(&export_dir)
        .read("core.extension")
        .unwrap()
        .unwrap();
    assert_eq!(
        modules,
        yaml("module:\n  node: 0\n  system: 0\ntheme:\n  olivero: 0\n")
    );

    // The due time survives a restart.
    assert_eq!(
        FileStateStore::new(&state_path)
            .get(STATE_KEY_DUE_TIMESTAMP)
            .unwrap(),
        Some(1_400)
    );

    clock.set(1_399);
    assert_eq!(exporter.check_due_date().unwrap(), None);

    clock.set(1_400);
    assert_eq!(
        exporter.check_due_date().unwrap(),
        Some(TriggerOutcome::Delivered(200))
    );
    assert_eq!(exporter.due_state().unwrap(), DueState::Unset);
    assert_eq!(exporter.check_due_date().unwrap(), None);

    mock.assert();
}

#[test]
fn test_malformed_split_keeps_other_exclusions() {
    let temp_dir = TempDir::new().unwrap();
    let split_dir = temp_dir.path().join("split");
    let export_dir = temp_dir.path().join("export");
    fs::create_dir_all(&split_dir).unwrap();
    fs::write(split_dir.join("devel.settings.yml"), "page_alter: false\n").unwrap();

    let store = Arc::new(MemoryConfigStore::new());
    store.set(
        "config_split.config_split.dev",
        yaml(&format!("folder: '{}'\n", split_dir.display())),
    );
    store.set("config_split.config_split.broken", yaml("label: Broken\n"));
    store.set("devel.settings", yaml("page_alter: true"));

    let exporter = Exporter::builder()
        .with_settings(SettingsHandle::new(ExportSettings {
            enabled: true,
            directory: export_dir.clone(),
            ..Default::default()
        }))
        .with_reader(store.clone())
        .with_split_provider(Arc::new(ConfigSplitProvider::new(store)))
        .build()
        .unwrap();

    let mut work = exporter.begin();
    assert_eq!(
        work.on_config_saved("devel.settings").unwrap(),
        CaptureOutcome::Excluded
    );
    drop(work);
    assert!(exported_keys(&export_dir).is_empty());
}

#[test]
fn test_zero_delay_notifies_at_end_of_work() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let mock = server.mock("POST", "/").with_status(204).expect(1).create();

    let store = Arc::new(MemoryConfigStore::new());
    store.set("system.site", yaml("name: Example"));
    store.set("system.performance", yaml("cache: true"));

    let exporter = Exporter::builder()
        .with_settings(SettingsHandle::new(ExportSettings {
            enabled: true,
            directory: temp_dir.path().join("export"),
            webhook: server.url(),
            ..Default::default()
        }))
        .with_reader(store)
        .build()
        .unwrap();

    let mut work = exporter.begin();
    work.on_config_saved("system.site").unwrap();
    work.on_config_saved("system.performance").unwrap();
    assert_eq!(
        work.finish().unwrap(),
        WorkOutcome::Notified(TriggerOutcome::Delivered(204))
    );
    assert_eq!(exporter.due_state().unwrap(), DueState::Unset);

    mock.assert();
}

#[test]
fn test_import_leaves_export_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let export_dir = temp_dir.path().join("export");
    let store = Arc::new(MemoryConfigStore::new());
    store.set("system.site", yaml("name: Imported"));

    let exporter = Exporter::builder()
        .with_settings(SettingsHandle::new(ExportSettings {
            enabled: true,
            directory: export_dir.clone(),
            delay: 60,
            ..Default::default()
        }))
        .with_reader(store)
        .build()
        .unwrap();

    {
        let mut work = exporter.begin();
        work.on_import_validation();
        work.on_config_saved("system.site").unwrap();
        work.on_translation_saved("system.site", "fr", &yaml("name: Importé"))
            .unwrap();
    }

    assert!(exported_keys(&export_dir).is_empty());
    assert!(!export_dir.join("language.fr").exists());
    assert_eq!(exporter.due_state().unwrap(), DueState::Unset);
}

fn debounced_due_at(delay: u64, delay_from_first: bool, request_times: &[i64]) -> DueState {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryConfigStore::new());
    store.set("system.site", yaml("name: Example"));
    let clock = Arc::new(ManualClock::new(0));

    let exporter = Exporter::builder()
        .with_settings(SettingsHandle::new(ExportSettings {
            enabled: true,
            directory: temp_dir.path().join("export"),
            delay,
            delay_from_first,
            ..Default::default()
        }))
        .with_reader(store)
        .with_clock(clock.clone())
        .build()
        .unwrap();

    for &time in request_times {
        clock.set(time);
        let mut work = exporter.begin();
        work.on_config_saved("system.site").unwrap();
    }

    exporter.due_state().unwrap()
}

fn module_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "system", "node", "user", "devel", "views", "block", "field", "image",
    ])
    .prop_map(|module| format!("{module}.settings"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_due_time_follows_anchor_policy(
        delay in 1u64..10_000,
        delay_from_first in any::<bool>(),
        gaps in prop::collection::vec(0i64..1_000, 1..6),
    ) {
        let mut time = 1_700_000_000i64;
        let request_times: Vec<i64> = gaps
            .iter()
            .map(|gap| {
                time += gap;
                time
            })
            .collect();

        let anchor = if delay_from_first {
            request_times[0]
        } else {
            request_times[request_times.len() - 1]
        };
        let expected = DueState::Pending(anchor + delay as i64);

        prop_assert_eq!(debounced_due_at(delay, delay_from_first, &request_times), expected);
    }

    #[test]
    fn prop_excluded_keys_are_never_exported(
        saved in prop::collection::btree_set(module_name(), 1..8),
        split in prop::collection::btree_set(module_name(), 0..8),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let split_dir = temp_dir.path().join("split");
        let export_dir = temp_dir.path().join("export");
        fs::create_dir_all(&split_dir).unwrap();
        for key in &split {
            fs::write(split_dir.join(format!("{key}.yml")), "x: 1\n").unwrap();
        }

        let store = Arc::new(MemoryConfigStore::new());
        for key in &saved {
            store.set(key.as_str(), yaml("x: 2"));
        }

        let exporter = Exporter::builder()
            .with_settings(SettingsHandle::new(ExportSettings {
                enabled: true,
                directory: export_dir.clone(),
                ..Default::default()
            }))
            .with_reader(store)
            .with_split_provider(Arc::new(StaticSplitProvider::new(vec![
                SplitDefinition::new("dev", &split_dir),
            ])))
            .build()
            .unwrap();

        let mut work = exporter.begin();
        for key in &saved {
            work.on_config_saved(key).unwrap();
        }
        let expected: BTreeSet<String> = saved.difference(&split).cloned().collect();
        prop_assert_eq!(work.trigger_needed(), !expected.is_empty());
        drop(work);

        prop_assert_eq!(exported_keys(&export_dir), expected);
    }
}
