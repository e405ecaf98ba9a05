use std::path::{Path, PathBuf};

use tempfile::TempDir;

use autolabel_rs::{
    AutoLabelError, ModelConfig, ModelRegistry, SettingsStore, YamlSettingsStore,
    MAX_NUM_CUSTOM_MODELS,
};

fn write_config(dir: &Path, name: &str, model_type: &str) -> PathBuf {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(
        &path,
        format!(
            "type: {model_type}\nname: {name}\ndisplay_name: {name}\n\
             encoder_model_path: {name}_encoder.onnx\n"
        ),
    )
    .unwrap();
    path
}

fn custom_names(registry: &ModelRegistry) -> Vec<String> {
    registry
        .list_configs()
        .iter()
        .filter(|c| c.is_custom)
        .map(|c| c.name.clone())
        .collect()
}

/// Settings file already holding `custom_1..=custom_5` with `last_used` 1..=5.
fn seeded(dir: &Path) -> PathBuf {
    let settings = dir.join("settings.yaml");
    let mut store = YamlSettingsStore::new(&settings);
    let models: Vec<ModelConfig> = (1..=MAX_NUM_CUSTOM_MODELS)
        .map(|i| {
            let path = write_config(dir, &format!("custom_{i}"), "segment_anything");
            let mut config = ModelConfig::from_file(&path).unwrap();
            config.is_custom = true;
            config.last_used = Some(i as f64);
            config
        })
        .collect();
    store.save_custom_models(&models).unwrap();
    settings
}

#[test]
fn sixth_custom_model_evicts_least_recently_used() {
    let dir = TempDir::new().unwrap();
    let settings = seeded(dir.path());
    let mut registry =
        ModelRegistry::load(None, Box::new(YamlSettingsStore::new(&settings))).unwrap();
    assert_eq!(
        custom_names(&registry),
        ["custom_5", "custom_4", "custom_3", "custom_2", "custom_1"]
    );

    let sixth = write_config(dir.path(), "custom_6", "yolov5");
    let added = registry.add_or_replace_custom(&sixth).unwrap();
    assert!(added.is_custom);

    let expected = ["custom_6", "custom_5", "custom_4", "custom_3", "custom_2"];
    assert_eq!(custom_names(&registry), expected);

    // Persisted: a fresh registry sees the same list.
    let reopened =
        ModelRegistry::load(None, Box::new(YamlSettingsStore::new(&settings))).unwrap();
    assert_eq!(custom_names(&reopened), expected);
    let stored = YamlSettingsStore::new(&settings).custom_models().unwrap();
    assert_eq!(stored.len(), MAX_NUM_CUSTOM_MODELS);
    assert!(stored.iter().all(|m| m.name != "custom_1"));
}

#[test]
fn re_adding_a_model_refreshes_it_in_place() {
    let dir = TempDir::new().unwrap();
    let settings = seeded(dir.path());
    let mut registry =
        ModelRegistry::load(None, Box::new(YamlSettingsStore::new(&settings))).unwrap();

    let path = dir.path().join("custom_1.yaml");
    std::fs::write(
        &path,
        "type: segment_anything\nname: custom_1\ndisplay_name: Renamed\n",
    )
    .unwrap();
    registry.add_or_replace_custom(&path).unwrap();

    let configs = registry.list_configs();
    assert_eq!(configs.len(), MAX_NUM_CUSTOM_MODELS);
    assert_eq!(configs[0].name, "custom_1");
    assert_eq!(configs[0].display_name, "Renamed");
}

#[test]
fn unknown_model_type_is_rejected_without_changes() {
    let dir = TempDir::new().unwrap();
    let settings = seeded(dir.path());
    let mut registry =
        ModelRegistry::load(None, Box::new(YamlSettingsStore::new(&settings))).unwrap();
    let before = registry.list_configs().to_vec();

    let bad = write_config(dir.path(), "bad", "unknown_kind");
    let err = registry.add_or_replace_custom(&bad).unwrap_err();
    assert!(matches!(err, AutoLabelError::Config { .. }), "{err:?}");
    assert_eq!(registry.list_configs(), before.as_slice());

    let missing = dir.path().join("nope.yaml");
    assert!(matches!(
        registry.add_or_replace_custom(&missing),
        Err(AutoLabelError::Config { .. })
    ));
    assert_eq!(registry.list_configs(), before.as_slice());
}

#[test]
fn type_specific_keys_survive_the_settings_file() {
    let dir = TempDir::new().unwrap();
    let settings = seeded(dir.path());
    let stored = YamlSettingsStore::new(&settings).custom_models().unwrap();
    let param: String = stored[0].param("encoder_model_path").unwrap();
    assert_eq!(param, "custom_1_encoder.onnx");
}
