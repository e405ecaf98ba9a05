//! Available model configs: packaged built-ins plus user-added custom models.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{AutoLabelError, Result};
use crate::model_config::{normalize_path, ModelConfig};
use crate::settings::SettingsStore;

pub const MAX_NUM_CUSTOM_MODELS: usize = 5;

/// Built-in model list inside the resource root.
pub const BUILTIN_LIST_FILE: &str = "models.yaml";

/// Prefix marking a path relative to the resource root.
pub const RESOURCE_PREFIX: &str = ":/";

#[derive(Debug, Deserialize)]
struct BuiltinEntry {
    config_file: String,
}

/// Seconds since the Unix epoch, as stored in `last_used`.
pub fn timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub struct ModelRegistry {
    resource_root: Option<PathBuf>,
    store: Box<dyn SettingsStore>,
    configs: Vec<ModelConfig>,
}

impl ModelRegistry {
    /// Scan built-ins and custom models.
    ///
    /// Custom entries whose config file disappeared are pruned and the
    /// pruned list is written back right away.
    pub fn load(resource_root: Option<PathBuf>, store: Box<dyn SettingsStore>) -> Result<Self> {
        let mut registry = Self {
            resource_root,
            store,
            configs: Vec::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn reload(&mut self) -> Result<()> {
        let mut configs = self.load_builtin_configs()?;
        configs.extend(self.load_custom_configs()?);
        sort_configs(&mut configs);
        self.configs = configs;
        Ok(())
    }

    /// Built-ins first in declared order, then custom models, most recent first.
    pub fn list_configs(&self) -> &[ModelConfig] {
        &self.configs
    }

    pub fn find(&self, config_file: &Path) -> Option<&ModelConfig> {
        self.configs.iter().find(|c| c.config_file == config_file)
    }

    /// Register the config at `path` as a custom model, or refresh it if it
    /// is already registered. Returns the stored record.
    pub fn add_or_replace_custom(&mut self, path: &Path) -> Result<ModelConfig> {
        let config_file = normalize_path(path)?;
        let mut config = ModelConfig::from_file(&config_file)?;
        config.is_custom = true;

        let mut customs = self.store.custom_models()?;
        let now = next_timestamp(&customs);
        match customs.iter_mut().find(|m| m.config_file == config_file) {
            Some(existing) => {
                config.last_used = Some(now);
                *existing = config.clone();
            }
            None => {
                if customs.len() >= MAX_NUM_CUSTOM_MODELS {
                    customs.sort_by(|a, b| b.last_used().total_cmp(&a.last_used()));
                    let evicted = customs.split_off(MAX_NUM_CUSTOM_MODELS - 1);
                    for model in &evicted {
                        debug!("Evicting custom model {}", model.config_file.display());
                    }
                }
                config.last_used = Some(now);
                customs.insert(0, config.clone());
            }
        }

        self.store.save_custom_models(&customs)?;
        self.reload()?;
        Ok(config)
    }

    /// Mark a custom model as just used. Built-ins keep their fixed order.
    pub fn touch(&mut self, config_file: &Path) -> Result<()> {
        let mut customs = self.store.custom_models()?;
        let last_used = next_timestamp(&customs);
        let Some(entry) = customs.iter_mut().find(|m| m.config_file == config_file) else {
            return Ok(());
        };
        entry.last_used = Some(last_used);
        self.store.save_custom_models(&customs)?;

        if let Some(config) = self
            .configs
            .iter_mut()
            .find(|c| c.is_custom && c.config_file == config_file)
        {
            config.last_used = Some(last_used);
        }
        sort_configs(&mut self.configs);
        Ok(())
    }

    fn resolve_builtin(&self, root: &Path, config_file: &str) -> PathBuf {
        match config_file.strip_prefix(RESOURCE_PREFIX) {
            Some(relative) => root.join(relative),
            None => PathBuf::from(config_file),
        }
    }

    fn load_builtin_configs(&self) -> Result<Vec<ModelConfig>> {
        let Some(root) = &self.resource_root else {
            return Ok(Vec::new());
        };
        let list_path = root.join(BUILTIN_LIST_FILE);
        if !list_path.is_file() {
            debug!("No built-in model list at {}", list_path.display());
            return Ok(Vec::new());
        }

        let text = std::fs::read_to_string(&list_path).map_err(|e| AutoLabelError::FileSystem {
            path: list_path.clone(),
            operation: "read built-in model list".to_string(),
            source: e,
        })?;
        let entries: Vec<BuiltinEntry> = serde_yaml::from_str(&text)?;

        let mut configs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let path = self.resolve_builtin(root, &entry.config_file);
            match ModelConfig::from_file(&path) {
                Ok(mut config) => {
                    config.is_custom = false;
                    config.last_used = Some(-(index as f64));
                    configs.push(config);
                }
                Err(e) => warn!("Skipping built-in model {}: {}", entry.config_file, e),
            }
        }
        Ok(configs)
    }

    fn load_custom_configs(&mut self) -> Result<Vec<ModelConfig>> {
        let stored = self.store.custom_models()?;
        let before = stored.len();
        let kept: Vec<ModelConfig> = stored
            .into_iter()
            .filter(|m| m.config_file.is_file())
            .collect();
        if kept.len() != before {
            debug!("Pruned {} missing custom model(s)", before - kept.len());
        }
        self.store.save_custom_models(&kept)?;

        let mut configs = Vec::with_capacity(kept.len());
        for stored in kept {
            match ModelConfig::from_file(&stored.config_file) {
                Ok(mut config) => {
                    config.is_custom = true;
                    config.last_used = Some(stored.last_used.unwrap_or_else(timestamp));
                    configs.push(config);
                }
                Err(e) => warn!(
                    "Skipping custom model {}: {}",
                    stored.config_file.display(),
                    e
                ),
            }
        }
        Ok(configs)
    }
}

/// Current time, but strictly after every stored `last_used`.
fn next_timestamp(customs: &[ModelConfig]) -> f64 {
    let latest = customs
        .iter()
        .map(ModelConfig::last_used)
        .fold(f64::NEG_INFINITY, f64::max);
    timestamp().max(latest + 1e-6)
}

fn sort_configs(configs: &mut [ModelConfig]) {
    configs.sort_by(|a, b| match a.is_custom.cmp(&b.is_custom) {
        Ordering::Equal => b.last_used().total_cmp(&a.last_used()),
        other => other,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use tempfile::TempDir;

    fn write_config(dir: &Path, name: &str, model_type: &str) -> PathBuf {
        let path = dir.join(format!("{name}.yaml"));
        std::fs::write(
            &path,
            format!("type: {model_type}\nname: {name}\ndisplay_name: {name}\n"),
        )
        .unwrap();
        path
    }

    fn resources(dir: &Path) -> PathBuf {
        let root = dir.join("resources");
        std::fs::create_dir_all(&root).unwrap();
        write_config(&root, "builtin_a", "segment_anything");
        write_config(&root, "builtin_b", "yolov5");
        write_config(&root, "builtin_c", "yolov8");
        std::fs::write(
            root.join(BUILTIN_LIST_FILE),
            "- config_file: \":/builtin_b.yaml\"\n\
             - config_file: \":/builtin_a.yaml\"\n\
             - config_file: \":/builtin_c.yaml\"\n",
        )
        .unwrap();
        root
    }

    fn names(registry: &ModelRegistry) -> Vec<String> {
        registry.list_configs().iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn builtins_keep_declared_order() {
        let dir = TempDir::new().unwrap();
        let registry =
            ModelRegistry::load(Some(resources(dir.path())), Box::new(MemorySettingsStore::new()))
                .unwrap();
        assert_eq!(names(&registry), ["builtin_b", "builtin_a", "builtin_c"]);
        assert!(registry.list_configs().iter().all(|c| !c.is_custom));
    }

    #[test]
    fn custom_models_follow_builtins() {
        let dir = TempDir::new().unwrap();
        let mut registry =
            ModelRegistry::load(Some(resources(dir.path())), Box::new(MemorySettingsStore::new()))
                .unwrap();
        let first = write_config(dir.path(), "custom_1", "yolov8");
        let second = write_config(dir.path(), "custom_2", "yolov5");
        registry.add_or_replace_custom(&first).unwrap();
        registry.add_or_replace_custom(&second).unwrap();

        assert_eq!(
            names(&registry),
            ["builtin_b", "builtin_a", "builtin_c", "custom_2", "custom_1"]
        );

        // Re-adding refreshes last_used in place instead of duplicating.
        registry.add_or_replace_custom(&first).unwrap();
        assert_eq!(
            names(&registry),
            ["builtin_b", "builtin_a", "builtin_c", "custom_1", "custom_2"]
        );
    }

    #[test]
    fn missing_custom_files_are_pruned_and_persisted() {
        let dir = TempDir::new().unwrap();
        let kept = write_config(dir.path(), "kept", "yolov8");
        let gone = write_config(dir.path(), "gone", "yolov8");

        let mut store = MemorySettingsStore::new();
        let mut records = Vec::new();
        for path in [&kept, &gone] {
            let mut config = ModelConfig::from_file(path).unwrap();
            config.is_custom = true;
            config.last_used = Some(1.0);
            records.push(config);
        }
        store.save_custom_models(&records).unwrap();
        std::fs::remove_file(&gone).unwrap();

        let registry = ModelRegistry::load(None, Box::new(store)).unwrap();
        assert_eq!(names(&registry), ["kept"]);
        assert_eq!(registry.store.custom_models().unwrap().len(), 1);
    }

    #[test]
    fn touch_moves_custom_model_to_front() {
        let dir = TempDir::new().unwrap();
        let mut registry = ModelRegistry::load(None, Box::new(MemorySettingsStore::new())).unwrap();
        let first = write_config(dir.path(), "first", "yolov8");
        let second = write_config(dir.path(), "second", "yolov8");
        let first = registry.add_or_replace_custom(&first).unwrap();
        registry.add_or_replace_custom(&second).unwrap();
        assert_eq!(names(&registry), ["second", "first"]);

        registry.touch(&first.config_file).unwrap();
        assert_eq!(names(&registry), ["first", "second"]);
        let touched = registry.find(&first.config_file).unwrap();
        assert!(touched.last_used() >= first.last_used());
    }
}
