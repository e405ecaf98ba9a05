//! Durable application settings; the registry keeps its custom model list here.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::errors::{AutoLabelError, Result};
use crate::model_config::ModelConfig;

pub const CUSTOM_MODELS_KEY: &str = "custom_models";

/// Read-modify-write access to the custom model list.
pub trait SettingsStore: Send {
    fn custom_models(&self) -> Result<Vec<ModelConfig>>;
    fn save_custom_models(&mut self, models: &[ModelConfig]) -> Result<()>;
}

/// Settings kept in a YAML file; keys other than `custom_models` are preserved.
pub struct YamlSettingsStore {
    path: PathBuf,
}

impl YamlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.autolabelrc`, or the working directory when there is no home.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autolabelrc")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Mapping> {
        if !self.path.exists() {
            return Ok(Mapping::new());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| AutoLabelError::FileSystem {
            path: self.path.clone(),
            operation: "read settings".to_string(),
            source: e,
        })?;
        match serde_yaml::from_str::<Value>(&text) {
            Ok(Value::Mapping(mapping)) => Ok(mapping),
            Ok(Value::Null) => Ok(Mapping::new()),
            Ok(_) => Err(AutoLabelError::Settings {
                operation: format!("parse {}", self.path.display()),
                source: "settings file is not a mapping".into(),
            }),
            Err(e) => Err(AutoLabelError::Settings {
                operation: format!("parse {}", self.path.display()),
                source: Box::new(e),
            }),
        }
    }
}

impl SettingsStore for YamlSettingsStore {
    fn custom_models(&self) -> Result<Vec<ModelConfig>> {
        let document = self.read_document()?;
        let Some(list) = document.get(CUSTOM_MODELS_KEY).and_then(Value::as_sequence) else {
            return Ok(Vec::new());
        };

        let mut models = Vec::with_capacity(list.len());
        for entry in list {
            match serde_yaml::from_value::<ModelConfig>(entry.clone()) {
                Ok(mut model) => {
                    model.is_custom = true;
                    models.push(model);
                }
                Err(e) => tracing::warn!("Skipping malformed custom model entry: {}", e),
            }
        }
        Ok(models)
    }

    fn save_custom_models(&mut self, models: &[ModelConfig]) -> Result<()> {
        let mut document = self.read_document()?;
        let list = serde_yaml::to_value(models).map_err(|e| AutoLabelError::Settings {
            operation: "serialize custom models".to_string(),
            source: Box::new(e),
        })?;
        document.insert(Value::from(CUSTOM_MODELS_KEY), list);

        let text = serde_yaml::to_string(&document).map_err(|e| AutoLabelError::Settings {
            operation: "serialize settings".to_string(),
            source: Box::new(e),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AutoLabelError::FileSystem {
                path: parent.to_path_buf(),
                operation: "create settings directory".to_string(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|e| AutoLabelError::FileSystem {
            path: self.path.clone(),
            operation: "write settings".to_string(),
            source: e,
        })
    }
}

/// In-process settings, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySettingsStore {
    models: Vec<ModelConfig>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn custom_models(&self) -> Result<Vec<ModelConfig>> {
        Ok(self.models.clone())
    }

    fn save_custom_models(&mut self, models: &[ModelConfig]) -> Result<()> {
        self.models = models.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn custom(name: &str, last_used: f64) -> ModelConfig {
        let mut config = ModelConfig::from_yaml_str(&format!(
            "type: yolov8\nname: {name}\ndisplay_name: {name}\nmodel_path: m.onnx\n"
        ))
        .unwrap();
        config.config_file = PathBuf::from(format!("/models/{name}.yaml"));
        config.is_custom = true;
        config.last_used = Some(last_used);
        config
    }

    #[test]
    fn missing_file_has_no_custom_models() {
        let dir = TempDir::new().unwrap();
        let store = YamlSettingsStore::new(dir.path().join("settings.yaml"));
        assert!(store.custom_models().unwrap().is_empty());
    }

    #[test]
    fn saves_and_reloads_custom_models() {
        let dir = TempDir::new().unwrap();
        let mut store = YamlSettingsStore::new(dir.path().join("nested").join("settings.yaml"));
        store
            .save_custom_models(&[custom("a", 2.0), custom("b", 1.0)])
            .unwrap();

        let models = store.custom_models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "a");
        assert_eq!(models[0].last_used, Some(2.0));
        assert_eq!(models[1].param::<String>("model_path").unwrap(), "m.onnx");
    }

    #[test]
    fn unrelated_keys_survive_a_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "language: en_US\nauto_save: true\n").unwrap();

        let mut store = YamlSettingsStore::new(&path);
        store.save_custom_models(&[custom("a", 1.0)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let document: Mapping = serde_yaml::from_str(&text).unwrap();
        assert_eq!(document.get("language").and_then(Value::as_str), Some("en_US"));
        assert!(document.contains_key(CUSTOM_MODELS_KEY));
    }
}
