//! Model configuration records (the YAML files describing each model).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{AutoLabelError, Result};

/// Keys every model config must carry.
pub const REQUIRED_KEYS: [&str; 3] = ["type", "name", "display_name"];

/// Model family, selected by the `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// Prompted segmentation (encoder + decoder).
    #[serde(rename = "segment_anything")]
    SegmentAnything,
    #[serde(rename = "yolov5")]
    YoloV5,
    #[serde(rename = "yolov8")]
    YoloV8,
}

impl ModelType {
    pub const ALL: [Self; 3] = [Self::SegmentAnything, Self::YoloV5, Self::YoloV8];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SegmentAnything => "segment_anything",
            Self::YoloV5 => "yolov5",
            Self::YoloV8 => "yolov8",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub name: String,
    pub display_name: String,
    /// Normalized absolute path of the YAML file; the registry identity key.
    #[serde(default)]
    pub config_file: PathBuf,
    #[serde(default, rename = "is_custom_model")]
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<f64>,
    /// Type-specific keys (artifact paths, input sizes, ...).
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl ModelConfig {
    /// Read and validate a model config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(AutoLabelError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            AutoLabelError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.config_file = normalize_path(path)?;
        Ok(config)
    }

    /// Parse a config document, checking required keys and the model type
    /// before deserializing.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = value
            .as_mapping()
            .ok_or_else(|| AutoLabelError::config("invalid config file: expected a mapping"))?;

        for key in REQUIRED_KEYS {
            if !mapping.contains_key(key) {
                return Err(AutoLabelError::config(format!(
                    "invalid config file format: missing `{key}`"
                )));
            }
        }

        let tag = mapping
            .get("type")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();
        if ModelType::from_tag(tag).is_none() {
            return Err(AutoLabelError::config(format!(
                "invalid config file format: unknown model type `{tag}`"
            )));
        }

        Ok(serde_yaml::from_value(value)?)
    }

    pub fn last_used(&self) -> f64 {
        self.last_used.unwrap_or(0.0)
    }

    /// Typed access to a type-specific key.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.params.get(key).ok_or_else(|| {
            AutoLabelError::config(format!("missing `{key}` in config of {}", self.name))
        })?;
        serde_yaml::from_value(value.clone()).map_err(|e| {
            AutoLabelError::config(format!("invalid `{key}` in config of {}: {e}", self.name))
        })
    }

    /// Artifact paths may be absolute or relative to the config file.
    pub fn resolve_artifact(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.config_file
            .parent()
            .map_or_else(|| path.to_path_buf(), |dir| dir.join(path))
    }
}

/// Absolute path with `.` and `..` removed lexically.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| AutoLabelError::FileSystem {
        path: path.to_path_buf(),
        operation: "resolve absolute path".to_string(),
        source: e,
    })?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}
