//! Model-assisted polygon labeling.
//!
//! A [`ModelManager`] keeps at most one model loaded, runs loads and
//! predictions on background workers, and reports progress through
//! [`Event`]s. The bundled engine is Segment Anything on ONNX Runtime:
//! prompts go in as [`Mark`]s, closed polygon [`Shape`]s come out in
//! original-image pixels.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod model;
pub mod model_config;
pub mod polygon;
pub mod registry;
pub mod segment_anything;
pub mod settings;
pub mod slot;
pub mod traits;
pub mod transform;
pub mod types;

pub mod mocks;

pub use config::Config;
pub use coordinator::{LoadedModel, ModelManager, Submission};
pub use errors::{AutoLabelError, Result};
pub use events::{Event, EventBus};
pub use model::OnnxEngineFactory;
pub use model_config::{ModelConfig, ModelType};
pub use registry::{ModelRegistry, MAX_NUM_CUSTOM_MODELS};
pub use segment_anything::{SegmentAnything, SegmentAnythingParams};
pub use settings::{MemorySettingsStore, SettingsStore, YamlSettingsStore};
pub use traits::*;
pub use types::{Action, Capabilities, Mark, MarkLabel, Point, Shape, ShapeType};
