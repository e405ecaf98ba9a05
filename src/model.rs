use std::path::Path;

use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};

use crate::{
    errors::{AutoLabelError, Result},
    model_config::{ModelConfig, ModelType},
    segment_anything::SegmentAnything,
    traits::{DecoderInputs, DecoderSession, EncoderSession, Engine, EngineFactory},
};

fn load_error<E>(operation: impl Into<String>) -> impl FnOnce(E) -> AutoLabelError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let operation = operation.into();
    move |e| AutoLabelError::ModelLoad {
        operation,
        source: Box::new(e),
    }
}

/// Open an ONNX file, preferring TensorRT, then CUDA, then CPU.
pub fn load_session(model_path: &Path, device_id: i32) -> Result<Session> {
    SessionBuilder::new()
        .map_err(load_error("session builder initialization"))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(load_error("execution provider registration"))?
        .with_memory_pattern(true)
        .map_err(load_error("memory pattern setup"))?
        .commit_from_file(model_path)
        .map_err(load_error(format!("load model file {}", model_path.display())))
}

/// Image encoder backed by an ONNX Runtime session; input `x`.
pub struct OrtEncoder {
    session: Session,
}

impl OrtEncoder {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path, device_id)?,
        })
    }
}

impl EncoderSession for OrtEncoder {
    fn encode(&mut self, tensor: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let outputs = self
            .session
            .run(ort::inputs!["x" => TensorRef::from_array_view(&tensor.as_standard_layout())?])?;
        Ok(outputs[0].try_extract_array::<f32>()?.to_owned())
    }
}

/// Prompt decoder backed by an ONNX Runtime session.
pub struct OrtDecoder {
    session: Session,
}

impl OrtDecoder {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path, device_id)?,
        })
    }
}

impl DecoderSession for OrtDecoder {
    fn decode(&mut self, inputs: DecoderInputs<'_>) -> Result<ArrayD<f32>> {
        let outputs = self.session.run(ort::inputs![
            "image_embeddings" => TensorRef::from_array_view(&inputs.image_embeddings.as_standard_layout())?,
            "point_coords" => TensorRef::from_array_view(&inputs.point_coords)?,
            "point_labels" => TensorRef::from_array_view(&inputs.point_labels)?,
            "mask_input" => TensorRef::from_array_view(&inputs.mask_input)?,
            "has_mask_input" => TensorRef::from_array_view(&inputs.has_mask_input)?,
            "orig_im_size" => TensorRef::from_array_view(&inputs.orig_im_size)?,
        ])?;
        // Outputs are (masks, iou_predictions, low_res_masks).
        Ok(outputs[0].try_extract_array::<f32>()?.to_owned())
    }
}

/// Builds engines backed by ONNX Runtime.
pub struct OnnxEngineFactory {
    pub device_id: i32,
}

impl OnnxEngineFactory {
    pub const fn new(device_id: i32) -> Self {
        Self { device_id }
    }
}

impl EngineFactory for OnnxEngineFactory {
    fn create(&self, config: &ModelConfig) -> Result<Box<dyn Engine>> {
        match config.model_type {
            ModelType::SegmentAnything => {
                Ok(Box::new(SegmentAnything::configure(config, self.device_id)?))
            }
            ModelType::YoloV5 | ModelType::YoloV8 => Err(AutoLabelError::model_load(
                "engine selection",
                format!(
                    "no inference backend for `{}` models in this build",
                    config.model_type
                ),
            )),
        }
    }
}
