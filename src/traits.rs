use std::sync::Arc;

use image::DynamicImage;
use ndarray::prelude::*;

use crate::errors::Result;
use crate::model_config::ModelConfig;
use crate::types::{Capabilities, Mark, Shape};

/// Image encoder stage of a prompted segmentation model.
///
/// Runs once per image; the returned embedding is reused for every prompt
/// change on that image.
pub trait EncoderSession: Send {
    /// `tensor` is the normalized `1 x 3 x S x S` input.
    fn encode(&mut self, tensor: ArrayView4<f32>) -> Result<ArrayD<f32>>;
}

/// Named inputs of the prompt decoder.
#[derive(Debug)]
pub struct DecoderInputs<'a> {
    pub image_embeddings: ArrayViewD<'a, f32>,
    /// `1 x (N + 1) x 2`, last entry the padding point.
    pub point_coords: Array3<f32>,
    /// `1 x (N + 1)`, last entry `-1`.
    pub point_labels: Array2<f32>,
    /// `1 x 1 x 256 x 256` zeros on a first-pass prediction.
    pub mask_input: Array4<f32>,
    pub has_mask_input: Array1<f32>,
    /// `[height, width]` of the padded rectangle.
    pub orig_im_size: Array1<f32>,
}

/// Prompt decoder stage; runs on every prediction.
pub trait DecoderSession: Send {
    /// Returns mask logits shaped `1 x 1 x H x W` for `orig_im_size`.
    fn decode(&mut self, inputs: DecoderInputs<'_>) -> Result<ArrayD<f32>>;
}

/// A loaded auto-labeling model, whatever its family.
///
/// The coordinator only talks to models through this trait; the variant is
/// picked from the config `type` by an [`EngineFactory`].
pub trait Engine: Send {
    /// Predict shapes for `image`.
    ///
    /// Inference failures degrade to `Ok(vec![])`; `Err` is reserved for
    /// misuse such as predicting after [`Engine::release`].
    fn predict_shapes(&mut self, image: &Arc<DynamicImage>) -> Result<Vec<Shape>>;

    /// Replace the prompt set. Engines without prompt support ignore it.
    fn set_marks(&mut self, _marks: Vec<Mark>) {}

    /// Free inference sessions and cached state.
    fn release(&mut self);

    fn capabilities(&self) -> Capabilities;

    fn supports_prompts(&self) -> bool {
        self.capabilities().supports_prompts()
    }
}

/// Builds engines from registry configs; runs on the load worker.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &ModelConfig) -> Result<Box<dyn Engine>>;
}
