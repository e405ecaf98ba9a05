//! Prompted segmentation: encoder once per image, decoder once per prompt set.

use std::sync::Arc;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use tracing::{debug, warn};

use crate::{
    errors::{AutoLabelError, Result},
    model::{OrtDecoder, OrtEncoder},
    model_config::ModelConfig,
    polygon::mask_to_shapes,
    traits::{DecoderInputs, DecoderSession, EncoderSession, Engine},
    transform::ResizeTransform,
    types::{Action, Capabilities, Mark, Point, Shape},
};

pub const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
pub const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Side of the low-resolution mask prompt the decoder expects.
pub const MASK_INPUT_SIZE: usize = 256;

const PADDING_LABEL: f32 = -1.0;
const BOX_TOP_LEFT_LABEL: f32 = 2.0;
const BOX_BOTTOM_RIGHT_LABEL: f32 = 3.0;

/// Input geometry read from the model config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAnythingParams {
    pub input_size: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl SegmentAnythingParams {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let params = Self {
            input_size: config.param("input_size")?,
            max_width: config.param("max_width")?,
            max_height: config.param("max_height")?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.max_width == 0 || self.max_height == 0 {
            return Err(AutoLabelError::config(
                "input_size, max_width and max_height must be positive",
            ));
        }
        if self.max_width > self.input_size || self.max_height > self.input_size {
            return Err(AutoLabelError::config(format!(
                "max_width x max_height ({}x{}) must fit in input_size {}",
                self.max_width, self.max_height, self.input_size
            )));
        }
        Ok(())
    }
}

struct Sessions {
    encoder: Box<dyn EncoderSession>,
    decoder: Box<dyn DecoderSession>,
}

/// Embedding of the most recent image, keyed by `Arc` identity.
struct EmbeddingCache {
    image: Arc<DynamicImage>,
    transform: ResizeTransform,
    embedding: ArrayD<f32>,
}

pub struct SegmentAnything {
    params: SegmentAnythingParams,
    sessions: Option<Sessions>,
    marks: Vec<Mark>,
    cache: Option<EmbeddingCache>,
}

impl SegmentAnything {
    /// Every labeling action a prompted segmentation model offers.
    pub const ACTIONS: [Action; 7] = [
        Action::Run,
        Action::AddPoint,
        Action::RemovePoint,
        Action::AddRect,
        Action::Undo,
        Action::Clear,
        Action::FinishObject,
    ];

    /// Open the encoder and decoder named by `config`.
    pub fn configure(config: &ModelConfig, device_id: i32) -> Result<Self> {
        let params = SegmentAnythingParams::from_config(config)?;

        let encoder_path = config.resolve_artifact(&config.param::<String>("encoder_model_path")?);
        if !encoder_path.is_file() {
            return Err(AutoLabelError::model_load(
                "encoder lookup",
                format!("Encoder not found: {}", encoder_path.display()),
            ));
        }
        let decoder_path = config.resolve_artifact(&config.param::<String>("decoder_model_path")?);
        if !decoder_path.is_file() {
            return Err(AutoLabelError::model_load(
                "decoder lookup",
                format!("Decoder not found: {}", decoder_path.display()),
            ));
        }

        let encoder = OrtEncoder::new(&encoder_path, device_id)?;
        let decoder = OrtDecoder::new(&decoder_path, device_id)?;
        Ok(Self::with_sessions(params, Box::new(encoder), Box::new(decoder)))
    }

    pub fn with_sessions(
        params: SegmentAnythingParams,
        encoder: Box<dyn EncoderSession>,
        decoder: Box<dyn DecoderSession>,
    ) -> Self {
        Self {
            params,
            sessions: Some(Sessions { encoder, decoder }),
            marks: Vec::new(),
            cache: None,
        }
    }

    pub const fn params(&self) -> SegmentAnythingParams {
        self.params
    }

    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    fn run_pipeline(
        params: SegmentAnythingParams,
        sessions: &mut Sessions,
        cache: &mut Option<EmbeddingCache>,
        marks: &[Mark],
        image: &Arc<DynamicImage>,
    ) -> Result<Vec<Shape>> {
        let entry = match cache.take() {
            Some(entry) if Arc::ptr_eq(&entry.image, image) => entry,
            _ => {
                let (width, height) = image.dimensions();
                let transform = ResizeTransform::new(
                    (height, width),
                    params.max_width,
                    params.max_height,
                    params.input_size,
                );
                let tensor = preprocess(&image.to_rgb8(), &transform)?;
                debug!("Encoding {}x{} image", width, height);
                let embedding = sessions.encoder.encode(tensor.view())?;
                EmbeddingCache {
                    image: Arc::clone(image),
                    transform,
                    embedding,
                }
            }
        };
        let entry = cache.insert(entry);

        let inputs = decoder_inputs(marks, &entry.transform, entry.embedding.view())?;
        let logits = sessions.decoder.decode(inputs)?;
        let mask = threshold_mask(logits, entry.transform.padded)?;
        Ok(mask_to_shapes(mask.view(), &entry.transform))
    }
}

impl Engine for SegmentAnything {
    fn predict_shapes(&mut self, image: &Arc<DynamicImage>) -> Result<Vec<Shape>> {
        let Self {
            params,
            sessions,
            marks,
            cache,
        } = self;
        let Some(sessions) = sessions.as_mut() else {
            return Err(AutoLabelError::prediction(
                "predict shapes",
                "model has been released",
            ));
        };

        match Self::run_pipeline(*params, sessions, cache, marks, image) {
            Ok(shapes) => Ok(shapes),
            Err(e) => {
                warn!("Could not inference model: {}", e.user_message());
                Ok(Vec::new())
            }
        }
    }

    fn set_marks(&mut self, marks: Vec<Mark>) {
        self.marks = marks;
    }

    fn release(&mut self) {
        self.sessions = None;
        self.cache = None;
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new(Self::ACTIONS)
    }
}

/// Resize into the padded rectangle, normalize, and pad to the input square.
///
/// The rectangle padding is applied before normalization, so it holds
/// `-mean / std`; only the square padding is exactly zero.
pub fn preprocess(image: &RgbImage, transform: &ResizeTransform) -> Result<Array4<f32>> {
    let (resized_h, resized_w) = transform.resized;
    let (padded_h, padded_w) = transform.padded;
    let size = transform.input_size as usize;

    let resized = imageops::resize(image, resized_w, resized_h, FilterType::Triangle);
    let mut padded: RgbImage = ImageBuffer::from_pixel(padded_w, padded_h, Rgb([0, 0, 0]));
    imageops::overlay(&mut padded, &resized, 0, 0);

    let pixels = padded.as_ndarray3();
    let (ph, pw) = (padded_h as usize, padded_w as usize);
    if ph > size || pw > size {
        return Err(AutoLabelError::prediction(
            "preprocess",
            format!("padded image {pw}x{ph} exceeds input size {size}"),
        ));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for c in 0..3 {
        let (mean, std) = (PIXEL_MEAN[c], PIXEL_STD[c]);
        tensor
            .slice_mut(s![0, c, ..ph, ..pw])
            .assign(&pixels.slice(s![c, .., ..]).mapv(|v| (f32::from(v) - mean) / std));
    }
    Ok(tensor)
}

/// Assemble decoder inputs; points are followed by the `(0, 0)` padding point.
pub fn decoder_inputs<'a>(
    marks: &[Mark],
    transform: &ResizeTransform,
    image_embeddings: ArrayViewD<'a, f32>,
) -> Result<DecoderInputs<'a>> {
    let mut points = Vec::with_capacity(marks.len() + 1);
    let mut labels = Vec::with_capacity(marks.len() + 1);
    for mark in marks {
        match *mark {
            Mark::Point { data: [x, y], label } => {
                points.push(Point::new(x, y));
                labels.push(label.decoder_value());
            }
            Mark::Rectangle {
                data: [x1, y1, x2, y2],
            } => {
                points.push(Point::new(x1.min(x2), y1.min(y2)));
                labels.push(BOX_TOP_LEFT_LABEL);
                points.push(Point::new(x1.max(x2), y1.max(y2)));
                labels.push(BOX_BOTTOM_RIGHT_LABEL);
            }
        }
    }
    if points.is_empty() {
        return Err(AutoLabelError::prediction(
            "prompt assembly",
            "no point or rectangle marks",
        ));
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(AutoLabelError::prediction(
            "prompt assembly",
            "mark coordinates must be finite",
        ));
    }

    let mut coords = transform.to_decoder(&points);
    coords.push([0.0, 0.0]);
    labels.push(PADDING_LABEL);

    let n = coords.len();
    let flat = coords
        .iter()
        .flat_map(|&[x, y]| [x as f32, y as f32])
        .collect::<Vec<_>>();
    let (padded_h, padded_w) = transform.padded;

    Ok(DecoderInputs {
        image_embeddings,
        point_coords: Array3::from_shape_vec((1, n, 2), flat)?,
        point_labels: Array2::from_shape_vec((1, n), labels)?,
        mask_input: Array4::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE)),
        has_mask_input: Array1::zeros(1),
        orig_im_size: Array1::from(vec![padded_h as f32, padded_w as f32]),
    })
}

/// Strict `> 0` on raw logits, reshaped to the padded rectangle.
pub fn threshold_mask(logits: ArrayD<f32>, padded: (u32, u32)) -> Result<Array2<bool>> {
    let (height, width) = padded;
    let logits = logits
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((height as usize, width as usize))?;
    Ok(logits.mapv(|v| v > 0.0))
}
