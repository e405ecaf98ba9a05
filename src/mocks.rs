use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use image::DynamicImage;
use ndarray::prelude::*;

use crate::errors::{AutoLabelError, Result};
use crate::model_config::{ModelConfig, ModelType};
use crate::segment_anything::SegmentAnything;
use crate::traits::{DecoderInputs, DecoderSession, EncoderSession, Engine, EngineFactory};
use crate::transform::preprocess_shape;
use crate::types::{Action, Capabilities, Mark, Point, Shape};

/// Call counter shared between a mock and the test holding it.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Encoder returning an all-zero embedding.
#[derive(Debug, Default)]
pub struct MockEncoder {
    pub calls: CallCounter,
    pub fail: bool,
}

impl MockEncoder {
    pub fn new(calls: CallCounter) -> Self {
        Self { calls, fail: false }
    }

    pub fn failing(calls: CallCounter) -> Self {
        Self { calls, fail: true }
    }
}

impl EncoderSession for MockEncoder {
    fn encode(&mut self, tensor: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        self.calls.bump();
        if self.fail {
            return Err(AutoLabelError::prediction("encode", "mock encoder failure"));
        }
        let side = tensor.shape()[2] / 16;
        Ok(ArrayD::zeros(IxDyn(&[1, 8, side.max(1), side.max(1)])))
    }
}

/// Paints a square of positive logits around every foreground point and
/// fills every box prompt.
#[derive(Debug)]
pub struct MockDecoder {
    pub calls: CallCounter,
    pub input_size: u32,
    pub radius: f32,
}

impl MockDecoder {
    pub const fn new(calls: CallCounter, input_size: u32, radius: f32) -> Self {
        Self {
            calls,
            input_size,
            radius,
        }
    }
}

impl DecoderSession for MockDecoder {
    fn decode(&mut self, inputs: DecoderInputs<'_>) -> Result<ArrayD<f32>> {
        self.calls.bump();
        let (h, w) = (inputs.orig_im_size[0] as u32, inputs.orig_im_size[1] as u32);
        let (_, scaled_w) = preprocess_shape(h, w, self.input_size);
        let scale = scaled_w as f32 / w as f32;

        let mut logits = Array4::<f32>::from_elem((1, 1, h as usize, w as usize), -10.0);
        let mut paint = |x0: f32, y0: f32, x1: f32, y1: f32| {
            let clamp = |v: f32, hi: u32| (v.max(0.0) as usize).min(hi as usize);
            let (x0, x1) = (clamp(x0, w), clamp(x1, w));
            let (y0, y1) = (clamp(y0, h), clamp(y1, h));
            logits.slice_mut(s![0, 0, y0..y1, x0..x1]).fill(10.0);
        };

        let n = inputs.point_labels.shape()[1];
        let point = |i: usize| {
            (
                inputs.point_coords[[0, i, 0]] / scale,
                inputs.point_coords[[0, i, 1]] / scale,
            )
        };
        let mut i = 0;
        while i < n {
            match inputs.point_labels[[0, i]] {
                l if l == 1.0 => {
                    let (x, y) = point(i);
                    let r = self.radius;
                    paint(x - r, y - r, x + r, y + r);
                }
                l if l == 2.0 && i + 1 < n => {
                    let (x0, y0) = point(i);
                    let (x1, y1) = point(i + 1);
                    paint(x0, y0, x1, y1);
                    i += 1;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(logits.into_dyn())
    }
}

/// Counters shared by every engine a [`MockEngineFactory`] creates.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub created: CallCounter,
    pub released: CallCounter,
    pub predictions: CallCounter,
    pub marks_set: CallCounter,
}

/// Engine returning one fixed square polygon.
pub struct MockEngine {
    model_type: ModelType,
    stats: MockStats,
    predict_gate: Option<Receiver<()>>,
    released: bool,
    marks: Vec<Mark>,
}

impl MockEngine {
    pub fn new(model_type: ModelType, stats: MockStats) -> Self {
        Self {
            model_type,
            stats,
            predict_gate: None,
            released: false,
            marks: Vec::new(),
        }
    }
}

impl Engine for MockEngine {
    fn predict_shapes(&mut self, _image: &Arc<DynamicImage>) -> Result<Vec<Shape>> {
        if self.released {
            return Err(AutoLabelError::prediction("predict shapes", "model has been released"));
        }
        if let Some(gate) = &self.predict_gate {
            let _ = gate.recv();
        }
        self.stats.predictions.bump();
        Ok(vec![Shape::closed_polygon(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])])
    }

    fn set_marks(&mut self, marks: Vec<Mark>) {
        self.stats.marks_set.bump();
        self.marks = marks;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.released.bump();
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self.model_type {
            ModelType::SegmentAnything => Capabilities::new(SegmentAnything::ACTIONS),
            ModelType::YoloV5 | ModelType::YoloV8 => Capabilities::new([Action::Run]),
        }
    }
}

/// Engine factory whose loads and predictions can be held open by the test.
#[derive(Default)]
pub struct MockEngineFactory {
    pub stats: MockStats,
    load_gate: Option<Receiver<()>>,
    predict_gate: Option<Receiver<()>>,
    fail_names: Vec<String>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` waits for one message on `gate`.
    pub fn with_load_gate(mut self, gate: Receiver<()>) -> Self {
        self.load_gate = Some(gate);
        self
    }

    /// Every prediction waits for one message on `gate`.
    pub fn with_predict_gate(mut self, gate: Receiver<()>) -> Self {
        self.predict_gate = Some(gate);
        self
    }

    /// Loading the model called `name` fails like a missing artifact.
    pub fn failing_for(mut self, name: &str) -> Self {
        self.fail_names.push(name.to_string());
        self
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, config: &ModelConfig) -> Result<Box<dyn Engine>> {
        if let Some(gate) = &self.load_gate {
            let _ = gate.recv();
        }
        if self.fail_names.contains(&config.name) {
            return Err(AutoLabelError::model_load(
                "encoder lookup",
                format!("Encoder not found for {}", config.name),
            ));
        }
        self.stats.created.bump();
        let mut engine = MockEngine::new(config.model_type, self.stats.clone());
        engine.predict_gate = self.predict_gate.clone();
        Ok(Box::new(engine))
    }
}
