use std::sync::Arc;

use image::{DynamicImage, RgbImage};

use autolabel_rs::mocks::{CallCounter, MockDecoder, MockEncoder};
use autolabel_rs::{Engine, Mark, MarkLabel, SegmentAnything, SegmentAnythingParams, Shape};

const PARAMS: SegmentAnythingParams = SegmentAnythingParams {
    input_size: 64,
    max_width: 64,
    max_height: 32,
};

struct Harness {
    engine: SegmentAnything,
    encoder_calls: CallCounter,
    decoder_calls: CallCounter,
}

fn harness(encoder_fails: bool) -> Harness {
    let encoder_calls = CallCounter::default();
    let decoder_calls = CallCounter::default();
    let encoder = if encoder_fails {
        MockEncoder::failing(encoder_calls.clone())
    } else {
        MockEncoder::new(encoder_calls.clone())
    };
    let decoder = MockDecoder::new(decoder_calls.clone(), PARAMS.input_size, 4.0);
    Harness {
        engine: SegmentAnything::with_sessions(PARAMS, Box::new(encoder), Box::new(decoder)),
        encoder_calls,
        decoder_calls,
    }
}

/// 128x64 image; downscaled by half into the 64x32 model rectangle.
fn image() -> Arc<DynamicImage> {
    Arc::new(DynamicImage::ImageRgb8(RgbImage::new(128, 64)))
}

fn assert_inside(shapes: &[Shape], width: f64, height: f64) {
    for shape in shapes {
        assert!(shape.closed);
        assert!(shape.points.len() >= 4);
        assert_eq!(shape.points.first(), shape.points.last());
        for p in &shape.points {
            assert!(p.x >= 0.0 && p.x < width, "x out of range: {:?}", p);
            assert!(p.y >= 0.0 && p.y < height, "y out of range: {:?}", p);
        }
    }
}

#[test]
fn same_image_is_encoded_once() {
    let mut h = harness(false);
    let image = image();

    h.engine
        .set_marks(vec![Mark::point(64.0, 32.0, MarkLabel::Positive)]);
    assert_eq!(h.engine.predict_shapes(&image).unwrap().len(), 1);

    h.engine
        .set_marks(vec![Mark::point(20.0, 20.0, MarkLabel::Positive)]);
    assert_eq!(h.engine.predict_shapes(&image).unwrap().len(), 1);

    assert_eq!(h.encoder_calls.get(), 1);
    assert_eq!(h.decoder_calls.get(), 2);

    // Same pixels, different allocation: encoded again.
    let copy = Arc::new(image.as_ref().clone());
    h.engine.predict_shapes(&copy).unwrap();
    assert_eq!(h.encoder_calls.get(), 2);
}

#[test]
fn shapes_are_in_original_pixels() {
    let mut h = harness(false);
    h.engine
        .set_marks(vec![Mark::point(64.0, 32.0, MarkLabel::Positive)]);
    let shapes = h.engine.predict_shapes(&image()).unwrap();
    assert_eq!(shapes.len(), 1);
    assert_inside(&shapes, 128.0, 64.0);

    // The painted square spans 8 model pixels, so about 16 original pixels.
    let xs: Vec<f64> = shapes[0].points.iter().map(|p| p.x).collect();
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!(min_x >= 50.0 && max_x <= 76.0, "{min_x}..{max_x}");
    assert!(max_x - min_x >= 10.0);
}

#[test]
fn masks_touching_the_edge_stay_inside_the_image() {
    let mut h = harness(false);
    h.engine
        .set_marks(vec![Mark::point(127.0, 63.0, MarkLabel::Positive)]);
    let shapes = h.engine.predict_shapes(&image()).unwrap();
    assert_eq!(shapes.len(), 1);
    assert_inside(&shapes, 128.0, 64.0);
}

#[test]
fn two_boxes_yield_two_polygons() {
    let mut h = harness(false);
    h.engine.set_marks(vec![
        Mark::rectangle(4.0, 4.0, 30.0, 30.0),
        Mark::rectangle(120.0, 60.0, 80.0, 20.0),
    ]);
    let shapes = h.engine.predict_shapes(&image()).unwrap();
    assert_eq!(shapes.len(), 2);
    assert_inside(&shapes, 128.0, 64.0);
    assert!(shapes.iter().all(|s| s.label == Shape::UNKNOWN_LABEL));
}

#[test]
fn background_points_alone_select_nothing() {
    let mut h = harness(false);
    h.engine
        .set_marks(vec![Mark::point(64.0, 32.0, MarkLabel::Negative)]);
    assert!(h.engine.predict_shapes(&image()).unwrap().is_empty());
    assert_eq!(h.decoder_calls.get(), 1);
}

#[test]
fn pipeline_failures_degrade_to_no_shapes() {
    // No marks at all.
    let mut h = harness(false);
    assert!(h.engine.predict_shapes(&image()).unwrap().is_empty());
    assert_eq!(h.decoder_calls.get(), 0);

    // Encoder error.
    let mut h = harness(true);
    h.engine
        .set_marks(vec![Mark::point(64.0, 32.0, MarkLabel::Positive)]);
    assert!(h.engine.predict_shapes(&image()).unwrap().is_empty());
    assert_eq!(h.encoder_calls.get(), 1);
}

#[test]
fn released_engine_refuses_to_predict() {
    let mut h = harness(false);
    h.engine
        .set_marks(vec![Mark::point(64.0, 32.0, MarkLabel::Positive)]);
    h.engine.release();
    assert!(h.engine.predict_shapes(&image()).is_err());
    assert_eq!(h.encoder_calls.get(), 0);
}
