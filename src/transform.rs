//! Mappings between original-image pixels, the padded model rectangle and
//! the square encoder input.
//!
//! The encoder sees the image in two padding stages: first resized to fit
//! `max_width x max_height` and zero-padded bottom/right to exactly that
//! rectangle, then zero-padded again to the `input_size` square. Prompts go
//! forward through both stages, mask contours come back from the rectangle.

use crate::types::Point;

/// Size as `(height, width)`, matching tensor layout.
pub type Size = (u32, u32);

/// Shrink `(height, width)` to fit inside `max_width x max_height`.
///
/// Width is capped first, then height; each cap rescales the other side and
/// truncates. Images that already fit are returned unchanged.
pub fn fit_within(height: u32, width: u32, max_width: u32, max_height: u32) -> Size {
    let (mut h, mut w) = (height.max(1), width.max(1));
    if w > max_width {
        h = ((f64::from(h) * f64::from(max_width) / f64::from(w)) as u32).max(1);
        w = max_width;
    }
    if h > max_height {
        w = ((f64::from(w) * f64::from(max_height) / f64::from(h)) as u32).max(1);
        h = max_height;
    }
    (h, w)
}

/// Output size for resizing so the long side equals `long_side_length`.
pub fn preprocess_shape(old_h: u32, old_w: u32, long_side_length: u32) -> Size {
    let scale = f64::from(long_side_length) / f64::from(old_h.max(old_w).max(1));
    let new_h = (f64::from(old_h) * scale + 0.5) as u32;
    let new_w = (f64::from(old_w) * scale + 0.5) as u32;
    (new_h, new_w)
}

/// Rescale coordinates given for an image of `original_size` to the frame
/// the prompt encoder expects for `target_length`.
pub fn apply_coords(coords: &[[f64; 2]], original_size: Size, target_length: u32) -> Vec<[f64; 2]> {
    let (old_h, old_w) = original_size;
    let (new_h, new_w) = preprocess_shape(old_h, old_w, target_length);
    let sx = f64::from(new_w) / f64::from(old_w.max(1));
    let sy = f64::from(new_h) / f64::from(old_h.max(1));
    coords.iter().map(|&[x, y]| [x * sx, y * sy]).collect()
}

/// Resize/pad bookkeeping for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeTransform {
    /// Original image size.
    pub original: Size,
    /// Size after `fit_within`, before any padding.
    pub resized: Size,
    /// The padded rectangle `(max_height, max_width)`.
    pub padded: Size,
    /// Side of the square encoder input.
    pub input_size: u32,
}

impl ResizeTransform {
    pub fn new(original: Size, max_width: u32, max_height: u32, input_size: u32) -> Self {
        let (height, width) = original;
        Self {
            original,
            resized: fit_within(height, width, max_width, max_height),
            padded: (max_height, max_width),
            input_size,
        }
    }

    /// Per-axis ratios `(rw, rh)` from original to resized pixels.
    pub fn ratio(&self) -> (f64, f64) {
        let (oh, ow) = self.original;
        let (rh, rw) = self.resized;
        (
            f64::from(rw) / f64::from(ow.max(1)),
            f64::from(rh) / f64::from(oh.max(1)),
        )
    }

    /// Original pixels to padded-rectangle pixels.
    pub fn to_padded(&self, point: Point) -> Point {
        let (rw, rh) = self.ratio();
        Point::new(point.x * rw, point.y * rh)
    }

    /// Padded-rectangle pixels back to original pixels.
    pub fn to_original(&self, point: Point) -> Point {
        let (rw, rh) = self.ratio();
        Point::new(point.x / rw, point.y / rh)
    }

    /// Original pixels to the coordinate frame the decoder consumes.
    pub fn to_decoder(&self, points: &[Point]) -> Vec<[f64; 2]> {
        let padded: Vec<[f64; 2]> = points
            .iter()
            .map(|&p| {
                let p = self.to_padded(p);
                [p.x, p.y]
            })
            .collect();
        apply_coords(&padded, self.padded, self.input_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_are_not_scaled() {
        let t = ResizeTransform::new((300, 400), 1024, 1024, 1024);
        assert_eq!(t.resized, (300, 400));
        assert_eq!(t.ratio(), (1.0, 1.0));
    }

    #[test]
    fn width_cap_applies_before_height_cap() {
        // 2000x3000 (h x w): width cap -> 682x1024, height already fits.
        assert_eq!(fit_within(2000, 3000, 1024, 1024), (682, 1024));
        // 3000x2000: width cap -> 1536x1024, height cap -> 1024x682.
        assert_eq!(fit_within(3000, 2000, 1024, 1024), (1024, 682));
    }

    #[test]
    fn ratios_are_positive_and_at_most_one() {
        for &(h, w) in &[(1, 1), (5000, 10), (10, 5000), (1500, 2250), (1024, 1024)] {
            let t = ResizeTransform::new((h, w), 1024, 683, 1024);
            let (rw, rh) = t.ratio();
            assert!(rw > 0.0 && rw <= 1.0, "rw={rw} for {h}x{w}");
            assert!(rh > 0.0 && rh <= 1.0, "rh={rh} for {h}x{w}");
        }
    }

    #[test]
    fn forward_then_inverse_round_trips() {
        let sizes = [(480, 640), (3000, 4000), (4000, 3000), (17, 9000), (9000, 17)];
        let caps = [(1024, 1024), (1024, 683), (512, 800)];
        for &(h, w) in &sizes {
            for &(max_w, max_h) in &caps {
                let t = ResizeTransform::new((h, w), max_w, max_h, 1024);
                for &(x, y) in &[(0.0, 0.0), (f64::from(w - 1), f64::from(h - 1)), (f64::from(w / 3), f64::from(h / 2))] {
                    let back = t.to_original(t.to_padded(Point::new(x, y)));
                    assert!((back.x.round() - x).abs() <= 1.0);
                    assert!((back.y.round() - y).abs() <= 1.0);
                }
            }
        }
    }

    #[test]
    fn decoder_coords_follow_square_target() {
        // Padded rectangle 683x1024 into 1024 square: long side already 1024.
        let t = ResizeTransform::new((683, 1024), 1024, 683, 1024);
        let coords = t.to_decoder(&[Point::new(512.0, 300.0)]);
        assert!((coords[0][0] - 512.0).abs() < 1e-9);
        assert!((coords[0][1] - 300.0).abs() < 1e-9);

        // 512x512 rectangle into a 1024 square doubles both axes.
        let coords = apply_coords(&[[10.0, 20.0]], (512, 512), 1024);
        assert_eq!(coords, vec![[20.0, 40.0]]);
    }

    #[test]
    fn preprocess_shape_rounds_half_up() {
        assert_eq!(preprocess_shape(1500, 2250, 1024), (683, 1024));
    }
}
