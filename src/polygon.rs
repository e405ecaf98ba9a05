//! Binary mask to polygon annotations.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point as GridPoint;
use ndarray::ArrayView2;

use crate::transform::ResizeTransform;
use crate::types::{Point, Shape};

/// Douglas-Peucker tolerance as a fraction of the contour's closed arc length.
pub const SIMPLIFY_RATIO: f64 = 0.001;

/// Extract closed polygons from `mask`, laid out in the padded rectangle.
///
/// Only the resized image area of the mask is traced; holes are ignored and
/// every disjoint region yields its own polygon.
pub fn mask_to_shapes(mask: ArrayView2<bool>, transform: &ResizeTransform) -> Vec<Shape> {
    let image = crop_to_image_area(mask, transform);
    trace_outer_polygons(&image)
        .into_iter()
        .map(|polygon| {
            let points = polygon
                .into_iter()
                .map(|p| to_original_pixel(p, transform))
                .collect();
            Shape::closed_polygon(points)
        })
        .collect()
}

fn crop_to_image_area(mask: ArrayView2<bool>, transform: &ResizeTransform) -> GrayImage {
    let (mask_h, mask_w) = mask.dim();
    let (resized_h, resized_w) = transform.resized;
    let height = (resized_h as usize).min(mask_h) as u32;
    let width = (resized_w as usize).min(mask_w) as u32;
    GrayImage::from_fn(width, height, |x, y| {
        if mask[[y as usize, x as usize]] {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Simplified outer contours of the foreground, as open vertex lists.
fn trace_outer_polygons(image: &GrayImage) -> Vec<Vec<GridPoint<i32>>> {
    find_contours::<i32>(image)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| simplify(&c.points))
        .collect()
}

fn simplify(points: &[GridPoint<i32>]) -> Option<Vec<GridPoint<i32>>> {
    if points.len() < 3 {
        return None;
    }
    let epsilon = SIMPLIFY_RATIO * arc_length(points, true);
    if epsilon <= 0.0 {
        return None;
    }
    let mut approx = approximate_polygon_dp(points, epsilon, true);
    approx.dedup();
    while approx.len() > 1 && approx.first() == approx.last() {
        approx.pop();
    }
    (approx.len() >= 3).then_some(approx)
}

fn to_original_pixel(point: GridPoint<i32>, transform: &ResizeTransform) -> Point {
    let (height, width) = transform.original;
    let p = transform.to_original(Point::new(f64::from(point.x), f64::from(point.y)));
    Point::new(
        p.x.floor().clamp(0.0, f64::from(width.saturating_sub(1))),
        p.y.floor().clamp(0.0, f64::from(height.saturating_sub(1))),
    )
}
