//! Mapping from prompt-image pixel space back to viewport pixels.

use pilot_core_types::Viewport;
use serde::{Deserialize, Serialize};

/// A screen position. Serialized as `[x, y]`, the shape models emit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// Pixel dimensions of the image most recently shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rescale `coord` from the last prompt image into viewport pixels.
///
/// Identity when no image size is known (or it is degenerate); otherwise each
/// axis is scaled independently by `viewport / image`.
pub fn to_viewport(coord: Point, last_image_size: Option<ImageSize>, viewport: Viewport) -> Point {
    match last_image_size {
        Some(size) if size.width > 0 && size.height > 0 => Point {
            x: coord.x * f64::from(viewport.width) / f64::from(size.width),
            y: coord.y * f64::from(viewport.height) / f64::from(size.height),
        },
        _ => coord,
    }
}
