//! Screenshot preparation for the vision model.

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageOutputFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::ImageSize;

/// Images whose long/short side ratio reaches this bound are rejected.
pub const MAX_ASPECT_RATIO: f64 = 200.0;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("screenshot is empty")]
    Empty,

    #[error("failed to decode or encode screenshot: {0}")]
    Image(#[from] image::ImageError),

    #[error("aspect ratio {0:.1} exceeds {MAX_ASPECT_RATIO}")]
    AspectRatio(f64),
}

/// Vision processor geometry: images are snapped to multiples of
/// `patch_size * merge_size` and kept within the pixel budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProcessorConfig {
    /// Default: 14
    pub patch_size: u32,
    /// Default: 2
    pub merge_size: u32,
    /// Default: 3136
    pub min_pixels: u64,
    /// Default: 12845056
    pub max_pixels: u64,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            patch_size: 14,
            merge_size: 2,
            min_pixels: 3_136,
            max_pixels: 12_845_056,
        }
    }
}

impl ImageProcessorConfig {
    pub fn factor(&self) -> u32 {
        (self.patch_size * self.merge_size).max(1)
    }
}

/// PNG bytes plus the dimensions the model will reason in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptImage {
    pub png: Vec<u8>,
    pub size: ImageSize,
}

/// Compute the `(height, width)` a screenshot is resized to before being
/// sent to the model.
pub fn smart_resize(
    height: u32,
    width: u32,
    cfg: &ImageProcessorConfig,
) -> Result<(u32, u32), VisionError> {
    if height == 0 || width == 0 {
        return Err(VisionError::Empty);
    }
    let (h, w) = (f64::from(height), f64::from(width));
    let ratio = h.max(w) / h.min(w);
    if ratio > MAX_ASPECT_RATIO {
        return Err(VisionError::AspectRatio(ratio));
    }

    let factor = f64::from(cfg.factor());
    let round_by = |v: f64| (v / factor).round() * factor;
    let floor_by = |v: f64| (v / factor).floor() * factor;
    let ceil_by = |v: f64| (v / factor).ceil() * factor;

    let mut h_bar = factor.max(round_by(h));
    let mut w_bar = factor.max(round_by(w));
    let (min_pixels, max_pixels) = (cfg.min_pixels as f64, cfg.max_pixels as f64);

    if h_bar * w_bar > max_pixels {
        let beta = ((h * w) / max_pixels).sqrt();
        h_bar = factor.max(floor_by(h / beta));
        w_bar = factor.max(floor_by(w / beta));
    } else if h_bar * w_bar < min_pixels {
        let beta = (min_pixels / (h * w)).sqrt();
        h_bar = ceil_by(h * beta);
        w_bar = ceil_by(w * beta);
    }

    Ok((h_bar as u32, w_bar as u32))
}

/// Decode, resize and re-encode a screenshot for the next model turn.
pub fn prepare_prompt_image(
    screenshot: &[u8],
    cfg: &ImageProcessorConfig,
) -> Result<PromptImage, VisionError> {
    if screenshot.is_empty() {
        return Err(VisionError::Empty);
    }
    let decoded = image::load_from_memory(screenshot)?;
    let (height, width) = smart_resize(decoded.height(), decoded.width(), cfg)?;
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };

    let mut png = Cursor::new(Vec::new());
    resized.write_to(&mut png, ImageOutputFormat::Png)?;
    Ok(PromptImage {
        png: png.into_inner(),
        size: ImageSize::new(width, height),
    })
}
