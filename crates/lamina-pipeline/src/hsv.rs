//! HSV range thresholding.
//!
//! Pixels are converted to 8-bit HSV with hue halved into `0..180`, the
//! usual convention for byte-sized hue, and kept when every channel lies in
//! its inclusive `[low, high]` range.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerName};
use crate::params::{Control, LayerOptions, LayerParams, Overrides, ParamLayer};
use crate::types::{Frame, LayerError, Output};

/// Inclusive HSV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct HsvParams {
    /// Lowest hue kept, 0..180.
    #[serde(rename = "low_H")]
    pub low_h: u8,
    /// Highest hue kept.
    #[serde(rename = "high_H")]
    pub high_h: u8,
    /// Lowest saturation kept.
    #[serde(rename = "low_S")]
    pub low_s: u8,
    /// Highest saturation kept.
    #[serde(rename = "high_S")]
    pub high_s: u8,
    /// Lowest value (brightness) kept.
    #[serde(rename = "low_V")]
    pub low_v: u8,
    /// Highest value kept.
    #[serde(rename = "high_V")]
    pub high_v: u8,
}

impl Default for HsvParams {
    fn default() -> Self {
        Self {
            low_h: 0,
            high_h: 255,
            low_s: 0,
            high_s: 255,
            low_v: 0,
            high_v: 255,
        }
    }
}

impl LayerParams for HsvParams {
    fn controls() -> Vec<Control> {
        ["low_H", "high_H", "low_S", "high_S", "low_V", "high_V"]
            .into_iter()
            .map(|name| Control::new(name, 255))
            .collect()
    }
}

impl HsvParams {
    /// Whether an HSV triple lies inside every bound.
    #[must_use]
    pub const fn contains(&self, [h, s, v]: [u8; 3]) -> bool {
        self.low_h <= h
            && h <= self.high_h
            && self.low_s <= s
            && s <= self.high_s
            && self.low_v <= v
            && v <= self.high_v
    }
}

/// Convert one RGB pixel to 8-bit HSV (`H` in `0..180`).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = f32::from(v - min);
    if v == 0 {
        return [0, 0, 0];
    }
    let s = (255.0 * diff / f32::from(v)).round() as u8;
    if v == min {
        return [0, s, v];
    }

    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let mut degrees = if v == r {
        60.0 * (gf - bf) / diff
    } else if v == g {
        60.0_f32.mul_add((bf - rf) / diff, 120.0)
    } else {
        60.0_f32.mul_add((rf - gf) / diff, 240.0)
    };
    if degrees < 0.0 {
        degrees += 360.0;
    }
    let h = (degrees / 2.0).round() as u8;
    [if h >= 180 { 0 } else { h }, s, v]
}

/// Binary mask of the pixels of `frame` inside `params` (255 in, 0 out).
///
/// Gray frames are treated as `R = G = B`.
#[must_use = "returns the threshold mask"]
pub fn threshold(frame: &Frame, params: &HsvParams) -> GrayImage {
    let keep = |rgb| Luma([if params.contains(rgb_to_hsv(rgb)) { 255 } else { 0 }]);
    match frame {
        Frame::Color(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
            keep(img.get_pixel(x, y).0)
        }),
        Frame::Gray(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
            let l = img.get_pixel(x, y).0[0];
            keep([l, l, l])
        }),
    }
}

/// HSV thresholding layer; outputs a gray mask frame.
#[derive(Debug)]
pub struct HsvFilter {
    layer: ParamLayer<HsvParams>,
}

impl HsvFilter {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "HsvFilter";

    /// Create the filter, loading stored bounds.
    ///
    /// # Errors
    ///
    /// Fails for unknown or mistyped constructor overrides.
    pub fn new(options: LayerOptions) -> Result<Self, LayerError> {
        Ok(Self {
            layer: ParamLayer::open(Self::KIND, HsvParams::default(), options)?,
        })
    }

    /// Current bounds.
    #[must_use]
    pub const fn params(&self) -> &HsvParams {
        self.layer.params()
    }

    /// Threshold `frame`; `overrides` replace individual bounds for this call.
    ///
    /// # Errors
    ///
    /// Fails for bad overrides or when persisting a slider edit fails.
    pub fn filter(&mut self, frame: &Frame, overrides: &Overrides) -> Result<GrayImage, LayerError> {
        self.layer.poll_events()?;
        let params = self.layer.resolve(overrides)?;
        Ok(threshold(frame, &params))
    }
}

impl Layer for HsvFilter {
    fn name(&self) -> &LayerName {
        self.layer.name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        self.filter(&frame, overrides)
            .map(|mask| Output::Frame(Frame::Gray(mask)))
    }
}
