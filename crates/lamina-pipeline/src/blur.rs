//! Gaussian blur layer.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. Parameters follow the
//! kernel-size convention of the common vision libraries: an odd `ksize`
//! and an integer `sigma`, where a zero sigma is derived from the kernel
//! size. `ksize` is clamped so the kernel never exceeds half the shorter
//! image side.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerName};
use crate::params::{Control, LayerOptions, LayerParams, Overrides, ParamLayer};
use crate::types::{Frame, LayerError, Output, RgbImage};

/// Gaussian blur parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlurParams {
    /// Kernel size (odd). Values of 1 or less disable the blur.
    pub ksize: u32,
    /// Standard deviation; 0 derives it from `ksize`.
    pub sigma: u32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self { ksize: 5, sigma: 0 }
    }
}

impl LayerParams for BlurParams {
    fn controls() -> Vec<Control> {
        vec![
            Control::new("ksize", 255).with_adjust(odd_kernel),
            Control::new("sigma", 255),
        ]
    }
}

/// Slider position to kernel size: even positions round down, 0 becomes 1.
const fn odd_kernel(position: i64) -> i64 {
    if position > 0 {
        position - (position + 1) % 2
    } else {
        1
    }
}

/// Effective odd kernel size for a `width` x `height` frame.
#[must_use]
pub const fn clamp_kernel(ksize: u32, width: u32, height: u32) -> u32 {
    let half = if width < height { width } else { height } / 2;
    let cap = half.saturating_sub((half + 1) % 2);
    let ksize = if ksize < cap { ksize } else { cap };
    ksize.saturating_sub((ksize + 1) % 2)
}

/// Sigma derived from an odd kernel size when none is given.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sigma_for_kernel(ksize: u32) -> f32 {
    0.3_f32.mul_add((ksize as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Apply Gaussian blur to an RGB image by blurring each channel
/// independently.
///
/// Non-positive sigma values return the image unchanged.
#[must_use = "returns the blurred RGB image"]
pub fn gaussian_blur_rgb(image: &RgbImage, sigma: f32) -> RgbImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    let (w, h) = (image.width(), image.height());

    let channels: [GrayImage; 3] = std::array::from_fn(|c| {
        GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]))
    });
    let blurred: [GrayImage; 3] =
        std::array::from_fn(|c| imageproc::filter::gaussian_blur_f32(&channels[c], sigma));

    RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([
            blurred[0].get_pixel(x, y).0[0],
            blurred[1].get_pixel(x, y).0[0],
            blurred[2].get_pixel(x, y).0[0],
        ])
    })
}

/// Blur `frame` with `params`, clamping the kernel to the frame size.
#[must_use = "returns the blurred frame"]
pub fn blur_frame(frame: &Frame, params: &BlurParams) -> Frame {
    let ksize = clamp_kernel(params.ksize, frame.width(), frame.height());
    if ksize <= 1 {
        return frame.clone();
    }
    #[allow(clippy::cast_precision_loss)]
    let sigma = if params.sigma > 0 {
        params.sigma as f32
    } else {
        sigma_for_kernel(ksize)
    };
    match frame {
        Frame::Gray(img) => Frame::Gray(gaussian_blur(img, sigma)),
        Frame::Color(img) => Frame::Color(gaussian_blur_rgb(img, sigma)),
    }
}

/// Gaussian blur layer with persisted `ksize` and `sigma`.
#[derive(Debug)]
pub struct GaussianFilter {
    layer: ParamLayer<BlurParams>,
}

impl GaussianFilter {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "GaussianFilter";

    /// Create the filter, loading stored parameters.
    ///
    /// # Errors
    ///
    /// Fails for unknown or mistyped constructor overrides.
    pub fn new(options: LayerOptions) -> Result<Self, LayerError> {
        Ok(Self {
            layer: ParamLayer::open(Self::KIND, BlurParams::default(), options)?,
        })
    }

    /// Current parameters.
    #[must_use]
    pub const fn params(&self) -> &BlurParams {
        self.layer.params()
    }

    /// Blur `frame` with the stored parameters and `overrides`.
    ///
    /// # Errors
    ///
    /// Fails for bad overrides or when persisting a slider edit fails.
    pub fn filter(&mut self, frame: &Frame, overrides: &Overrides) -> Result<Frame, LayerError> {
        self.layer.poll_events()?;
        let params = self.layer.resolve(overrides)?;
        Ok(blur_frame(frame, &params))
    }
}

impl Layer for GaussianFilter {
    fn name(&self) -> &LayerName {
        self.layer.name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        self.filter(&frame, overrides).map(Output::Frame)
    }
}
