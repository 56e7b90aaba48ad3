//! Shared types for lamina layers: frames, layer outputs, and errors.

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Re-export `GrayImage` so downstream crates can reference
/// single-channel frames without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference
/// color frames without depending on `image` directly.
pub use image::RgbImage;

/// A single 8-bit image flowing through a pipeline.
///
/// Color frames are stored in RGB channel order. Layers take frames by
/// value and return new frames; no layer mutates a caller's frame in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Single-channel intensity image (also used for binary masks).
    Gray(GrayImage),
    /// Three-channel RGB image.
    Color(RgbImage),
}

impl Frame {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Color(img) => img.width(),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Color(img) => img.height(),
        }
    }

    /// Width and height together.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Number of channels per pixel (1 or 3).
    #[must_use]
    pub const fn channels(&self) -> u8 {
        match self {
            Self::Gray(_) => 1,
            Self::Color(_) => 3,
        }
    }

    /// Returns `true` for three-channel frames.
    #[must_use]
    pub const fn is_color(&self) -> bool {
        matches!(self, Self::Color(_))
    }

    /// Luminance view of the frame.
    ///
    /// Gray frames are cloned; color frames are converted with the
    /// standard `0.299*R + 0.587*G + 0.114*B` weighting.
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Self::Gray(img) => img.clone(),
            Self::Color(img) => image::imageops::grayscale(img),
        }
    }

    /// RGB view of the frame. Gray frames are replicated into all channels.
    #[must_use]
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Self::Gray(img) => RgbImage::from_fn(img.width(), img.height(), |x, y| {
                let v = img.get_pixel(x, y).0[0];
                image::Rgb([v, v, v])
            }),
            Self::Color(img) => img.clone(),
        }
    }

    /// Consume the frame and return it as a gray frame.
    #[must_use]
    pub fn into_gray(self) -> Self {
        match self {
            Self::Gray(_) => self,
            Self::Color(img) => Self::Gray(image::imageops::grayscale(&img)),
        }
    }
}

impl From<GrayImage> for Frame {
    fn from(img: GrayImage) -> Self {
        Self::Gray(img)
    }
}

impl From<RgbImage> for Frame {
    fn from(img: RgbImage) -> Self {
        Self::Color(img)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// A detected circle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    /// Center column.
    pub x: u32,
    /// Center row.
    pub y: u32,
    /// Radius in pixels.
    pub radius: u32,
}

/// What a layer produces.
///
/// Most layers transform one frame into another. Detectors produce
/// derived data instead, which ends a chain: nothing can consume circles
/// as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A transformed frame.
    Frame(Frame),
    /// Circles found by a detector.
    Circles(Vec<Circle>),
}

impl Output {
    /// The frame, if this output is one.
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Circles(_) => None,
        }
    }

    /// Borrow the frame, if this output is one.
    #[must_use]
    pub const fn as_frame(&self) -> Option<&Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Circles(_) => None,
        }
    }

    /// Borrow the circles, if this output is a detection result.
    #[must_use]
    pub fn circles(&self) -> Option<&[Circle]> {
        match self {
            Self::Frame(_) => None,
            Self::Circles(circles) => Some(circles),
        }
    }
}

impl From<Frame> for Output {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

/// Errors raised while constructing or running a layer.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// An override named a parameter the layer does not declare.
    #[error("layer {layer} has no parameter named {key:?}")]
    UnknownParameter {
        /// Layer name.
        layer: String,
        /// Offending key.
        key: String,
    },

    /// An override or stored value did not fit the parameter's type.
    #[error("invalid parameters for layer {layer}: {source}")]
    InvalidParameter {
        /// Layer name.
        layer: String,
        /// Underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// The four ROI corners do not define a perspective transform.
    #[error("layer {layer}: region of interest corners are degenerate")]
    DegenerateRoi {
        /// Layer name.
        layer: String,
    },

    /// Sources have no upstream input and cannot transform frames.
    #[error("layer {layer} is a frame source and cannot be inferred on")]
    SourceNotInferable {
        /// Layer name.
        layer: String,
    },

    /// A nested chain produced derived data but more layers followed.
    #[error("layer {layer} produced non-frame output but is followed by more layers")]
    NotAFrame {
        /// Name of the layer whose output could not be threaded.
        layer: String,
    },

    /// Persisting parameters failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while composing or running a [`Sequential`](crate::Sequential).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Iteration was requested on a pipeline without a leading source.
    #[error("pipeline has no frame source to pull from")]
    NoSource,

    /// A source was added after the first position.
    #[error("frame source {layer} must be the first element of a pipeline")]
    MisplacedSource {
        /// Name of the rejected source.
        layer: String,
    },

    /// A layer produced derived data but further layers expected a frame.
    #[error("layer {layer} produced non-frame output but is followed by more layers")]
    NotAFrame {
        /// Name of the layer whose output could not be threaded.
        layer: String,
    },

    /// A layer failed.
    #[error(transparent)]
    Layer(#[from] LayerError),
}
