//! lamina-pipeline: persisted, composable image processing layers.
//!
//! Every layer turns a [`Frame`] into an [`Output`] (a frame, or derived
//! data such as detected circles). Parameterized layers keep a typed,
//! JSON-persisted parameter set, keyed by their [`LayerName`], that is
//! loaded at construction and saved on every interactive edit:
//!
//! 1. [`GaussianFilter`]: Gaussian blur
//! 2. [`HsvFilter`]: HSV range threshold to a binary mask
//! 3. [`HoughCircleDetector`]: gradient Hough circle detection
//! 4. [`PolygonMask`]: keep the pixels inside a polygon
//! 5. [`RoiSelector`]: perspective warp of a quadrilateral region
//!
//! [`Sequential`] chains layers behind an optional frame [`Source`].
//!
//! With a [`DebugSurface`] a layer opens a window with one slider per
//! adjustable parameter and reacts to mouse clicks; edits are persisted
//! immediately. This crate has no windowing or capture dependencies;
//! frame sources live in `lamina-io`.

pub mod blur;
pub mod debug;
pub mod decode;
pub mod hough;
pub mod hsv;
pub mod layer;
pub mod mask;
pub mod params;
pub mod roi;
pub mod sequential;
pub mod store;
pub mod types;

pub use blur::{BlurParams, GaussianFilter};
pub use debug::{DebugSurface, HeadlessSurface, MouseButton, SharedSurface, Slider, UiEvent};
pub use decode::DecodeError;
pub use hough::{HoughCircleDetector, HoughParams};
pub use hsv::{HsvFilter, HsvParams};
pub use layer::{Identity, Layer, LayerName, Pull, Source};
pub use mask::{MaskParams, PolygonMask};
pub use params::{Control, LayerOptions, LayerParams, Overrides, ParamLayer};
pub use roi::{RoiParams, RoiSelector};
pub use sequential::{Sequential, Step};
pub use store::{ParamMap, ParamRoot, ParameterStore, StoreError};
pub use types::{Circle, Dimensions, Frame, GrayImage, LayerError, Output, PipelineError, RgbImage};
