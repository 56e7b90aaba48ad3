//! Perspective region-of-interest selection.
//!
//! Four corners of a quadrilateral, in top-left, top-right, bottom-left,
//! bottom-right order, are mapped onto the corners of a fixed-size output
//! frame with a projective warp.

use geo::Coord;
use geo::kernels::{Kernel, Orientation, RobustKernel};
use image::{Luma, Rgb};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};

use crate::debug::{MouseButton, UiEvent};
use crate::layer::{Layer, LayerName};
use crate::params::{LayerOptions, LayerParams, Overrides, ParamLayer};
use crate::types::{Frame, GrayImage, LayerError, Output, RgbImage};

/// Color of the quad edges drawn in the debug window.
pub const EDGE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// A quadrilateral as TL, TR, BL, BR corners.
pub type Quad = [[f32; 2]; 4];

/// ROI selector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiParams {
    /// Source corners: TL, TR, BL, BR.
    pub roi: Quad,
}

impl LayerParams for RoiParams {}

/// Corners of a `width` x `height` frame in TL, TR, BL, BR order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub const fn full_frame(width: u32, height: u32) -> Quad {
    let (w, h) = (width as f32, height as f32);
    [[0.0, 0.0], [w, 0.0], [0.0, h], [w, h]]
}

/// Whether three of the four corners are collinear.
#[must_use]
pub fn is_degenerate(quad: &Quad) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let coords = quad.map(|[x, y]| Coord {
        x: f64::from(x),
        y: f64::from(y),
    });
    TRIPLES.iter().any(|&[a, b, c]| {
        RobustKernel::orient2d(coords[a], coords[b], coords[c]) == Orientation::Collinear
    })
}

/// Projection taking `quad` onto the output corners `target`.
#[must_use]
pub fn projection(quad: &Quad, target: &Quad) -> Option<Projection> {
    if is_degenerate(quad) || is_degenerate(target) {
        return None;
    }
    let points = |q: &Quad| q.map(|[x, y]| (x, y));
    Projection::from_control_points(points(quad), points(target))
}

/// Warp `frame` through `projection` into a `width` x `height` frame.
#[must_use = "returns the warped frame"]
pub fn warp(frame: &Frame, projection: &Projection, width: u32, height: u32) -> Frame {
    match frame {
        Frame::Gray(img) => {
            let mut out = GrayImage::new(width, height);
            warp_into(img, projection, Interpolation::Bilinear, Luma([0]), &mut out);
            Frame::Gray(out)
        }
        Frame::Color(img) => {
            let mut out = RgbImage::new(width, height);
            warp_into(img, projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
            Frame::Color(out)
        }
    }
}

/// Layer warping a persisted, click-editable quadrilateral to a fixed size.
#[derive(Debug)]
pub struct RoiSelector {
    layer: ParamLayer<RoiParams>,
    width: u32,
    height: u32,
    target: Quad,
    projection: Projection,
    editing: Quad,
    next_corner: usize,
}

impl RoiSelector {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "RoiSelector";

    /// Create the selector producing `width` x `height` frames. The default
    /// quad is the whole output frame.
    ///
    /// # Errors
    ///
    /// Fails for bad constructor overrides or a degenerate stored quad.
    pub fn new(width: u32, height: u32, options: LayerOptions) -> Result<Self, LayerError> {
        let target = full_frame(width, height);
        let layer = ParamLayer::open(Self::KIND, RoiParams { roi: target }, options)?;
        let roi = layer.params().roi;
        let projection = projection(&roi, &target).ok_or_else(|| LayerError::DegenerateRoi {
            layer: layer.name().to_string(),
        })?;
        Ok(Self {
            layer,
            width,
            height,
            target,
            projection,
            editing: roi,
            next_corner: 0,
        })
    }

    /// The stored quad.
    #[must_use]
    pub const fn roi(&self) -> &Quad {
        &self.layer.params().roi
    }

    /// Output size.
    #[must_use]
    pub const fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn degenerate(&self) -> LayerError {
        LayerError::DegenerateRoi {
            layer: self.layer.name().to_string(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn handle_clicks(&mut self) -> Result<(), LayerError> {
        for event in self.layer.poll_events()? {
            let UiEvent::Click {
                button: MouseButton::Left,
                x,
                y,
            } = event
            else {
                continue;
            };
            self.editing[self.next_corner] = [x as f32, y as f32];
            self.next_corner += 1;
            if self.next_corner < 4 {
                continue;
            }
            self.next_corner = 0;
            let roi = self.editing;
            self.projection = projection(&roi, &self.target).ok_or_else(|| self.degenerate())?;
            self.layer.update(|params| params.roi = roi)?;
            tracing::debug!(layer = %self.layer.name(), ?roi, "region of interest updated");
        }
        Ok(())
    }

    fn show_quad(&self, frame: &Frame) {
        let Some(surface) = self.layer.surface() else {
            return;
        };
        let mut preview = frame.to_rgb();
        for i in [0, 3] {
            for j in [1, 2] {
                let [x0, y0] = self.editing[i];
                let [x1, y1] = self.editing[j];
                draw_line_segment_mut(&mut preview, (x0, y0), (x1, y1), EDGE_COLOR);
            }
        }
        surface
            .borrow_mut()
            .show(&self.layer.name().to_string(), &Frame::Color(preview), None);
    }

    /// Warp `frame`; `overrides` may carry a `roi` for this call.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::DegenerateRoi`] when a quad admits no
    /// perspective transform, and fails for bad overrides or persistence.
    pub fn warp(&mut self, frame: &Frame, overrides: &Overrides) -> Result<Frame, LayerError> {
        self.handle_clicks()?;
        self.show_quad(frame);

        let params = self.layer.resolve(overrides)?;
        if params.roi == *self.roi() {
            return Ok(warp(frame, &self.projection, self.width, self.height));
        }
        let adhoc = projection(&params.roi, &self.target).ok_or_else(|| self.degenerate())?;
        Ok(warp(frame, &adhoc, self.width, self.height))
    }
}

impl Layer for RoiSelector {
    fn name(&self) -> &LayerName {
        self.layer.name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        self.warp(&frame, overrides).map(Output::Frame)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::debug::HeadlessSurface;
    use crate::store::ParamRoot;

    /// 20x20, black for x < 10 and white otherwise.
    fn split() -> Frame {
        Frame::Gray(GrayImage::from_fn(20, 20, |x, _| {
            Luma([if x < 10 { 0 } else { 255 }])
        }))
    }

    fn options(dir: &tempfile::TempDir) -> LayerOptions {
        LayerOptions::new("/roi").root(ParamRoot::Dir(dir.path().to_path_buf()))
    }

    fn gray(frame: Frame) -> GrayImage {
        let Frame::Gray(img) = frame else {
            unreachable!("gray in, gray out");
        };
        img
    }

    #[test]
    fn default_quad_is_full_output_frame() {
        let dir = tempfile::tempdir().unwrap();
        let roi = RoiSelector::new(20, 20, options(&dir)).unwrap();
        assert_eq!(roi.roi(), &full_frame(20, 20));
        let out = gray(roi_warp(roi, split()));
        assert_eq!(out.get_pixel(3, 10).0[0], 0);
        assert_eq!(out.get_pixel(15, 10).0[0], 255);
    }

    fn roi_warp(mut roi: RoiSelector, frame: Frame) -> Frame {
        roi.warp(&frame, &Overrides::new()).unwrap()
    }

    #[test]
    fn quad_is_mapped_onto_output_size() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(&dir).set("roi", json!([[5, 5], [15, 5], [5, 15], [15, 15]]));
        let roi = RoiSelector::new(10, 10, options).unwrap();
        let out = gray(roi_warp(roi, split()));
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(out.get_pixel(1, 5).0[0], 0);
        assert_eq!(out.get_pixel(8, 5).0[0], 255);
    }

    #[test]
    fn collinear_corners_are_degenerate() {
        assert!(is_degenerate(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [5.0, 0.0]]));
        assert!(!is_degenerate(&full_frame(4, 3)));
    }

    #[test]
    fn degenerate_override_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut roi = RoiSelector::new(10, 10, options(&dir)).unwrap();
        let overrides = Overrides::new().with("roi", json!([[0, 0], [1, 1], [2, 2], [3, 3]]));
        let err = roi.warp(&split(), &overrides).unwrap_err();
        assert!(matches!(err, LayerError::DegenerateRoi { .. }));
    }

    #[test]
    fn degenerate_stored_quad_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(&dir).set("roi", json!([[0, 0], [0, 0], [0, 0], [0, 0]]));
        assert!(matches!(
            RoiSelector::new(10, 10, options),
            Err(LayerError::DegenerateRoi { .. })
        ));
    }

    #[test]
    fn four_clicks_replace_and_persist_quad() {
        let dir = tempfile::tempdir().unwrap();
        let surface = HeadlessSurface::new().shared();
        let mut roi = RoiSelector::new(10, 10, options(&dir).debug(surface.clone())).unwrap();
        let title = roi.name().to_string();
        let corners = [(5, 5), (15, 5), (5, 15), (15, 15)];

        for &(x, y) in &corners[..3] {
            surface.borrow_mut().push_event(
                &title,
                UiEvent::Click {
                    button: MouseButton::Left,
                    x,
                    y,
                },
            );
        }
        roi.warp(&split(), &Overrides::new()).unwrap();
        assert_eq!(roi.roi(), &full_frame(10, 10), "three clicks do not commit");

        surface.borrow_mut().push_event(
            &title,
            UiEvent::Click {
                button: MouseButton::Left,
                x: 15,
                y: 15,
            },
        );
        let out = gray(roi.warp(&split(), &Overrides::new()).unwrap());
        assert_eq!(
            roi.roi(),
            &[[5.0, 5.0], [15.0, 5.0], [5.0, 15.0], [15.0, 15.0]]
        );
        assert_eq!(out.get_pixel(8, 5).0[0], 255);
        assert_eq!(surface.borrow().window(&title).unwrap().shown_count(), 2);

        let reopened = RoiSelector::new(10, 10, options(&dir)).unwrap();
        assert_eq!(reopened.roi(), roi.roi());
    }
}
