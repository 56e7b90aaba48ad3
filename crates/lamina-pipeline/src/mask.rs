//! Polygon mask: keep only the pixels inside a closed contour.
//!
//! The contour is rasterized with `tiny-skia` into a binary mask that is
//! cached until the frame size or the contour changes. Contours with fewer
//! than three vertices leave frames untouched.
//!
//! In debug mode the contour is edited with the mouse in the layer window:
//! a left click appends a vertex and a right click clears the contour.
//! Every edit is persisted.

use geo::BoundingRect;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::debug::{MouseButton, UiEvent};
use crate::layer::{Layer, LayerName};
use crate::params::{LayerOptions, LayerParams, Overrides, ParamLayer};
use crate::types::{Frame, LayerError, Output};

/// Outline color drawn in the debug window.
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Per-call flag that suppresses the debug display.
pub const SHOW_FLAG: &str = "show";

/// Polygon mask parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskParams {
    /// Closed polygon vertices as `[x, y]` pixel coordinates.
    pub contour: Vec<[i32; 2]>,
}

impl LayerParams for MaskParams {}

/// Rasterize a closed polygon into a `width` x `height` binary mask.
///
/// Vertices sit on pixel centers and the boundary is included. Returns
/// `None` for fewer than three vertices or an empty frame.
#[must_use = "returns the rasterized mask"]
#[allow(clippy::cast_precision_loss)]
pub fn rasterize(contour: &[[i32; 2]], width: u32, height: u32) -> Option<GrayImage> {
    if contour.len() < 3 {
        return None;
    }

    let mut pb = PathBuilder::new();
    let center = |v: i32| v as f32 + 0.5;
    let [x0, y0] = contour[0];
    pb.move_to(center(x0), center(y0));
    for &[x, y] in &contour[1..] {
        pb.line_to(center(x), center(y));
    }
    pb.close();
    let path = pb.finish()?;

    let mut pixmap = Pixmap::new(width, height)?;
    let mut paint = Paint::default();
    paint.set_color_rgba8(255, 255, 255, 255);
    paint.anti_alias = false;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    pixmap.stroke_path(&path, &paint, &Stroke::default(), Transform::identity(), None);

    let data = pixmap.data();
    Some(GrayImage::from_fn(width, height, |x, y| {
        let alpha = data[((y * width + x) * 4 + 3) as usize];
        Luma([if alpha > 0 { 255 } else { 0 }])
    }))
}

/// Zero every pixel of `frame` where `mask` is zero.
#[must_use = "returns the masked frame"]
pub fn apply_mask(frame: Frame, mask: &GrayImage) -> Frame {
    let inside = |x: u32, y: u32| mask.get_pixel_checked(x, y).is_some_and(|p| p.0[0] > 0);
    match frame {
        Frame::Gray(mut img) => {
            for (x, y, pixel) in img.enumerate_pixels_mut() {
                if !inside(x, y) {
                    *pixel = Luma([0]);
                }
            }
            Frame::Gray(img)
        }
        Frame::Color(mut img) => {
            for (x, y, pixel) in img.enumerate_pixels_mut() {
                if !inside(x, y) {
                    *pixel = Rgb([0, 0, 0]);
                }
            }
            Frame::Color(img)
        }
    }
}

/// Crop `frame` to the inclusive bounding rectangle of `contour`.
#[must_use = "returns the cropped frame"]
#[allow(clippy::cast_sign_loss)]
pub fn clip_to_contour(frame: &Frame, contour: &[[i32; 2]]) -> Frame {
    let line: geo::LineString<i32> = contour.iter().map(|&[x, y]| (x, y)).collect();
    let Some(rect) = line.bounding_rect() else {
        return frame.clone();
    };
    let x = rect.min().x.max(0) as u32;
    let y = rect.min().y.max(0) as u32;
    let right = ((rect.max().x + 1).max(0) as u32).min(frame.width());
    let bottom = ((rect.max().y + 1).max(0) as u32).min(frame.height());
    let (w, h) = (right.saturating_sub(x), bottom.saturating_sub(y));
    match frame {
        Frame::Gray(img) => Frame::Gray(image::imageops::crop_imm(img, x, y, w, h).to_image()),
        Frame::Color(img) => Frame::Color(image::imageops::crop_imm(img, x, y, w, h).to_image()),
    }
}

/// Draw the closed contour outline, two pixels wide.
#[allow(clippy::cast_precision_loss)]
fn draw_outline(target: &mut RgbImage, contour: &[[i32; 2]]) {
    for (i, &[x0, y0]) in contour.iter().enumerate() {
        let [x1, y1] = contour[(i + 1) % contour.len()];
        for offset in [0.0, 1.0] {
            draw_line_segment_mut(
                target,
                (x0 as f32 + offset, y0 as f32),
                (x1 as f32 + offset, y1 as f32),
                OUTLINE_COLOR,
            );
        }
    }
}

#[derive(Debug)]
struct CachedMask {
    width: u32,
    height: u32,
    contour: Vec<[i32; 2]>,
    mask: Option<GrayImage>,
}

/// Layer masking frames with a persisted, mouse-editable polygon.
#[derive(Debug)]
pub struct PolygonMask {
    layer: ParamLayer<MaskParams>,
    auto_clip: bool,
    cache: Option<CachedMask>,
}

impl PolygonMask {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "PolygonMask";

    /// Create the mask layer. With `auto_clip`, non-debug output is cropped
    /// to the contour's bounding rectangle.
    ///
    /// # Errors
    ///
    /// Fails for unknown or mistyped constructor overrides.
    pub fn new(auto_clip: bool, options: LayerOptions) -> Result<Self, LayerError> {
        Ok(Self {
            layer: ParamLayer::open(Self::KIND, MaskParams::default(), options)?,
            auto_clip,
            cache: None,
        })
    }

    /// The stored contour.
    #[must_use]
    pub fn contour(&self) -> &[[i32; 2]] {
        &self.layer.params().contour
    }

    fn handle_clicks(&mut self) -> Result<(), LayerError> {
        for event in self.layer.poll_events()? {
            let UiEvent::Click { button, x, y } = event else {
                continue;
            };
            self.layer.update(|params| match button {
                MouseButton::Left => params.contour.push([x, y]),
                MouseButton::Right => params.contour.clear(),
            })?;
            tracing::debug!(layer = %self.layer.name(), vertices = self.contour().len(), "contour edited");
        }
        Ok(())
    }

    fn cached_mask(&mut self, width: u32, height: u32, contour: &[[i32; 2]]) -> Option<&GrayImage> {
        let stale = self.cache.as_ref().is_none_or(|c| {
            c.width != width || c.height != height || c.contour != contour
        });
        if stale {
            self.cache = Some(CachedMask {
                width,
                height,
                contour: contour.to_vec(),
                mask: rasterize(contour, width, height),
            });
        }
        self.cache.as_ref().and_then(|c| c.mask.as_ref())
    }

    /// Mask `frame`.
    ///
    /// `overrides` may carry a `contour` for this call (an empty one falls
    /// back to the stored contour) and a boolean `show` flag that suppresses
    /// the debug display when `false`.
    ///
    /// # Errors
    ///
    /// Fails for bad overrides or when persisting a contour edit fails.
    pub fn mask(&mut self, frame: Frame, overrides: &Overrides) -> Result<Frame, LayerError> {
        self.handle_clicks()?;

        let mut overrides = overrides.clone();
        let show = overrides.take(SHOW_FLAG).and_then(|v| v.as_bool()).unwrap_or(true);
        let params = self.layer.resolve(&overrides)?;
        let contour = if params.contour.is_empty() {
            self.contour().to_vec()
        } else {
            params.contour.clone()
        };

        if show && let Some(surface) = self.layer.surface() {
            let mut preview = frame.to_rgb();
            draw_outline(&mut preview, &contour);
            surface
                .borrow_mut()
                .show(&self.layer.name().to_string(), &Frame::Color(preview), None);
        }

        let (width, height) = (frame.width(), frame.height());
        let debug = self.layer.is_debug();
        let auto_clip = self.auto_clip;
        let Some(mask) = self.cached_mask(width, height, &contour) else {
            return Ok(frame);
        };
        let masked = apply_mask(frame, mask);
        if auto_clip && !debug {
            return Ok(clip_to_contour(&masked, &contour));
        }
        Ok(masked)
    }
}

impl Layer for PolygonMask {
    fn name(&self) -> &LayerName {
        self.layer.name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        self.mask(frame, overrides).map(Output::Frame)
    }
}

/// JSON form of a contour, for per-call overrides.
#[must_use]
pub fn contour_value(contour: &[[i32; 2]]) -> Value {
    Value::from(
        contour
            .iter()
            .map(|&[x, y]| Value::from(vec![x, y]))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::debug::HeadlessSurface;
    use crate::store::ParamRoot;

    const SQUARE: [[i32; 2]; 4] = [[2, 2], [7, 2], [7, 7], [2, 7]];

    fn white(w: u32, h: u32) -> Frame {
        Frame::Gray(GrayImage::from_pixel(w, h, Luma([200])))
    }

    fn options(dir: &tempfile::TempDir) -> LayerOptions {
        LayerOptions::new("/poly").root(ParamRoot::Dir(dir.path().to_path_buf()))
    }

    #[test]
    fn rasterize_needs_three_vertices() {
        assert!(rasterize(&[[0, 0], [5, 5]], 10, 10).is_none());
        assert!(rasterize(&SQUARE, 0, 10).is_none());
    }

    #[test]
    fn rasterized_square_covers_interior_only() {
        let mask = rasterize(&SQUARE, 10, 10).unwrap();
        assert_eq!(mask.get_pixel(4, 4).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(9, 9).0[0], 0);
    }

    #[test]
    fn short_contour_passes_frame_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = PolygonMask::new(false, options(&dir)).unwrap();
        let out = layer.mask(white(10, 10), &Overrides::new()).unwrap();
        assert_eq!(out, white(10, 10));
    }

    #[test]
    fn pixels_outside_contour_are_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = PolygonMask::new(false, options(&dir)).unwrap();
        let overrides = Overrides::new().with("contour", contour_value(&SQUARE));
        let Frame::Gray(out) = layer.mask(white(10, 10), &overrides).unwrap() else {
            unreachable!("gray in, gray out");
        };
        assert_eq!(out.get_pixel(4, 4).0[0], 200);
        assert_eq!(out.get_pixel(0, 9).0[0], 0);
        assert!(layer.contour().is_empty(), "override must not be stored");
    }

    #[test]
    fn color_frames_are_masked_per_channel() {
        let mask = rasterize(&SQUARE, 10, 10).unwrap();
        let frame = Frame::Color(RgbImage::from_pixel(10, 10, Rgb([10, 20, 30])));
        let Frame::Color(out) = apply_mask(frame, &mask) else {
            unreachable!("color in, color out");
        };
        assert_eq!(out.get_pixel(4, 4).0, [10, 20, 30]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn auto_clip_crops_to_bounding_rect() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(&dir).set("contour", contour_value(&SQUARE));
        let mut layer = PolygonMask::new(true, options).unwrap();
        let out = layer.mask(white(10, 10), &Overrides::new()).unwrap();
        assert_eq!((out.width(), out.height()), (6, 6));
    }

    #[test]
    fn clicks_edit_and_persist_contour() {
        let dir = tempfile::tempdir().unwrap();
        let surface = HeadlessSurface::new().shared();
        let mut layer = PolygonMask::new(true, options(&dir).debug(surface.clone())).unwrap();
        let title = layer.name().to_string();
        for &[x, y] in &SQUARE[..3] {
            surface.borrow_mut().push_event(
                &title,
                UiEvent::Click {
                    button: MouseButton::Left,
                    x,
                    y,
                },
            );
        }
        let out = layer.mask(white(10, 10), &Overrides::new()).unwrap();
        assert_eq!(layer.contour(), &SQUARE[..3]);
        assert_eq!((out.width(), out.height()), (10, 10), "no clipping in debug mode");
        assert_eq!(surface.borrow().window(&title).unwrap().shown_count(), 1);

        let reopened = PolygonMask::new(false, options(&dir)).unwrap();
        assert_eq!(reopened.contour(), &SQUARE[..3]);

        surface.borrow_mut().push_event(
            &title,
            UiEvent::Click {
                button: MouseButton::Right,
                x: 0,
                y: 0,
            },
        );
        layer
            .mask(white(10, 10), &Overrides::new().with(SHOW_FLAG, false))
            .unwrap();
        assert!(layer.contour().is_empty());
        assert_eq!(surface.borrow().window(&title).unwrap().shown_count(), 1);
    }

    #[test]
    fn debug_preview_draws_red_outline() {
        let dir = tempfile::tempdir().unwrap();
        let surface = HeadlessSurface::new().shared();
        let options = options(&dir)
            .set("contour", contour_value(&SQUARE))
            .debug(surface.clone());
        let mut layer = PolygonMask::new(false, options).unwrap();
        layer.mask(white(10, 10), &Overrides::new()).unwrap();
        let surface = surface.borrow();
        let shown = surface
            .window(&layer.name().to_string())
            .and_then(|w| w.last_shown())
            .unwrap();
        let Frame::Color(preview) = shown else {
            unreachable!("preview is color");
        };
        assert_eq!(*preview.get_pixel(4, 2), OUTLINE_COLOR);
    }
}
