//! Hough circle detection (gradient method).
//!
//! Canny edge pixels ([`imageproc::edges::canny`]) vote for circle centers along
//! their Sobel gradient direction, once per candidate radius. Accumulator
//! cells above `param2` that are local maxima become center candidates;
//! they are accepted strongest-first, skipping any within `dist` of an
//! already accepted center, and each accepted center takes the radius with
//! the densest edge support.

use std::borrow::Cow;

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerName};
use crate::params::{Control, LayerOptions, LayerParams, Overrides, ParamLayer};
use crate::types::{Circle, Frame, LayerError, Output};

/// Profile color used by [`HoughCircleDetector::render`].
pub const PROFILE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Center marker color used by [`HoughCircleDetector::render`].
pub const CENTER_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Hough circle detection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoughParams {
    /// Minimum distance between detected centers.
    pub dist: u32,
    /// Upper Canny threshold (the lower one is half of it).
    pub param1: u32,
    /// Accumulator threshold for center candidates.
    pub param2: u32,
    /// Smallest radius searched.
    #[serde(rename = "minRadius")]
    pub min_radius: i32,
    /// Largest radius searched; zero or negative means the image size.
    #[serde(rename = "maxRadius")]
    pub max_radius: i32,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            dist: 10,
            param1: 100,
            param2: 48,
            min_radius: 12,
            max_radius: 25,
        }
    }
}

impl LayerParams for HoughParams {
    fn controls() -> Vec<Control> {
        vec![
            Control::new("dist", 1024),
            Control::new("param1", 1024),
            Control::new("param2", 1024),
            Control::new("minRadius", 1024),
            Control::new("maxRadius", 1024),
        ]
    }
}

/// Find circles in a grayscale image.
#[must_use = "returns the detected circles"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn hough_circles(gray: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let high = params.param1.max(1) as f32;
    let edges = imageproc::edges::canny(gray, high / 2.0, high);
    let gx = imageproc::gradients::horizontal_sobel(gray);
    let gy = imageproc::gradients::vertical_sobel(gray);

    let min_r = params.min_radius.max(0);
    let max_r = if params.max_radius <= 0 {
        width.max(height) as i32
    } else {
        params.max_radius.max(min_r)
    };

    let (w, h) = (width as i32, height as i32);
    let mut accumulator = vec![0_u32; (width * height) as usize];
    let mut edge_points = Vec::new();

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        let magnitude = dx.hypot(dy);
        if magnitude == 0.0 {
            continue;
        }
        edge_points.push((x as i32, y as i32));
        let (ux, uy) = (dx / magnitude, dy / magnitude);

        for r in min_r..=max_r {
            for sign in [-1.0_f32, 1.0] {
                let step = sign * r as f32;
                let cx = (ux.mul_add(step, x as f32)).round() as i32;
                let cy = (uy.mul_add(step, y as f32)).round() as i32;
                if (0..w).contains(&cx) && (0..h).contains(&cy) {
                    accumulator[(cy * w + cx) as usize] += 1;
                }
            }
        }
    }

    let mut candidates = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = (y * w + x) as usize;
            let votes = accumulator[i];
            let row = w as usize;
            if votes > params.param2
                && votes > accumulator[i - 1]
                && votes >= accumulator[i + 1]
                && votes > accumulator[i - row]
                && votes >= accumulator[i + row]
            {
                candidates.push((x, y, votes));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.cmp(&a.2));

    let min_dist_sq = f64::from(params.dist.max(1)).powi(2);
    let mut circles: Vec<Circle> = Vec::new();
    for (cx, cy, _) in candidates {
        let too_close = circles.iter().any(|c| {
            let dx = f64::from(c.x) - f64::from(cx);
            let dy = f64::from(c.y) - f64::from(cy);
            dx.mul_add(dx, dy * dy) < min_dist_sq
        });
        if too_close {
            continue;
        }
        if let Some(radius) = best_radius(cx, cy, &edge_points, min_r, max_r) {
            circles.push(Circle {
                x: cx as u32,
                y: cy as u32,
                radius: radius as u32,
            });
        }
    }
    circles
}

/// The radius in `[min_r, max_r]` with the most edge support per unit
/// circumference around `(cx, cy)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn best_radius(cx: i32, cy: i32, edge_points: &[(i32, i32)], min_r: i32, max_r: i32) -> Option<i32> {
    let bins = (max_r - min_r + 1) as usize;
    let mut support = vec![0_u32; bins];
    for &(x, y) in edge_points {
        let d = f64::from(x - cx).hypot(f64::from(y - cy)).round() as i32;
        if (min_r..=max_r).contains(&d) {
            support[(d - min_r) as usize] += 1;
        }
    }

    let mut best: Option<(i32, f64)> = None;
    for (offset, &count) in support.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let r = min_r + offset as i32;
        let score = f64::from(count) / f64::from(r.max(1));
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((r, score));
        }
    }
    best.map(|(r, _)| r)
}

/// Layer wrapping [`hough_circles`] with persisted parameters.
#[derive(Debug)]
pub struct HoughCircleDetector {
    layer: ParamLayer<HoughParams>,
}

impl HoughCircleDetector {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "HoughCircleDetector";

    /// Create the detector, loading stored parameters.
    ///
    /// # Errors
    ///
    /// Fails for unknown or mistyped constructor overrides.
    pub fn new(options: LayerOptions) -> Result<Self, LayerError> {
        Ok(Self {
            layer: ParamLayer::open(Self::KIND, HoughParams::default(), options)?,
        })
    }

    /// Current parameters.
    #[must_use]
    pub const fn params(&self) -> &HoughParams {
        self.layer.params()
    }

    /// Detect circles in `frame`; color frames are converted to gray.
    ///
    /// # Errors
    ///
    /// Fails for bad overrides or when persisting a debug edit fails.
    pub fn detect(&mut self, frame: &Frame, overrides: &Overrides) -> Result<Vec<Circle>, LayerError> {
        self.layer.poll_events()?;
        let params = self.layer.resolve(overrides)?;
        let gray = match frame {
            Frame::Gray(img) => Cow::Borrowed(img),
            Frame::Color(_) => Cow::Owned(frame.to_gray()),
        };
        Ok(hough_circles(&gray, &params))
    }

    /// Draw circle outlines and center markers onto `target`.
    #[allow(clippy::cast_possible_wrap)]
    pub fn render(target: &mut RgbImage, circles: &[Circle], draw_center: bool, draw_profile: bool) {
        for circle in circles {
            let center = (circle.x as i32, circle.y as i32);
            let radius = circle.radius as i32;
            if draw_profile {
                draw_hollow_circle_mut(target, center, radius, PROFILE_COLOR);
                if radius > 1 {
                    draw_hollow_circle_mut(target, center, radius - 1, PROFILE_COLOR);
                }
            }
            if draw_center {
                draw_filled_circle_mut(target, center, 2, CENTER_COLOR);
            }
        }
    }
}

impl Layer for HoughCircleDetector {
    fn name(&self) -> &LayerName {
        self.layer.name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        self.detect(&frame, overrides).map(Output::Circles)
    }
}
