//! The frame source: a pipeline's leading layer.
//!
//! A [`FrameSource`] wraps a [`Generator`] and adds what every capture
//! loop needs: exit keys polled from the debug surface, a live preview
//! window with an FPS readout, and an optional frame-rate cap.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use lamina_pipeline::debug::{KEY_ESCAPE, KEY_Q};
use lamina_pipeline::{
    Frame, Layer, LayerError, LayerName, Output, Overrides, Pull, SharedSurface, Source,
};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::SourceError;
use crate::generator::Generator;
use crate::registry::{GeneratorRegistry, SourceId};

/// Timestamps kept for the FPS estimate.
const FPS_WINDOW: usize = 5;

/// How long each pull waits for a key press.
const KEY_POLL: Duration = Duration::from_millis(1);

/// Frame source behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Label used in the layer name and window title.
    pub label: String,
    /// Key codes that end the stream.
    pub exit_keys: Vec<i32>,
    /// Upper bound on frames per second; `0` disables the cap.
    pub max_fps: f64,
    /// Show each frame in a preview window.
    pub show_video: bool,
    /// Overlay the measured frame rate on the preview.
    pub show_fps: bool,
    /// Restart finite inputs at their end.
    #[serde(rename = "loop")]
    pub looping: bool,
    /// Convert frames to a single gray channel.
    pub gray: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            label: "default".to_owned(),
            exit_keys: vec![KEY_ESCAPE, KEY_Q],
            max_fps: 0.0,
            show_video: false,
            show_fps: false,
            looping: false,
            gray: false,
        }
    }
}

/// A [`Source`] layer reading frames from a [`Generator`].
pub struct FrameSource<C: Clock = SystemClock> {
    name: LayerName,
    options: SourceOptions,
    generator: Box<dyn Generator>,
    surface: Option<SharedSurface>,
    clock: C,
    exhausted: bool,
    previous: Option<Frame>,
    timestamps: VecDeque<Duration>,
    last_key: Option<i32>,
}

impl<C: Clock> fmt::Debug for FrameSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSource")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("exhausted", &self.exhausted)
            .field("last_key", &self.last_key)
            .finish_non_exhaustive()
    }
}

impl FrameSource {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "FrameSource";

    /// Open `id` with the standard generator registry.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoGenerator`] for unrecognized identifiers
    /// and the generator's error if opening fails.
    pub fn open(id: impl Into<SourceId>, options: SourceOptions) -> Result<Self, SourceError> {
        Self::open_with(&GeneratorRegistry::standard(), id, options)
    }

    /// Open `id` with a custom registry.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with(
        registry: &GeneratorRegistry,
        id: impl Into<SourceId>,
        options: SourceOptions,
    ) -> Result<Self, SourceError> {
        let id = id.into();
        let generator = registry.open(&id, options.looping)?;
        let source = Self::from_boxed(generator, options);
        tracing::info!(name = %source.name, source = %id, "frame source opened");
        Ok(source)
    }

    /// Wrap an already opened generator.
    pub fn from_generator(generator: impl Generator + 'static, options: SourceOptions) -> Self {
        Self::from_boxed(Box::new(generator), options)
    }

    fn from_boxed(generator: Box<dyn Generator>, options: SourceOptions) -> Self {
        Self {
            name: LayerName::new(Self::KIND, &options.label),
            options,
            generator,
            surface: None,
            clock: SystemClock::new(),
            exhausted: false,
            previous: None,
            timestamps: VecDeque::with_capacity(FPS_WINDOW),
            last_key: None,
        }
    }
}

impl<C: Clock> FrameSource<C> {
    /// Attach a debug surface for key polling and the preview window.
    #[must_use]
    pub fn with_surface(mut self, surface: SharedSurface) -> Self {
        if self.options.show_video {
            surface.borrow_mut().create_window(&self.name.to_string());
        }
        self.surface = Some(surface);
        self
    }

    /// Replace the clock used for rate limiting.
    pub fn with_clock<D: Clock>(self, clock: D) -> FrameSource<D> {
        FrameSource {
            name: self.name,
            options: self.options,
            generator: self.generator,
            surface: self.surface,
            clock,
            exhausted: self.exhausted,
            previous: self.previous,
            timestamps: self.timestamps,
            last_key: self.last_key,
        }
    }

    /// The source's options.
    #[must_use]
    pub const fn options(&self) -> &SourceOptions {
        &self.options
    }

    /// The key returned by the most recent poll, if any.
    #[must_use]
    pub const fn last_pressed_key(&self) -> Option<i32> {
        self.last_key
    }

    /// Returns `true` once the stream has ended.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pull one frame, converting to gray when `gray` is set regardless of
    /// the configured option.
    pub fn read(&mut self, gray: bool) -> Pull {
        if self.exhausted {
            return Pull::EndOfStream;
        }

        let frame = self
            .generator
            .read()
            .map(|frame| if gray { frame.into_gray() } else { frame });

        self.last_key = self
            .surface
            .as_ref()
            .and_then(|surface| surface.borrow_mut().wait_key(KEY_POLL));
        let exit = self
            .last_key
            .is_some_and(|key| self.options.exit_keys.contains(&key));

        let Some(frame) = frame.filter(|_| !exit) else {
            tracing::debug!(name = %self.name, key = ?self.last_key, "frame source exhausted");
            self.exhausted = true;
            return Pull::EndOfStream;
        };

        if self.options.show_video {
            self.show_previous(&frame);
        }
        self.throttle();
        self.stamp();
        Pull::Frame(frame)
    }

    fn show_previous(&mut self, current: &Frame) {
        let Some(surface) = &self.surface else {
            return;
        };
        if let Some(previous) = &self.previous {
            let overlay = if self.options.show_fps {
                self.fps().map(|fps| format!("FPS: {}", fps.round()))
            } else {
                None
            };
            surface
                .borrow_mut()
                .show(&self.name.to_string(), previous, overlay.as_deref());
        }
        self.previous = Some(current.clone());
    }

    /// Frames per second over the timestamp window, once it is full.
    #[must_use]
    pub fn fps(&self) -> Option<f64> {
        if self.timestamps.len() < FPS_WINDOW {
            return None;
        }
        let first = self.timestamps.front()?;
        let last = self.timestamps.back()?;
        let span = last.saturating_sub(*first).as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let frames = (FPS_WINDOW - 1) as f64;
        (span > 0.0).then(|| frames / span)
    }

    fn throttle(&self) {
        if self.options.max_fps <= 0.0 {
            return;
        }
        let Some(last) = self.timestamps.back() else {
            return;
        };
        let elapsed = self.clock.now().saturating_sub(*last);
        let Ok(period) = Duration::try_from_secs_f64(1.0 / self.options.max_fps) else {
            tracing::debug!(
                max_fps = self.options.max_fps,
                "frame period out of range, not capping"
            );
            return;
        };
        if let Some(wait) = period.checked_sub(elapsed).filter(|w| !w.is_zero()) {
            self.clock.sleep(wait);
        }
    }

    fn stamp(&mut self) {
        if self.timestamps.len() == FPS_WINDOW {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(self.clock.now());
    }
}

impl<C: Clock> Layer for FrameSource<C> {
    fn name(&self) -> &LayerName {
        &self.name
    }

    fn infer_with(&mut self, _frame: Frame, _overrides: &Overrides) -> Result<Output, LayerError> {
        Err(LayerError::SourceNotInferable {
            layer: self.name.to_string(),
        })
    }

    fn is_source(&self) -> bool {
        true
    }
}

impl<C: Clock> Source for FrameSource<C> {
    fn pull(&mut self) -> Pull {
        self.read(self.options.gray)
    }
}

impl<C: Clock> Iterator for FrameSource<C> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.pull().into_frame()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::rc::Rc;

    use lamina_pipeline::{GrayImage, HeadlessSurface, RgbImage};

    use super::*;
    use crate::clock::ManualClock;
    use crate::generator::FrameList;
    use crate::still::ImageGenerator;

    fn still() -> Frame {
        Frame::Color(RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 10])))
    }

    fn numbered(n: u8) -> Vec<Frame> {
        (0..n)
            .map(|v| Frame::Gray(GrayImage::from_pixel(1, 1, image::Luma([v]))))
            .collect()
    }

    #[test]
    fn still_image_without_loop_yields_once() {
        let mut source = FrameSource::from_generator(
            ImageGenerator::from_frame(still(), false),
            SourceOptions::default(),
        );
        assert!(matches!(source.pull(), Pull::Frame(_)));
        assert_eq!(source.pull(), Pull::EndOfStream);
        assert_eq!(source.pull(), Pull::EndOfStream);
        assert!(source.is_exhausted());
    }

    #[test]
    fn looping_image_runs_until_exit_key() {
        let surface = HeadlessSurface::new().shared();
        let options = SourceOptions {
            looping: true,
            ..SourceOptions::default()
        };
        let mut source =
            FrameSource::from_generator(ImageGenerator::from_frame(still(), true), options)
                .with_surface(surface.clone());

        for _ in 0..20 {
            assert!(matches!(source.pull(), Pull::Frame(_)));
        }
        surface.borrow_mut().push_key(i32::from(b'x'));
        assert!(matches!(source.pull(), Pull::Frame(_)));
        assert_eq!(source.last_pressed_key(), Some(i32::from(b'x')));

        surface.borrow_mut().push_key(KEY_Q);
        assert_eq!(source.pull(), Pull::EndOfStream);
        assert_eq!(source.last_pressed_key(), Some(KEY_Q));
    }

    #[test]
    fn gray_option_converts_frames() {
        let options = SourceOptions {
            gray: true,
            ..SourceOptions::default()
        };
        let mut source =
            FrameSource::from_generator(ImageGenerator::from_frame(still(), false), options);
        assert!(matches!(source.pull(), Pull::Frame(Frame::Gray(_))));
    }

    #[test]
    fn read_overrides_gray_option() {
        let mut source = FrameSource::from_generator(
            ImageGenerator::from_frame(still(), true),
            SourceOptions::default(),
        );
        assert!(matches!(source.read(true), Pull::Frame(Frame::Gray(_))));
        assert!(matches!(source.read(false), Pull::Frame(Frame::Color(_))));
    }

    #[test]
    fn rate_limit_spaces_frames() {
        let clock = Rc::new(ManualClock::new());
        let options = SourceOptions {
            max_fps: 10.0,
            ..SourceOptions::default()
        };
        let mut source = FrameSource::from_generator(FrameList::new(numbered(4)), options)
            .with_clock(Rc::clone(&clock));

        let mut stamps = Vec::new();
        while source.next().is_some() {
            stamps.push(clock.now());
            clock.advance(Duration::from_millis(30));
        }
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(clock.sleep_count(), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(210));
    }

    #[test]
    fn no_cap_never_sleeps() {
        let clock = Rc::new(ManualClock::new());
        let mut source =
            FrameSource::from_generator(FrameList::new(numbered(10)), SourceOptions::default())
                .with_clock(Rc::clone(&clock));
        assert_eq!(source.by_ref().count(), 10);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn slow_production_is_not_delayed() {
        let clock = Rc::new(ManualClock::new());
        let options = SourceOptions {
            max_fps: 10.0,
            ..SourceOptions::default()
        };
        let mut source = FrameSource::from_generator(FrameList::new(numbered(3)), options)
            .with_clock(Rc::clone(&clock));
        while source.next().is_some() {
            clock.advance(Duration::from_millis(150));
        }
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn tiny_cap_does_not_sleep_forever() {
        let clock = Rc::new(ManualClock::new());
        let options: SourceOptions = serde_json::from_str(r#"{"max_fps": 1e-300}"#).unwrap();
        let mut source = FrameSource::from_generator(FrameList::new(numbered(3)), options)
            .with_clock(Rc::clone(&clock));
        assert_eq!(source.by_ref().count(), 3);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn fps_readout_is_rounded() {
        let surface = HeadlessSurface::new().shared();
        let clock = Rc::new(ManualClock::new());
        let options = SourceOptions {
            label: "/rounded".to_owned(),
            show_video: true,
            show_fps: true,
            ..SourceOptions::default()
        };
        let mut source = FrameSource::from_generator(FrameList::new(numbered(7)), options)
            .with_surface(surface.clone())
            .with_clock(Rc::clone(&clock));

        // 4 frames over 204 ms is 19.6 FPS.
        assert!(matches!(source.pull(), Pull::Frame(_)));
        for _ in 0..5 {
            clock.advance(Duration::from_millis(51));
            assert!(matches!(source.pull(), Pull::Frame(_)));
        }
        let surface_ref = surface.borrow();
        let window = surface_ref.window("FrameSource_rounded").unwrap();
        assert_eq!(window.last_overlay(), Some("FPS: 20"));
    }

    #[test]
    fn preview_shows_previous_frame_with_fps() {
        let surface = HeadlessSurface::new().shared();
        let clock = Rc::new(ManualClock::new());
        let options = SourceOptions {
            label: "/preview".to_owned(),
            show_video: true,
            show_fps: true,
            ..SourceOptions::default()
        };
        let mut source = FrameSource::from_generator(FrameList::new(numbered(7)), options)
            .with_surface(surface.clone())
            .with_clock(Rc::clone(&clock));

        let title = "FrameSource_preview";
        assert!(matches!(source.pull(), Pull::Frame(_)));
        assert_eq!(surface.borrow().window(title).unwrap().shown_count(), 0);

        for _ in 0..5 {
            clock.advance(Duration::from_millis(50));
            assert!(matches!(source.pull(), Pull::Frame(_)));
        }
        let surface_ref = surface.borrow();
        let window = surface_ref.window(title).unwrap();
        assert_eq!(window.shown_count(), 5);
        let Some(Frame::Gray(shown)) = window.last_shown() else {
            unreachable!("gray frames were shown");
        };
        assert_eq!(shown.get_pixel(0, 0).0[0], 4);
        assert_eq!(window.last_overlay(), Some("FPS: 20"));
    }

    #[test]
    fn sources_cannot_infer() {
        let mut source =
            FrameSource::from_generator(FrameList::new(numbered(1)), SourceOptions::default());
        assert!(source.is_source());
        let err = source
            .infer(Frame::Gray(GrayImage::new(1, 1)))
            .unwrap_err();
        assert!(matches!(err, LayerError::SourceNotInferable { .. }));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: SourceOptions =
            serde_json::from_str(r#"{"loop": true, "max_fps": 30}"#).unwrap();
        assert!(options.looping);
        assert!((options.max_fps - 30.0).abs() < f64::EPSILON);
        assert_eq!(options.exit_keys, [27, 113]);
        assert_eq!(options.label, "default");
    }
}
