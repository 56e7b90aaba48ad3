//! Interactive debug surface: windows, sliders, mouse clicks, key presses.
//!
//! Layers created with a debug surface open one window titled by their
//! layer name, register a slider per adjustable parameter, and drain the
//! window's pending [`UiEvent`]s at the top of each inference. The frame
//! source polls the same surface for key presses to decide when to stop.
//!
//! The surface is shared by every layer of a pipeline on a single thread,
//! so it is handed around as [`SharedSurface`].
//!
//! [`HeadlessSurface`] is the bundled implementation. It keeps everything
//! in memory, replays scripted events and keys, and can dump every shown
//! frame to PNG files for offline inspection.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::types::Frame;

/// Key code of the Escape key.
pub const KEY_ESCAPE: i32 = 27;

/// Key code of the `q` key.
pub const KEY_Q: i32 = b'q' as i32;

/// A debug surface shared between the layers of one pipeline.
pub type SharedSurface = Rc<RefCell<dyn DebugSurface>>;

/// Mouse buttons reported by click events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Primary button.
    Left,
    /// Secondary button.
    Right,
}

/// An input event delivered to a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A slider was moved to `value`.
    Slider {
        /// Slider (parameter) name.
        name: String,
        /// New position.
        value: i64,
    },
    /// A mouse button was pressed at pixel `(x, y)`.
    Click {
        /// Which button.
        button: MouseButton,
        /// Column.
        x: i32,
        /// Row.
        y: i32,
    },
}

/// A bounded integer control attached to a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slider {
    /// Parameter name.
    pub name: String,
    /// Initial position.
    pub value: i64,
    /// Upper bound (the lower bound is always 0).
    pub max: i64,
}

/// Windowing backend used by debug-enabled layers and frame sources.
pub trait DebugSurface {
    /// Create (or reuse) a window with the given title.
    fn create_window(&mut self, title: &str);

    /// Attach a slider to a window.
    fn add_slider(&mut self, window: &str, slider: Slider);

    /// Display a frame in a window, optionally with a text overlay.
    fn show(&mut self, window: &str, frame: &Frame, overlay: Option<&str>);

    /// Take every event queued for `window` since the last poll.
    fn poll_events(&mut self, window: &str) -> Vec<UiEvent>;

    /// Wait up to `delay` for a key press and return its code.
    fn wait_key(&mut self, delay: Duration) -> Option<i32>;
}

/// State of one headless window.
#[derive(Debug, Default)]
pub struct WindowState {
    sliders: Vec<Slider>,
    pending: VecDeque<UiEvent>,
    last_shown: Option<Frame>,
    last_overlay: Option<String>,
    shown_count: usize,
}

impl WindowState {
    /// Sliders registered on this window, in registration order.
    #[must_use]
    pub fn sliders(&self) -> &[Slider] {
        &self.sliders
    }

    /// The most recently shown frame.
    #[must_use]
    pub const fn last_shown(&self) -> Option<&Frame> {
        self.last_shown.as_ref()
    }

    /// The overlay text of the most recent `show`.
    #[must_use]
    pub fn last_overlay(&self) -> Option<&str> {
        self.last_overlay.as_deref()
    }

    /// How many frames have been shown in this window.
    #[must_use]
    pub const fn shown_count(&self) -> usize {
        self.shown_count
    }
}

/// In-memory [`DebugSurface`] driven by scripted events.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    windows: BTreeMap<String, WindowState>,
    keys: VecDeque<i32>,
    dump_dir: Option<PathBuf>,
}

impl HeadlessSurface {
    /// Empty surface with no dump directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every shown frame as `<dir>/<window>_<n>.png`.
    #[must_use]
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Wrap the surface for sharing between layers.
    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    /// Queue an event for `window`, creating the window if needed.
    pub fn push_event(&mut self, window: &str, event: UiEvent) {
        self.windows
            .entry(window.to_owned())
            .or_default()
            .pending
            .push_back(event);
    }

    /// Queue a key press returned by a later [`wait_key`](DebugSurface::wait_key).
    pub fn push_key(&mut self, key: i32) {
        self.keys.push_back(key);
    }

    /// Look up a window by title.
    #[must_use]
    pub fn window(&self, title: &str) -> Option<&WindowState> {
        self.windows.get(title)
    }

    /// Titles of every window created so far.
    pub fn window_titles(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    fn dump(&self, window: &str, index: usize, frame: &Frame) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let file = format!("{}_{index:06}.png", window.replace(['/', '\\'], "_"));
        let path = dir.join(file);
        let result = std::fs::create_dir_all(dir)
            .map_err(image::ImageError::IoError)
            .and_then(|()| match frame {
                Frame::Gray(img) => img.save(&path),
                Frame::Color(img) => img.save(&path),
            });
        if let Err(err) = result {
            tracing::warn!(path = %path.display(), %err, "failed to dump debug frame");
        }
    }
}

impl DebugSurface for HeadlessSurface {
    fn create_window(&mut self, title: &str) {
        self.windows.entry(title.to_owned()).or_default();
    }

    fn add_slider(&mut self, window: &str, slider: Slider) {
        tracing::trace!(window, slider = %slider.name, max = slider.max, "slider registered");
        self.windows
            .entry(window.to_owned())
            .or_default()
            .sliders
            .push(slider);
    }

    fn show(&mut self, window: &str, frame: &Frame, overlay: Option<&str>) {
        let state = self.windows.entry(window.to_owned()).or_default();
        state.last_shown = Some(frame.clone());
        state.last_overlay = overlay.map(str::to_owned);
        state.shown_count += 1;
        let index = state.shown_count;
        self.dump(window, index, frame);
    }

    fn poll_events(&mut self, window: &str) -> Vec<UiEvent> {
        self.windows
            .get_mut(window)
            .map(|state| state.pending.drain(..).collect())
            .unwrap_or_default()
    }

    fn wait_key(&mut self, _delay: Duration) -> Option<i32> {
        self.keys.pop_front()
    }
}
