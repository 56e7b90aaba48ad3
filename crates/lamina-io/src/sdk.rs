//! Frames from a device SDK that exposes its latest color frame.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lamina_pipeline::{Frame, RgbImage};

use crate::error::SourceError;
use crate::generator::Generator;
use crate::registry::{GeneratorFactory, SourceId};

/// A BGRA color frame as delivered by a depth-camera runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFrame {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Packed BGRA pixels, row-major, no padding.
    pub bgra: Vec<u8>,
}

impl ColorFrame {
    /// Convert to an RGB frame, or `None` if the buffer size is wrong.
    #[must_use]
    pub fn to_frame(&self) -> Option<Frame> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.bgra.len() != expected || expected == 0 {
            return None;
        }
        let rgb = self
            .bgra
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        RgbImage::from_raw(self.width, self.height, rgb).map(Frame::Color)
    }
}

/// Access to a device runtime's most recent color frame.
pub trait ColorFrameProvider: Send + Sync {
    /// The last color frame received, if any.
    fn last_color_frame(&self) -> Option<ColorFrame>;
}

/// Opaque handle to a [`ColorFrameProvider`], usable as a source id.
#[derive(Clone)]
pub struct SdkHandle(pub Arc<dyn ColorFrameProvider>);

impl fmt::Debug for SdkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SdkHandle(..)")
    }
}

/// Delay between polls while the provider has no usable frame.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls a provider for its last color frame.
///
/// A device stream never ends on its own: `read` blocks until the
/// provider hands over a frame of the right size.
pub struct SdkGenerator {
    provider: Arc<dyn ColorFrameProvider>,
}

impl SdkGenerator {
    /// Generator reading from `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn ColorFrameProvider>) -> Self {
        Self { provider }
    }
}

impl Generator for SdkGenerator {
    fn read(&mut self) -> Option<Frame> {
        let mut warned = false;
        loop {
            if let Some(color) = self.provider.last_color_frame() {
                if let Some(frame) = color.to_frame() {
                    return Some(frame);
                }
                if !warned {
                    tracing::warn!(
                        width = color.width,
                        height = color.height,
                        len = color.bgra.len(),
                        "color frame size mismatch"
                    );
                    warned = true;
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Factory for [`SdkGenerator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SdkFactory;

impl GeneratorFactory for SdkFactory {
    fn kind(&self) -> &'static str {
        "sdk"
    }

    fn probe(&self, id: &SourceId) -> bool {
        matches!(id, SourceId::Sdk(_))
    }

    fn open(&self, id: &SourceId, _looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        match id {
            SourceId::Sdk(handle) => Ok(Box::new(SdkGenerator::new(Arc::clone(&handle.0)))),
            other => Err(SourceError::Open {
                id: other.to_string(),
                reason: "not an SDK handle".to_owned(),
            }),
        }
    }
}
