//! The frame generator contract.

use lamina_pipeline::Frame;

/// A strategy producing color frames from one opened input.
///
/// `None` means the generator has nothing more to give, either because
/// the input ended without looping or because a read failed. The frame
/// source treats both as end of stream. Live generators never return
/// `None` on their own; they block until the next frame arrives.
pub trait Generator {
    /// Read the next frame.
    fn read(&mut self) -> Option<Frame>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn read(&mut self) -> Option<Frame> {
        (**self).read()
    }
}

/// Replays a fixed list of frames once, then ends. Used by tests and
/// by callers feeding pre-decoded frames through a [`FrameSource`](crate::FrameSource).
#[derive(Debug, Default)]
pub struct FrameList {
    frames: std::collections::VecDeque<Frame>,
}

impl FrameList {
    /// Generator over `frames`, in order.
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl Generator for FrameList {
    fn read(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}
