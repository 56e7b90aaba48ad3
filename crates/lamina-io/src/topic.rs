//! In-process publish/subscribe bus for image messages.
//!
//! Producers on any thread publish [`ImageMessage`]s to a named topic.
//! Each subscriber owns a [`FrameQueue`] holding at most
//! [`QUEUE_CAPACITY`] decoded frames; a full queue drops its oldest frame
//! so the producer never blocks. [`TopicGenerator`] blocks on its queue
//! until a frame arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use lamina_pipeline::{Frame, GrayImage, RgbImage};
use parking_lot::{Condvar, Mutex};

use crate::error::SourceError;
use crate::generator::Generator;
use crate::registry::{GeneratorFactory, SourceId};

/// Frames buffered per subscriber.
pub const QUEUE_CAPACITY: usize = 3;

/// A raw image as carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMessage {
    /// Pixel encoding, e.g. `"bgr8"` or `"mono16"`.
    pub encoding: String,
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Byte order of 16-bit samples.
    pub is_bigendian: bool,
    /// Row-major pixel data; rows may be padded.
    pub data: Vec<u8>,
}

/// Channel layout of a supported encoding.
#[derive(Debug, Clone, Copy)]
struct Layout {
    channels: usize,
    bytes_per_sample: usize,
    /// Source channel index feeding each output R, G, B.
    order: [usize; 3],
}

impl Layout {
    const fn for_encoding(encoding: &str) -> Option<Self> {
        let (channels, bytes_per_sample, order) = match encoding.as_bytes() {
            b"mono8" => (1, 1, [0, 0, 0]),
            b"mono16" => (1, 2, [0, 0, 0]),
            b"rgb8" => (3, 1, [0, 1, 2]),
            b"bgr8" => (3, 1, [2, 1, 0]),
            b"rgba8" => (4, 1, [0, 1, 2]),
            b"bgra8" => (4, 1, [2, 1, 0]),
            b"rgb16" => (3, 2, [0, 1, 2]),
            b"bgr16" => (3, 2, [2, 1, 0]),
            _ => return None,
        };
        Some(Self {
            channels,
            bytes_per_sample,
            order,
        })
    }
}

impl ImageMessage {
    /// Convert the message to a frame. Single-channel encodings become
    /// gray frames; 16-bit samples keep their high byte.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnsupportedEncoding`] for unknown encodings
    /// and [`SourceError::MalformedMessage`] when `data` is too short for
    /// the declared size.
    pub fn to_frame(&self) -> Result<Frame, SourceError> {
        let layout =
            Layout::for_encoding(&self.encoding).ok_or_else(|| SourceError::UnsupportedEncoding {
                encoding: self.encoding.clone(),
            })?;

        let (width, height) = (self.width as usize, self.height as usize);
        let pixel = layout.channels * layout.bytes_per_sample;
        if width == 0 || height == 0 {
            return Err(SourceError::MalformedMessage("empty image".to_owned()));
        }
        let step = self.data.len() / height;
        if step < width * pixel {
            return Err(SourceError::MalformedMessage(format!(
                "{} bytes cannot hold {}x{} {}",
                self.data.len(),
                self.width,
                self.height,
                self.encoding
            )));
        }

        // Offset of the most significant byte within one sample.
        let high = if layout.bytes_per_sample == 2 && !self.is_bigendian {
            1
        } else {
            0
        };
        let sample = |x: usize, y: usize, channel: usize| {
            self.data[y * step + x * pixel + channel * layout.bytes_per_sample + high]
        };

        let frame = if layout.channels == 1 {
            let mut img = GrayImage::new(self.width, self.height);
            for (x, y, p) in img.enumerate_pixels_mut() {
                p.0 = [sample(x as usize, y as usize, 0)];
            }
            Frame::Gray(img)
        } else {
            let mut img = RgbImage::new(self.width, self.height);
            for (x, y, p) in img.enumerate_pixels_mut() {
                let (x, y) = (x as usize, y as usize);
                p.0 = layout.order.map(|c| sample(x, y, c));
            }
            Frame::Color(img)
        };
        Ok(frame)
    }
}

/// Bounded frame queue shared between a producer and one consumer.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    ready: Condvar,
}

impl FrameQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `frame`, dropping the oldest frame if full.
    pub fn push(&self, frame: Frame) {
        let mut frames = self.frames.lock();
        if frames.len() >= QUEUE_CAPACITY {
            frames.pop_front();
            tracing::trace!("topic queue full, dropped oldest frame");
        }
        frames.push_back(frame);
        drop(frames);
        self.ready.notify_one();
    }

    /// Dequeue the oldest frame, blocking until one is available.
    pub fn pop(&self) -> Frame {
        let mut frames = self.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return frame;
            }
            self.ready.wait(&mut frames);
        }
    }

    /// Dequeue the oldest frame, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut frames = self.frames.lock();
        if frames.is_empty() {
            let _ = self.ready.wait_for(&mut frames, timeout);
        }
        frames.pop_front()
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns `true` if no frames are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

/// Named topics and their subscribers.
///
/// Cloning shares the same bus.
#[derive(Debug, Clone, Default)]
pub struct TopicBus {
    topics: Arc<Mutex<HashMap<String, Vec<Weak<FrameQueue>>>>>,
}

impl TopicBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus used by [`TopicFactory::default`].
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<TopicBus> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Declare `topic` so that subscribers can find it.
    pub fn advertise(&self, topic: &str) {
        self.topics.lock().entry(topic.to_owned()).or_default();
    }

    /// Returns `true` if `topic` has been advertised.
    #[must_use]
    pub fn is_advertised(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Attach a new queue to `topic`, advertising it if needed.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> Arc<FrameQueue> {
        let queue = Arc::new(FrameQueue::new());
        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push(Arc::downgrade(&queue));
        queue
    }

    /// Decode `message` and deliver it to every live subscriber of
    /// `topic`. Returns the number of queues reached.
    ///
    /// # Errors
    ///
    /// See [`ImageMessage::to_frame`]. Nothing is delivered on error.
    pub fn publish(&self, topic: &str, message: &ImageMessage) -> Result<usize, SourceError> {
        let mut topics = self.topics.lock();
        let subscribers = topics.entry(topic.to_owned()).or_default();
        subscribers.retain(|q| q.strong_count() > 0);
        if subscribers.is_empty() {
            return Ok(0);
        }
        let frame = message.to_frame()?;
        let live: Vec<Arc<FrameQueue>> = subscribers.iter().filter_map(Weak::upgrade).collect();
        drop(topics);
        for queue in &live {
            queue.push(frame.clone());
        }
        Ok(live.len())
    }
}

/// Frames from a bus topic.
#[derive(Debug)]
pub struct TopicGenerator {
    queue: Arc<FrameQueue>,
}

impl TopicGenerator {
    /// Subscribe to `topic` on `bus`.
    #[must_use]
    pub fn subscribe(bus: &TopicBus, topic: &str) -> Self {
        tracing::debug!(topic, "subscribed");
        Self {
            queue: bus.subscribe(topic),
        }
    }
}

impl Generator for TopicGenerator {
    fn read(&mut self) -> Option<Frame> {
        Some(self.queue.pop())
    }
}

/// Factory for [`TopicGenerator`]: accepts any advertised topic name.
#[derive(Debug, Clone)]
pub struct TopicFactory {
    bus: TopicBus,
}

impl TopicFactory {
    /// Factory bound to `bus`.
    #[must_use]
    pub const fn new(bus: TopicBus) -> Self {
        Self { bus }
    }
}

impl Default for TopicFactory {
    fn default() -> Self {
        Self::new(TopicBus::global().clone())
    }
}

impl GeneratorFactory for TopicFactory {
    fn kind(&self) -> &'static str {
        "topic"
    }

    fn probe(&self, id: &SourceId) -> bool {
        id.as_text().is_some_and(|topic| self.bus.is_advertised(topic))
    }

    fn open(&self, id: &SourceId, _looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        let topic = id.as_text().ok_or_else(|| SourceError::Open {
            id: id.to_string(),
            reason: "not a topic name".to_owned(),
        })?;
        Ok(Box::new(TopicGenerator::subscribe(&self.bus, topic)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gray(v: u8) -> Frame {
        Frame::Gray(GrayImage::from_pixel(1, 1, image::Luma([v])))
    }

    fn value(frame: &Frame) -> u8 {
        frame.to_gray().get_pixel(0, 0).0[0]
    }

    fn message(encoding: &str, width: u32, height: u32, data: Vec<u8>) -> ImageMessage {
        ImageMessage {
            encoding: encoding.to_owned(),
            width,
            height,
            is_bigendian: false,
            data,
        }
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = FrameQueue::new();
        for v in 1..=5 {
            queue.push(gray(v));
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        let drained: Vec<u8> = (0..3).map(|_| value(&queue.pop())).collect();
        assert_eq!(drained, [3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue = FrameQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn pop_blocks_until_another_thread_publishes() {
        let bus = TopicBus::new();
        let mut generator = TopicGenerator::subscribe(&bus, "/cam");
        let producer = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                bus.publish("/cam", &message("mono8", 1, 1, vec![77])).unwrap()
            })
        };
        let frame = generator.read().unwrap();
        assert_eq!(value(&frame), 77);
        assert_eq!(producer.join().unwrap(), 1);
    }

    #[test]
    fn bgr8_is_reordered() {
        let frame = message("bgr8", 1, 1, vec![1, 2, 3]).to_frame().unwrap();
        assert_eq!(frame.to_rgb().get_pixel(0, 0).0, [3, 2, 1]);
        let frame = message("rgb8", 1, 1, vec![1, 2, 3]).to_frame().unwrap();
        assert_eq!(frame.to_rgb().get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let frame = message("bgra8", 2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8])
            .to_frame()
            .unwrap();
        let rgb = frame.to_rgb();
        assert_eq!(rgb.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(rgb.get_pixel(1, 0).0, [7, 6, 5]);
    }

    #[test]
    fn sixteen_bit_keeps_high_byte() {
        let little = message("mono16", 1, 1, vec![0x34, 0x12]);
        assert_eq!(value(&little.to_frame().unwrap()), 0x12);
        let big = ImageMessage {
            is_bigendian: true,
            ..message("mono16", 1, 1, vec![0x12, 0x34])
        };
        assert_eq!(value(&big.to_frame().unwrap()), 0x12);

        let bgr = message("bgr16", 1, 1, vec![0, 1, 0, 2, 0, 3]).to_frame().unwrap();
        assert_eq!(bgr.to_rgb().get_pixel(0, 0).0, [3, 2, 1]);
    }

    #[test]
    fn padded_rows_are_skipped() {
        // Two rows of one mono8 pixel, each padded to 4 bytes.
        let frame = message("mono8", 1, 2, vec![10, 0, 0, 0, 20, 0, 0, 0])
            .to_frame()
            .unwrap();
        let img = frame.to_gray();
        assert_eq!(img.get_pixel(0, 1).0[0], 20);
    }

    #[test]
    fn bad_messages_are_rejected() {
        assert!(matches!(
            message("yuv422", 1, 1, vec![0, 0]).to_frame(),
            Err(SourceError::UnsupportedEncoding { .. })
        ));
        assert!(matches!(
            message("rgb8", 2, 2, vec![0; 5]).to_frame(),
            Err(SourceError::MalformedMessage(_))
        ));
    }

    #[test]
    fn factory_probes_only_advertised_topics() {
        let bus = TopicBus::new();
        let factory = TopicFactory::new(bus.clone());
        assert!(!factory.probe(&SourceId::from("/camera/image")));
        bus.advertise("/camera/image");
        assert!(factory.probe(&SourceId::from("/camera/image")));
        assert!(!factory.probe(&SourceId::Device(0)));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = TopicBus::new();
        let queue = bus.subscribe("t");
        drop(queue);
        assert_eq!(bus.publish("t", &message("mono8", 1, 1, vec![1])).unwrap(), 0);
    }
}
