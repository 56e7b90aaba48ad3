//! lamina-io: frame sources for lamina pipelines.
//!
//! A [`FrameSource`] pulls frames from a [`Generator`] chosen by a
//! [`GeneratorRegistry`] from a [`SourceId`]:
//!
//! | identifier | generator |
//! |---|---|
//! | path ending in `.jpg .jpeg .png .tiff .bmp` | [`ImageGenerator`] |
//! | path ending in `.mp4 .avi .mkv .mov` | [`VideoGenerator`] (`ffmpeg`) |
//! | device index, or `http://`, `https://`, `rtsp://` URL | [`CameraGenerator`] (`ffmpeg`) |
//! | topic advertised on the [`TopicBus`] | [`TopicGenerator`] |
//! | [`SdkHandle`] | [`SdkGenerator`] |
//!
//! The frame source is itself a pipeline layer and can lead a
//! [`Sequential`](lamina_pipeline::Sequential) chain.

pub mod clock;
pub mod error;
pub mod ffmpeg;
pub mod generator;
pub mod registry;
pub mod sdk;
pub mod source;
pub mod still;
pub mod topic;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SourceError;
pub use ffmpeg::{
    CameraGenerator, Decoder, FfmpegDecoder, FfmpegInput, FfmpegReader, VideoGenerator,
};
pub use generator::{FrameList, Generator};
pub use registry::{GeneratorFactory, GeneratorRegistry, SourceId};
pub use sdk::{ColorFrame, ColorFrameProvider, SdkGenerator, SdkHandle};
pub use source::{FrameSource, SourceOptions};
pub use still::ImageGenerator;
pub use topic::{FrameQueue, ImageMessage, TopicBus, TopicGenerator};
