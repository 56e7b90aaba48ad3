//! Source identifiers and the ordered list of generator factories.
//!
//! A [`GeneratorRegistry`] asks each factory in turn whether it accepts an
//! identifier and opens the first that does. The standard registry tries
//! still images, video files, cameras, bus topics, then SDK handles.

use std::fmt;

use crate::error::SourceError;
use crate::ffmpeg::{CameraFactory, VideoFactory};
use crate::generator::Generator;
use crate::still::ImageFactory;
use crate::sdk::{SdkFactory, SdkHandle};
use crate::topic::TopicFactory;

/// What a frame source reads from.
#[derive(Debug, Clone)]
pub enum SourceId {
    /// A path, URL, topic name, or device index written as text.
    Text(String),
    /// A capture device index.
    Device(u32),
    /// A device SDK handle.
    Sdk(SdkHandle),
}

impl SourceId {
    /// The textual identifier, if this is [`SourceId::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Device(_) | Self::Sdk(_) => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Device(index) => write!(f, "device {index}"),
            Self::Sdk(_) => f.write_str("sdk"),
        }
    }
}

impl From<&str> for SourceId {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for SourceId {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<u32> for SourceId {
    fn from(index: u32) -> Self {
        Self::Device(index)
    }
}

impl From<SdkHandle> for SourceId {
    fn from(handle: SdkHandle) -> Self {
        Self::Sdk(handle)
    }
}

/// Recognizes one kind of identifier and opens generators for it.
pub trait GeneratorFactory {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Returns `true` if this factory handles `id`.
    fn probe(&self, id: &SourceId) -> bool;

    /// Open a generator for `id`. `looping` asks finite inputs to restart
    /// at their end; live inputs ignore it.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the input cannot be opened.
    fn open(&self, id: &SourceId, looping: bool) -> Result<Box<dyn Generator>, SourceError>;
}

/// Ordered list of generator factories.
#[derive(Default)]
pub struct GeneratorRegistry {
    factories: Vec<Box<dyn GeneratorFactory>>,
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.kind()))
            .finish()
    }
}

impl GeneratorRegistry {
    /// Registry with no factories.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Image, video, camera, topic (on the global bus), then SDK.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .push(ImageFactory)
            .push(VideoFactory)
            .push(CameraFactory)
            .push(TopicFactory::default())
            .push(SdkFactory);
        registry
    }

    /// Append a factory; it is tried after every existing one.
    pub fn push(&mut self, factory: impl GeneratorFactory + 'static) -> &mut Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Factory kinds in dispatch order.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|factory| factory.kind())
    }

    /// The first factory accepting `id`.
    #[must_use]
    pub fn find(&self, id: &SourceId) -> Option<&dyn GeneratorFactory> {
        self.factories
            .iter()
            .find(|factory| factory.probe(id))
            .map(AsRef::as_ref)
    }

    /// Open `id` with the first factory that accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoGenerator`] if no factory accepts `id`, or
    /// the chosen factory's open error.
    pub fn open(&self, id: &SourceId, looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        let factory = self.find(id).ok_or_else(|| SourceError::NoGenerator {
            id: id.to_string(),
        })?;
        tracing::debug!(kind = factory.kind(), %id, "generator selected");
        factory.open(id, looping)
    }
}
