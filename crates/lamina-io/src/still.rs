//! Still-image generator.

use std::path::{Path, PathBuf};

use lamina_pipeline::Frame;
use lamina_pipeline::decode::open_frame;

use crate::error::SourceError;
use crate::generator::Generator;
use crate::registry::{GeneratorFactory, SourceId};

/// File extensions accepted as still images (compared lowercase).
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".tiff", ".bmp"];

/// Yields one decoded image, once or forever.
#[derive(Debug)]
pub struct ImageGenerator {
    frame: Frame,
    looping: bool,
    done: bool,
}

impl ImageGenerator {
    /// Decode the image at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] if the file cannot be read or
    /// decoded.
    pub fn open(path: &Path, looping: bool) -> Result<Self, SourceError> {
        let frame = open_frame(path, false)?;
        Ok(Self::from_frame(frame, looping))
    }

    /// Generator over an already decoded frame.
    #[must_use]
    pub const fn from_frame(frame: Frame, looping: bool) -> Self {
        Self {
            frame,
            looping,
            done: false,
        }
    }
}

impl Generator for ImageGenerator {
    fn read(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        if !self.looping {
            self.done = true;
        }
        Some(self.frame.clone())
    }
}

/// Returns `true` if `text` ends in one of `extensions`, ignoring case.
pub(crate) fn has_extension(text: &str, extensions: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// Factory for [`ImageGenerator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFactory;

impl GeneratorFactory for ImageFactory {
    fn kind(&self) -> &'static str {
        "image"
    }

    fn probe(&self, id: &SourceId) -> bool {
        id.as_text()
            .is_some_and(|text| has_extension(text, &IMAGE_EXTENSIONS))
    }

    fn open(&self, id: &SourceId, looping: bool) -> Result<Box<dyn Generator>, SourceError> {
        let path = id.as_text().map(PathBuf::from).ok_or_else(|| SourceError::Open {
            id: id.to_string(),
            reason: "not a file path".to_owned(),
        })?;
        Ok(Box::new(ImageGenerator::open(&path, looping)?))
    }
}
