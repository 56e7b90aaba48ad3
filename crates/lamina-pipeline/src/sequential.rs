//! Ordered chains of layers with an optional leading frame source.
//!
//! ```rust
//! # use lamina_pipeline::{Identity, Sequential, Frame, GrayImage, PipelineError};
//! # fn run() -> Result<(), PipelineError> {
//! let mut chain = Sequential::new("demo");
//! chain.add(Identity::new("a"))?.add(Identity::new("b"))?;
//! let out = chain.run(Frame::Gray(GrayImage::new(4, 4)))?;
//! assert!(out.as_frame().is_some());
//! # Ok(())
//! # }
//! ```
//!
//! With a source installed, [`Sequential::pull`] reads one frame and threads
//! it through every layer. Only the last layer may produce non-frame output
//! such as detected circles.

use crate::layer::{Layer, LayerName, Pull, Source};
use crate::params::Overrides;
use crate::types::{Frame, LayerError, Output, PipelineError};

/// Result of one [`Sequential::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The last layer's output for the next source frame.
    Output(Output),
    /// The source is exhausted.
    EndOfStream,
}

/// A chain of layers, optionally fed by a [`Source`].
pub struct Sequential {
    name: LayerName,
    source: Option<Box<dyn Source>>,
    layers: Vec<Box<dyn Layer>>,
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("name", &self.name)
            .field("source", &self.source.as_ref().map(|s| s.name().to_string()))
            .field(
                "layers",
                &self
                    .layers
                    .iter()
                    .map(|l| l.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Sequential {
    /// Layer kind, used in the layer name.
    pub const KIND: &str = "Sequential";

    /// Empty chain labelled `label`.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            name: LayerName::new(Self::KIND, label),
            source: None,
            layers: Vec::new(),
        }
    }

    /// Install the leading frame source, replacing any previous one.
    #[must_use]
    pub fn with_source(mut self, source: impl Source + 'static) -> Self {
        tracing::debug!(pipeline = %self.name, source = %source.name(), "source installed");
        self.source = Some(Box::new(source));
        self
    }

    /// Append a processing layer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MisplacedSource`] if `layer` is a frame
    /// source; sources can only lead a chain (see [`with_source`](Self::with_source)).
    pub fn add(&mut self, layer: impl Layer + 'static) -> Result<&mut Self, PipelineError> {
        if layer.is_source() {
            return Err(PipelineError::MisplacedSource {
                layer: layer.name().to_string(),
            });
        }
        self.layers.push(Box::new(layer));
        Ok(self)
    }

    /// The processing layers, excluding the source.
    #[must_use]
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// The leading source, if any.
    #[must_use]
    pub fn source(&self) -> Option<&dyn Source> {
        self.source.as_deref()
    }

    /// Number of processing layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if there are no processing layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn thread(&mut self, frame: Frame) -> Result<Output, LayerError> {
        let mut output = Output::Frame(frame);
        for i in 0..self.layers.len() {
            let Output::Frame(frame) = output else {
                return Err(LayerError::NotAFrame {
                    layer: self.layers[i - 1].name().to_string(),
                });
            };
            output = self.layers[i].infer(frame)?;
        }
        Ok(output)
    }

    /// Thread `frame` through every processing layer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotAFrame`] if a layer other than the last
    /// produces non-frame output, and [`PipelineError::Layer`] if a layer
    /// fails.
    pub fn run(&mut self, frame: Frame) -> Result<Output, PipelineError> {
        self.thread(frame).map_err(|err| match err {
            LayerError::NotAFrame { layer } => PipelineError::NotAFrame { layer },
            other => PipelineError::Layer(other),
        })
    }

    /// Pull one frame from the source and thread it through the chain.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSource`] without a source, otherwise see
    /// [`run`](Self::run).
    pub fn pull(&mut self) -> Result<Step, PipelineError> {
        let source = self.source.as_mut().ok_or(PipelineError::NoSource)?;
        match source.pull() {
            Pull::Frame(frame) => self.run(frame).map(Step::Output),
            Pull::EndOfStream => Ok(Step::EndOfStream),
        }
    }

    /// Iterate over outputs until the source is exhausted or a step fails.
    ///
    /// An error is yielded once and ends the iteration.
    pub fn outputs(&mut self) -> impl Iterator<Item = Result<Output, PipelineError>> + '_ {
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            match self.pull() {
                Ok(Step::Output(out)) => Some(Ok(out)),
                Ok(Step::EndOfStream) => {
                    done = true;
                    None
                }
                Err(err) => {
                    done = true;
                    Some(Err(err))
                }
            }
        })
    }
}

impl Layer for Sequential {
    fn name(&self) -> &LayerName {
        &self.name
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        if let Some((key, _)) = overrides.iter().next() {
            return Err(LayerError::UnknownParameter {
                layer: self.name.to_string(),
                key: key.clone(),
            });
        }
        self.thread(frame)
    }

    fn is_source(&self) -> bool {
        self.source.is_some()
    }
}
