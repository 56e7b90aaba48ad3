//! The layer contract shared by every processing stage and frame source.

use std::fmt;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use siphasher::sip::SipHasher13;

use crate::params::Overrides;
use crate::types::{Frame, LayerError, Output};

/// Number of hex digits kept from the executable-path hash.
const NAMESPACE_LEN: usize = 10;

/// Identity of a layer instance.
///
/// Combines the layer kind and a caller-supplied label
/// (`"HsvFilter_default"`) with a namespace derived from the running
/// executable, so two unrelated programs that both use the label
/// `"default"` do not share parameter files. A label starting with `/`
/// opts out of the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerName {
    namespace: Option<String>,
    name: String,
}

impl LayerName {
    /// Name for a layer of `kind` labelled `label`, namespaced by the
    /// current executable.
    #[must_use]
    pub fn new(kind: &str, label: &str) -> Self {
        Self::with_namespace(kind, label, &current_namespace())
    }

    /// Name for a layer of `kind` labelled `label` in an explicit namespace.
    ///
    /// The namespace is ignored for absolute labels (leading `/`).
    #[must_use]
    pub fn with_namespace(kind: &str, label: &str, namespace: &str) -> Self {
        label.strip_prefix('/').map_or_else(
            || Self {
                namespace: Some(namespace.to_owned()),
                name: format!("{kind}_{label}"),
            },
            |absolute| Self {
                namespace: None,
                name: format!("{kind}_{absolute}"),
            },
        )
    }

    /// Short stable hash identifying a program path.
    #[must_use]
    pub fn namespace_for(program: &Path) -> String {
        let mut hasher = SipHasher13::new();
        hasher.write(program.as_os_str().as_encoded_bytes());
        let mut hex = format!("{:016x}", hasher.finish());
        hex.truncate(NAMESPACE_LEN);
        hex
    }

    /// `"<Kind>_<label>"` without the namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, or `None` for absolute labels.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Parameter file path relative to a parameter root.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        let file = format!("{}.json", self.name);
        self.namespace
            .as_ref()
            .map_or_else(|| PathBuf::from(&file), |ns| Path::new(ns).join(&file))
    }
}

impl fmt::Display for LayerName {
    /// Window title form: `namespace/name`, or just `name`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn current_namespace() -> String {
    let program = std::env::current_exe()
        .and_then(std::fs::canonicalize)
        .ok()
        .or_else(|| std::env::args_os().next().map(PathBuf::from))
        .unwrap_or_default();
    LayerName::namespace_for(&program)
}

/// A unit of frame transformation.
pub trait Layer {
    /// The layer's identity (parameter-file key and window title).
    fn name(&self) -> &LayerName;

    /// Transform `frame`, with `overrides` taking precedence over the
    /// stored parameters for this call only.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::UnknownParameter`] or
    /// [`LayerError::InvalidParameter`] for bad overrides, and
    /// layer-specific errors otherwise.
    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError>;

    /// Transform `frame` with the stored parameters.
    ///
    /// # Errors
    ///
    /// See [`infer_with`](Self::infer_with).
    fn infer(&mut self, frame: Frame) -> Result<Output, LayerError> {
        self.infer_with(frame, &Overrides::default())
    }

    /// Whether this layer is a frame source (see [`Source`]).
    fn is_source(&self) -> bool {
        false
    }
}

/// Result of pulling from a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// The next frame.
    Frame(Frame),
    /// The source is exhausted; every later pull returns this too.
    EndOfStream,
}

impl Pull {
    /// The frame, or `None` at end of stream.
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::EndOfStream => None,
        }
    }
}

/// A layer with no upstream input that produces frames on demand.
pub trait Source: Layer {
    /// Produce the next frame or report the end of the sequence.
    fn pull(&mut self) -> Pull;
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn name(&self) -> &LayerName {
        (**self).name()
    }

    fn infer_with(&mut self, frame: Frame, overrides: &Overrides) -> Result<Output, LayerError> {
        (**self).infer_with(frame, overrides)
    }

    fn is_source(&self) -> bool {
        (**self).is_source()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn pull(&mut self) -> Pull {
        (**self).pull()
    }
}

/// A layer that returns its input unchanged.
#[derive(Debug, Clone)]
pub struct Identity {
    name: LayerName,
}

impl Identity {
    /// Identity layer labelled `label`.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            name: LayerName::new("Identity", label),
        }
    }
}

impl Layer for Identity {
    fn name(&self) -> &LayerName {
        &self.name
    }

    fn infer_with(&mut self, frame: Frame, _overrides: &Overrides) -> Result<Output, LayerError> {
        Ok(Output::Frame(frame))
    }
}
