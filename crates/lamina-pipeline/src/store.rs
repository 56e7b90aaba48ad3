//! JSON-file persistence for layer parameters.
//!
//! Each parameterized layer owns one JSON object on disk at
//! `<root>/<namespace>/<layer-name>.json`. Loading never fails: missing
//! or corrupt files yield the compiled-in defaults, and stored values are
//! merged *over* the defaults so a file written by an older build can
//! never drop a parameter the current build expects. Saving overwrites
//! the whole file and reports failures to the caller.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::layer::LayerName;

/// A flat parameter mapping, as stored on disk.
pub type ParamMap = Map<String, Value>;

/// Base directory selection for parameter files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamRoot {
    /// `$HOME/.lamina/param` (falls back to `./.lamina/param` without a home).
    #[default]
    User,
    /// `./param` relative to the process working directory.
    Local,
    /// `param/` inside this crate's source directory.
    Package,
    /// An explicit directory.
    Dir(PathBuf),
}

impl ParamRoot {
    /// Resolve the root to a concrete directory.
    #[must_use]
    pub fn resolve(&self) -> PathBuf {
        match self {
            Self::User => std::env::var_os("HOME")
                .map_or_else(|| PathBuf::from("."), PathBuf::from)
                .join(".lamina")
                .join("param"),
            Self::Local => PathBuf::from("param"),
            Self::Package => Path::new(env!("CARGO_MANIFEST_DIR")).join("param"),
            Self::Dir(dir) => dir.clone(),
        }
    }
}

/// Errors raised when persisting parameters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Creating the directory or writing the file failed.
    #[error("failed to write parameters to {path}: {source}")]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The parameters could not be serialized.
    #[error("failed to serialize parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reads and writes one layer's parameter file.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
}

impl ParameterStore {
    /// Store for `name` under `root`.
    #[must_use]
    pub fn new(root: &ParamRoot, name: &LayerName) -> Self {
        Self {
            path: root.resolve().join(name.relative_path()),
        }
    }

    /// Store backed by an explicit file path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored parameters merged over `defaults`.
    ///
    /// Returns `defaults` unchanged when the file is missing, unreadable,
    /// not valid JSON, or not a JSON object. Otherwise every key present
    /// in both the file and `defaults` takes the stored value; keys only
    /// present in the file are dropped.
    #[must_use]
    pub fn load(&self, defaults: &ParamMap) -> ParamMap {
        let stored = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), %err, "no stored parameters, using defaults");
                return defaults.clone();
            }
        };

        let Ok(Value::Object(stored)) = serde_json::from_str::<Value>(&stored) else {
            tracing::debug!(path = %self.path.display(), "stored parameters are not a JSON object, using defaults");
            return defaults.clone();
        };

        merge_over(defaults, stored)
    }

    /// Overwrite the file with `params`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be
    /// written and [`StoreError::Serialize`] if serialization fails.
    pub fn save(&self, params: &ParamMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let json = serde_json::to_string(params)?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Overlay `stored` onto `defaults`, keeping only keys `defaults` declares.
fn merge_over(defaults: &ParamMap, mut stored: ParamMap) -> ParamMap {
    defaults
        .iter()
        .map(|(key, default)| {
            let value = stored.remove(key).unwrap_or_else(|| default.clone());
            (key.clone(), value)
        })
        .collect()
}
