//! Typed, persisted layer parameters.
//!
//! Every parameterized layer declares a `serde` struct implementing
//! [`LayerParams`]. Its `Default` value is the compiled-in parameter
//! schema: the serialized keys are the only keys the layer accepts, in
//! stored files, constructor overrides, per-call overrides and debug
//! slider events alike.
//!
//! [`ParamLayer`] bundles the pieces every parameterized layer needs:
//! its [`LayerName`], a [`ParameterStore`], the current parameter values,
//! and the optional debug surface.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::debug::{SharedSurface, Slider, UiEvent};
use crate::layer::LayerName;
use crate::store::{ParamMap, ParamRoot, ParameterStore};
use crate::types::LayerError;

/// A live-adjustable integer parameter exposed as a debug slider.
#[derive(Debug, Clone, Copy)]
pub struct Control {
    /// Parameter key.
    pub name: &'static str,
    /// Slider upper bound.
    pub max: i64,
    /// Maps a raw slider position to the stored value.
    pub adjust: fn(i64) -> i64,
}

impl Control {
    /// Control whose slider position is stored verbatim.
    #[must_use]
    pub const fn new(name: &'static str, max: i64) -> Self {
        Self {
            name,
            max,
            adjust: std::convert::identity,
        }
    }

    /// Replace the position-to-value mapping.
    #[must_use]
    pub const fn with_adjust(mut self, adjust: fn(i64) -> i64) -> Self {
        self.adjust = adjust;
        self
    }
}

/// A layer's typed parameter set.
pub trait LayerParams: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Parameters adjustable through debug sliders.
    fn controls() -> Vec<Control> {
        Vec::new()
    }
}

/// Named parameter values that take precedence over a layer's stored set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides(ParamMap);

impl Overrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one override.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if there are no overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up one override.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Remove and return one override, for call flags that are not
    /// parameters.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }
}

impl FromIterator<(String, Value)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Serialize parameters into their flat map form.
///
/// # Errors
///
/// Fails if `params` does not serialize to a JSON object.
pub fn to_map<P: Serialize>(params: &P) -> Result<ParamMap, serde_json::Error> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "parameters must serialize to an object, got {other}"
        ))),
    }
}

/// Apply `overrides` on top of `base`, rejecting keys `base` does not have.
///
/// # Errors
///
/// Returns [`LayerError::UnknownParameter`] for undeclared keys and
/// [`LayerError::InvalidParameter`] if a value has the wrong type.
pub fn apply_overrides<P: LayerParams>(
    layer: &str,
    base: &P,
    overrides: &Overrides,
) -> Result<P, LayerError> {
    let invalid = |source| LayerError::InvalidParameter {
        layer: layer.to_owned(),
        source,
    };
    let mut map = to_map(base).map_err(invalid)?;
    for (key, value) in overrides.iter() {
        let Some(slot) = map.get_mut(key) else {
            return Err(LayerError::UnknownParameter {
                layer: layer.to_owned(),
                key: key.clone(),
            });
        };
        *slot = value.clone();
    }
    serde_json::from_value(Value::Object(map)).map_err(invalid)
}

/// Construction options shared by every parameterized layer.
#[derive(Clone)]
pub struct LayerOptions {
    /// Label combined with the layer kind into its name.
    pub label: String,
    /// Where parameter files live.
    pub root: ParamRoot,
    /// Debug surface; `Some` enables sliders and interactive editing.
    pub surface: Option<SharedSurface>,
    /// Values applied over the loaded parameters at construction.
    pub overrides: Overrides,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Debug for LayerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerOptions")
            .field("label", &self.label)
            .field("root", &self.root)
            .field("debug", &self.surface.is_some())
            .field("overrides", &self.overrides)
            .finish()
    }
}

impl LayerOptions {
    /// Options for a layer labelled `label`, stored under the user root.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            root: ParamRoot::default(),
            surface: None,
            overrides: Overrides::default(),
        }
    }

    /// Store parameters under `root`.
    #[must_use]
    pub fn root(mut self, root: ParamRoot) -> Self {
        self.root = root;
        self
    }

    /// Enable the debug surface.
    #[must_use]
    pub fn debug(mut self, surface: SharedSurface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Override one parameter at construction.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides = self.overrides.with(key, value);
        self
    }
}

/// Name, storage, current values and debug wiring of a parameterized layer.
pub struct ParamLayer<P> {
    name: LayerName,
    store: ParameterStore,
    params: P,
    surface: Option<SharedSurface>,
}

impl<P: fmt::Debug> fmt::Debug for ParamLayer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamLayer")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("params", &self.params)
            .field("debug", &self.surface.is_some())
            .finish()
    }
}

impl<P: LayerParams> ParamLayer<P> {
    /// Load the parameters for a layer of `kind` and apply constructor
    /// overrides. With a debug surface, also opens the layer window and
    /// registers one slider per [`LayerParams::controls`] entry.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::UnknownParameter`] or
    /// [`LayerError::InvalidParameter`] for bad constructor overrides.
    pub fn open(kind: &str, defaults: P, options: LayerOptions) -> Result<Self, LayerError> {
        let name = LayerName::new(kind, &options.label);
        let store = ParameterStore::new(&options.root, &name);
        Self::with_store(name, store, defaults, options)
    }

    /// Like [`open`](Self::open) but with an explicit name and store.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn with_store(
        name: LayerName,
        store: ParameterStore,
        defaults: P,
        options: LayerOptions,
    ) -> Result<Self, LayerError> {
        let title = name.to_string();
        let default_map = to_map(&defaults).map_err(|source| LayerError::InvalidParameter {
            layer: title.clone(),
            source,
        })?;
        let loaded = store.load(&default_map);
        let params = serde_json::from_value(Value::Object(loaded)).unwrap_or_else(|err| {
            tracing::debug!(layer = %title, %err, "stored parameters do not fit, using defaults");
            defaults
        });
        let params = apply_overrides(&title, &params, &options.overrides)?;
        tracing::debug!(layer = %title, store = %store.path().display(), ?params, "layer parameters loaded");

        let layer = Self {
            name,
            store,
            params,
            surface: options.surface,
        };
        layer.setup_debug();
        Ok(layer)
    }

    fn setup_debug(&self) {
        let Some(surface) = &self.surface else {
            return;
        };
        let title = self.name.to_string();
        let values = to_map(&self.params).unwrap_or_default();
        let mut surface = surface.borrow_mut();
        surface.create_window(&title);
        for control in P::controls() {
            let value = values
                .get(control.name)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            surface.add_slider(
                &title,
                Slider {
                    name: control.name.to_owned(),
                    value,
                    max: control.max,
                },
            );
        }
    }

    /// The layer's identity.
    #[must_use]
    pub const fn name(&self) -> &LayerName {
        &self.name
    }

    /// Current parameter values.
    #[must_use]
    pub const fn params(&self) -> &P {
        &self.params
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// The debug surface, when debugging is enabled.
    #[must_use]
    pub const fn surface(&self) -> Option<&SharedSurface> {
        self.surface.as_ref()
    }

    /// Whether the debug surface is enabled.
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.surface.is_some()
    }

    /// Parameters for one call: the stored values with `overrides` applied.
    ///
    /// # Errors
    ///
    /// See [`apply_overrides`].
    pub fn resolve(&self, overrides: &Overrides) -> Result<Cow<'_, P>, LayerError> {
        if overrides.is_empty() {
            return Ok(Cow::Borrowed(&self.params));
        }
        apply_overrides(&self.name.to_string(), &self.params, overrides).map(Cow::Owned)
    }

    /// Set one parameter and persist the whole set.
    ///
    /// # Errors
    ///
    /// Fails for unknown keys, mistyped values, or if persisting fails.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), LayerError> {
        let value = value.into();
        tracing::debug!(layer = %self.name, key, %value, "parameter changed");
        let change = Overrides::new().with(key, value);
        self.params = apply_overrides(&self.name.to_string(), &self.params, &change)?;
        self.persist()
    }

    /// Mutate the parameters in place and persist the whole set.
    ///
    /// # Errors
    ///
    /// Fails if persisting fails.
    pub fn update(&mut self, edit: impl FnOnce(&mut P)) -> Result<(), LayerError> {
        edit(&mut self.params);
        self.persist()
    }

    /// Write the current parameters to the store.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::Store`] if serialization or I/O fails.
    pub fn persist(&self) -> Result<(), LayerError> {
        let map = to_map(&self.params).map_err(crate::store::StoreError::from)?;
        self.store.save(&map)?;
        Ok(())
    }

    /// Drain the layer window's pending events.
    ///
    /// Slider events for declared controls are applied (through the
    /// control's `adjust` mapping) and persisted immediately. Every other
    /// event is returned for layer-specific handling.
    ///
    /// # Errors
    ///
    /// Fails if persisting a slider change fails.
    pub fn poll_events(&mut self) -> Result<Vec<UiEvent>, LayerError> {
        let Some(surface) = &self.surface else {
            return Ok(Vec::new());
        };
        let events = surface.borrow_mut().poll_events(&self.name.to_string());
        let controls = P::controls();
        let mut rest = Vec::new();
        for event in events {
            match event {
                UiEvent::Slider { name, value } => {
                    if let Some(control) = controls.iter().find(|c| c.name == name) {
                        self.set(control.name, (control.adjust)(value))?;
                    } else {
                        tracing::debug!(layer = %self.name, slider = %name, "ignoring undeclared slider");
                    }
                }
                click @ UiEvent::Click { .. } => rest.push(click),
            }
        }
        Ok(rest)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::debug::{DebugSurface, HeadlessSurface};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Knobs {
        low: i64,
        high: i64,
    }

    impl Default for Knobs {
        fn default() -> Self {
            Self { low: 1, high: 200 }
        }
    }

    impl LayerParams for Knobs {
        fn controls() -> Vec<Control> {
            vec![
                Control::new("low", 255),
                Control::new("high", 1000).with_adjust(|v| v - v % 10),
            ]
        }
    }

    fn options(dir: &tempfile::TempDir) -> LayerOptions {
        LayerOptions::new("/knobs").root(ParamRoot::Dir(dir.path().to_path_buf()))
    }

    #[test]
    fn open_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ParamLayer::open("Knobs", Knobs::default(), options(&dir)).unwrap();
        assert_eq!(layer.params(), &Knobs::default());
        assert_eq!(layer.name().name(), "Knobs_knobs");
    }

    #[test]
    fn constructor_overrides_apply_to_known_keys() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ParamLayer::open("Knobs", Knobs::default(), options(&dir).set("low", 42))
            .unwrap();
        assert_eq!(layer.params().low, 42);
        assert_eq!(layer.params().high, 200);
    }

    #[test]
    fn constructor_overrides_reject_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let result = ParamLayer::open("Knobs", Knobs::default(), options(&dir).set("bogus", 1));
        assert!(matches!(
            result,
            Err(LayerError::UnknownParameter { ref key, .. }) if key == "bogus"
        ));
    }

    #[test]
    fn mistyped_override_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let result = ParamLayer::open(
            "Knobs",
            Knobs::default(),
            options(&dir).set("low", "not a number"),
        );
        assert!(matches!(result, Err(LayerError::InvalidParameter { .. })));
    }

    #[test]
    fn mistyped_stored_value_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Knobs_knobs.json"), r#"{"low": "x"}"#).unwrap();
        let layer = ParamLayer::open("Knobs", Knobs::default(), options(&dir)).unwrap();
        assert_eq!(layer.params(), &Knobs::default());
    }

    #[test]
    fn resolve_is_call_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ParamLayer::open("Knobs", Knobs::default(), options(&dir)).unwrap();
        let resolved = layer.resolve(&Overrides::new().with("high", 7)).unwrap();
        assert_eq!(resolved.high, 7);
        assert_eq!(layer.params().high, 200);
        assert!(!layer.store().path().exists(), "overrides must not persist");
    }

    #[test]
    fn set_persists_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = ParamLayer::open("Knobs", Knobs::default(), options(&dir)).unwrap();
        layer.set("low", 9).unwrap();

        let reopened = ParamLayer::open("Knobs", Knobs::default(), options(&dir)).unwrap();
        assert_eq!(reopened.params(), &Knobs { low: 9, high: 200 });
    }

    #[test]
    fn debug_registers_sliders_and_applies_events() {
        let dir = tempfile::tempdir().unwrap();
        let surface = HeadlessSurface::new().shared();
        let mut layer = ParamLayer::open(
            "Knobs",
            Knobs::default(),
            options(&dir).debug(surface.clone()),
        )
        .unwrap();

        let title = layer.name().to_string();
        {
            let surface = surface.borrow();
            let sliders = surface.window(&title).unwrap().sliders();
            assert_eq!(sliders.len(), 2);
            assert_eq!(sliders[1].value, 200);
            assert_eq!(sliders[1].max, 1000);
        }

        surface.borrow_mut().push_event(
            &title,
            UiEvent::Slider {
                name: "high".to_owned(),
                value: 347,
            },
        );
        surface.borrow_mut().push_event(
            &title,
            UiEvent::Click {
                button: crate::debug::MouseButton::Left,
                x: 3,
                y: 4,
            },
        );
        let rest = layer.poll_events().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(layer.params().high, 340);

        let stored: Value =
            serde_json::from_str(&std::fs::read_to_string(layer.store().path()).unwrap()).unwrap();
        assert_eq!(stored, json!({"low": 1, "high": 340}));
        assert!(surface.borrow_mut().poll_events(&title).is_empty());
    }
}
