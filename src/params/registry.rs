//! Parameter registry
//!
//! Maps (unit, controller) pairs to engine parameter paths and mirrors the
//! last value the engine reported for each bound path. Built from the RNBO
//! patch description, a JSON tree where every node keeps its children under
//! `CONTENTS`.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::normalize::{normalize, truncate3};
use crate::hardware::commands::{BUTTON_COUNT, CONTROLLER_COUNT};

/// Location of the parameter tree inside the patch description
pub const PARAMS_POINTER: &str = "/CONTENTS/rnbo/CONTENTS/inst/CONTENTS/0/CONTENTS/params/CONTENTS";

/// Location of the preset name list inside the patch description
pub const PRESETS_POINTER: &str =
    "/CONTENTS/rnbo/CONTENTS/inst/CONTENTS/0/CONTENTS/presets/CONTENTS/entries/VALUE";

/// Highest unit index on the bus
pub const MAX_UNIT: u8 = 15;

/// Controller indices below this are buttons
pub fn is_button(controller: u8) -> bool {
    (controller as usize) < BUTTON_COUNT
}

/// Problems with the patch description itself
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch description has no parameter tree")]
    MissingParams,
}

/// Engine parameter driven by one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    /// Full OSC path of the parameter's normalized value
    pub path: String,
    /// Knob has a physical center detent
    pub center_detent: bool,
}

/// `meta` JSON attached to an RNBO parameter
#[derive(Debug, Deserialize)]
struct ParamMeta {
    rainpots: Option<Value>,
}

/// Binding fields of a `rainpots` meta object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RainpotsMeta {
    unit: i64,
    ctl: i64,
    center_detent: bool,
}

impl RainpotsMeta {
    /// `unit` and `ctl` may be written as `1` or `1.0`; `center` as a number
    /// (`> 0` means detent) or a bool
    fn from_value(value: &Value) -> Option<Self> {
        let center_detent = match value.get("center") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(center)) => *center,
            Some(Value::Number(center)) => center.as_f64().is_some_and(|c| c > 0.0),
            Some(_) => return None,
        };
        Some(Self {
            unit: integral(value.get("unit")?)?,
            ctl: integral(value.get("ctl")?)?,
            center_detent,
        })
    }
}

/// A JSON number with no fractional part
fn integral(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() <= i32::MAX as f64).then_some(f as i64)
}

/// Controller bindings plus the mirror of engine-side values
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    bindings: BTreeMap<(u8, u8), ParameterBinding>,
    /// `None` = value unknown (not reported yet, or already picked up)
    values: HashMap<String, Option<f64>>,
    presets: Vec<String>,
}

impl ParameterRegistry {
    /// Registry with no controllers bound
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the registry from a patch description document
    pub fn from_patch(patch: &Value) -> Result<Self, PatchError> {
        let params = patch
            .pointer(PARAMS_POINTER)
            .and_then(Value::as_object)
            .ok_or(PatchError::MissingParams)?;

        let mut registry = Self::empty();
        registry.collect(params);

        registry.presets = patch
            .pointer(PRESETS_POINTER)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        for ((unit, controller), binding) in &registry.bindings {
            debug!(
                unit,
                controller,
                path = %binding.path,
                center = binding.center_detent,
                "Bound controller"
            );
        }

        Ok(registry)
    }

    /// Walk one level of the parameter tree
    fn collect(&mut self, tree: &Map<String, Value>) {
        for (key, node) in tree {
            let Some(contents) = node.get("CONTENTS").and_then(Value::as_object) else {
                trace!("Skipping parameter node without CONTENTS: {}", key);
                continue;
            };

            if contents.contains_key("normalized") {
                self.collect_leaf(key, contents);
            } else {
                self.collect(contents);
            }
        }
    }

    fn collect_leaf(&mut self, key: &str, contents: &Map<String, Value>) {
        let Some(path) = contents
            .get("normalized")
            .and_then(|n| n.get("FULL_PATH"))
            .and_then(Value::as_str)
        else {
            debug!("Parameter {} has no normalized FULL_PATH", key);
            return;
        };

        let Some(meta) = contents
            .get("meta")
            .and_then(|m| m.get("VALUE"))
            .and_then(Value::as_str)
        else {
            return;
        };

        let raw = match serde_json::from_str::<ParamMeta>(meta) {
            Ok(ParamMeta {
                rainpots: Some(raw),
            }) if !raw.is_null() => raw,
            Ok(_) => return,
            Err(e) => {
                trace!("Ignoring unparsable meta on {}: {}", key, e);
                return;
            }
        };
        let Some(rainpots) = RainpotsMeta::from_value(&raw) else {
            warn!("Parameter {} has an unusable rainpots binding: {}", path, raw);
            return;
        };

        let (unit, controller) = match (u8::try_from(rainpots.unit), u8::try_from(rainpots.ctl)) {
            (Ok(unit), Ok(ctl)) if unit <= MAX_UNIT && (ctl as usize) < CONTROLLER_COUNT => {
                (unit, ctl)
            }
            _ => {
                warn!(
                    "Parameter {} has out-of-range binding unit={} ctl={}",
                    path, rainpots.unit, rainpots.ctl
                );
                return;
            }
        };

        let binding = ParameterBinding {
            path: path.to_string(),
            center_detent: rainpots.center_detent,
        };
        self.insert(unit, controller, binding);
    }

    /// Add a binding, keeping the unit/controller ↔ path mapping one-to-one
    ///
    /// Returns false if either side is already taken.
    pub fn insert(&mut self, unit: u8, controller: u8, binding: ParameterBinding) -> bool {
        if let Some(existing) = self.bindings.get(&(unit, controller)) {
            warn!(
                "Unit {} controller {} already bound to {}, ignoring {}",
                unit, controller, existing.path, binding.path
            );
            return false;
        }
        if self.values.contains_key(&binding.path) {
            warn!(
                "Path {} already bound to another controller, ignoring unit {} controller {}",
                binding.path, unit, controller
            );
            return false;
        }

        self.values.insert(binding.path.clone(), None);
        self.bindings.insert((unit, controller), binding);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of bound controllers
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn binding(&self, unit: u8, controller: u8) -> Option<&ParameterBinding> {
        self.bindings.get(&(unit, controller))
    }

    /// All bindings ordered by unit, then controller
    pub fn bindings(&self) -> impl Iterator<Item = (u8, u8, &ParameterBinding)> {
        self.bindings.iter().map(|(&(u, c), b)| (u, c, b))
    }

    /// Normalize a raw value using the controller's calibration
    ///
    /// `None` means the controller is not configured.
    pub fn normalized_value(&self, unit: u8, controller: u8, raw: u16) -> Option<f64> {
        self.binding(unit, controller)
            .map(|binding| normalize(raw, binding.center_detent))
    }

    /// Whether `path` belongs to a bound controller
    pub fn is_bound_path(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Last mirrored engine value for a path, `None` if unknown or unbound
    pub fn value(&self, path: &str) -> Option<f64> {
        self.values.get(path).copied().flatten()
    }

    /// Mirror an engine value (truncated to 3 decimals)
    ///
    /// Returns false when the path is not bound.
    pub fn set_value(&mut self, path: &str, value: f64) -> bool {
        match self.values.get_mut(path) {
            Some(slot) => {
                *slot = Some(truncate3(value));
                true
            }
            None => false,
        }
    }

    /// Forget the mirrored value for a path
    pub fn clear_value(&mut self, path: &str) {
        if let Some(slot) = self.values.get_mut(path) {
            *slot = None;
        }
    }

    /// Forget every mirrored value
    pub fn reset_values(&mut self) {
        for slot in self.values.values_mut() {
            *slot = None;
        }
    }

    /// Preset names published by the engine
    pub fn presets(&self) -> &[String] {
        &self.presets
    }

    /// Mirrored values of the bound buttons, grouped per unit
    ///
    /// Units without any bound button are absent; unbound or unknown
    /// buttons are `None`.
    pub fn button_values(&self) -> BTreeMap<u8, [Option<f64>; BUTTON_COUNT]> {
        let mut units: BTreeMap<u8, [Option<f64>; BUTTON_COUNT]> = BTreeMap::new();
        for (unit, controller, binding) in self.bindings() {
            if !is_button(controller) {
                continue;
            }
            let slots = units.entry(unit).or_insert([None; BUTTON_COUNT]);
            slots[controller as usize] = self.value(&binding.path);
        }
        units
    }
}
