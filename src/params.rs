//! Controller → engine parameter mapping and value calibration

pub mod normalize;
pub mod registry;

pub use normalize::{normalize, truncate3};
pub use registry::{is_button, ParameterBinding, ParameterRegistry, PatchError};
