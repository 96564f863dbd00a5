//! Configuration errors.
//!
//! Runtime numeric faults are recovered inside `Engine::step` and never show
//! up here; this type only covers precondition violations caught at
//! construction or live reconfiguration.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_neurons must be in [{min}, {max}], got {got}")]
    MaxNeurons { min: usize, max: usize, got: usize },

    #[error("initial_neurons must be in [2, max_neurons={max}], got {got}")]
    InitialNeurons { max: usize, got: usize },

    #[error("density bounds must satisfy 0 < min < max <= 1, got [{min}, {max}]")]
    DensityBounds { min: f32, max: f32 },

    #[error("solved_threshold ({solved}) must be below unlock_threshold ({unlock})")]
    ThresholdOrder { solved: f32, unlock: f32 },

    #[error("{field} must be finite and in [{min}, {max}], got {got}")]
    OutOfRange {
        field: &'static str,
        min: f32,
        max: f32,
        got: f32,
    },

    #[error("{field} must be >= 1")]
    ZeroInterval { field: &'static str },

    #[error("hyperparameter bounds for {field} are inverted: [{min}, {max}]")]
    InvertedBounds {
        field: &'static str,
        min: f32,
        max: f32,
    },

    #[error("{0} cannot be changed on a live engine")]
    Topology(&'static str),
}
