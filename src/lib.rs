//! # plastica
//!
//! A self-organizing reservoir computer that learns to forecast a scalar
//! signal one tick ahead.
//!
//! A leaky tanh reservoir is read out by an online LMS learner. Around it,
//! structural plasticity grows neurons, prunes and regrows synapses, and keeps
//! the recurrent matrix near a target spectral radius. A small recurrent
//! controller watches the error stream and tunes the hyperparameters.
//!
//! ## Quick Start
//!
//! ```
//! use plastica::prelude::*;
//!
//! let cfg = ReservoirConfig::with_size(64, 32).with_seed(42);
//! let mut engine = Engine::new(cfg).expect("valid config");
//!
//! let mut task = SineTask::default();
//! engine.reset_for_task(&task);
//! for _ in 0..50 {
//!     let m = engine.step_task(&mut task);
//!     assert!(m.prediction.is_finite());
//! }
//!
//! let state = engine.network_state();
//! assert_eq!(state.weights.len(), state.size * state.size);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialization of configs, metrics and snapshots
//! - `parallel`: Multi-threaded mat-vec via rayon
//! - `simd`: SIMD dot products via the `wide` crate
//!
//! ## Modules
//!
//! - [`engine`]: Tick loop and public entry point
//! - [`network`]: Reservoir state and structural queries
//! - [`spectral`]: Spectral radius estimation and regulation
//! - [`plasticity`]: Growth, pruning, regrowth and rewiring
//! - [`controller`]: Recurrent hyperparameter controller
//! - [`task`]: Task collaborator contract
//! - [`observer`]: Read-only observation adapters

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/hyper.rs"]
pub mod hyper;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/dense.rs"]
pub mod dense;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/reservoir.rs"]
mod reservoir;

#[path = "core/spectral.rs"]
pub mod spectral;

#[path = "core/plasticity.rs"]
pub mod plasticity;

#[path = "core/controller.rs"]
pub mod controller;

#[path = "core/metrics.rs"]
pub mod metrics;

#[path = "core/task.rs"]
pub mod task;

#[path = "core/engine.rs"]
pub mod engine;

pub mod observer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        CompetitionMode, ControllerConfig, ControllerHead, MitosisSeeding, ReservoirConfig,
    };
    pub use crate::controller::{ControllerIntrospection, ControllerMode};
    pub use crate::dense::ExecutionTier;
    pub use crate::engine::Engine;
    pub use crate::error::ConfigError;
    pub use crate::hyper::{HyperBounds, HyperParams, Strategy};
    pub use crate::metrics::{Metrics, NetworkState, Status};
    pub use crate::observer::{EngineAdapter, EngineSnapshot};
    pub use crate::spectral::RegulationReport;
    pub use crate::task::{ConstantOffsetTask, Sample, SineTask, TaskSource};
}
