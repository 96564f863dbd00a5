//! Per-tick metrics record and read-only network snapshot.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::controller::ControllerIntrospection;
use crate::hyper::HyperParams;

/// Coarse regime label of one tick. Not persisted across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum Status {
    #[default]
    Stable,
    Learning,
    Stagnant,
    Locked,
    Converging,
    Growing,
    GrowingSynapses,
    Pruning,
    Rewiring,
    /// Emergency recovery ran this tick.
    Stabilizing,
    /// The solved lock was released this tick.
    Unlocked,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Stable => "STABLE",
            Status::Learning => "LEARNING",
            Status::Stagnant => "STAGNANT",
            Status::Locked => "LOCKED",
            Status::Converging => "CONVERGING",
            Status::Growing => "GROWING",
            Status::GrowingSynapses => "GROWING_SYNAPSES",
            Status::Pruning => "PRUNING",
            Status::Rewiring => "REWIRING",
            Status::Stabilizing => "STABILIZING",
            Status::Unlocked => "UNLOCKED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an external collaborator needs to display one tick.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metrics {
    pub step: u64,
    pub prediction: f32,
    pub target: f32,
    /// `target - prediction`.
    pub error: f32,
    /// `error²`.
    pub loss: f32,
    /// Exponential moving average of `loss`.
    pub avg_loss: f32,
    pub active_connections: usize,
    pub target_connections: usize,
    pub target_density: f32,
    /// Synapses added by regrowth or rewiring since the last reset.
    pub regrown_total: u64,
    pub neuron_count: usize,
    pub patience: u32,
    pub spectral_radius: f32,
    pub status: Status,
    pub winter: bool,
    pub hyper: HyperParams,
    pub controller: ControllerIntrospection,
    /// Reward the controller scored this tick (evaluation ticks only).
    pub reward: Option<f32>,
    /// Human-readable events generated this tick, e.g. `[MITOSIS] neuron 37 added`.
    pub events: Vec<String>,
}

/// Owned snapshot of the network for visualization.
///
/// Matrices are flattened row-major over the active `size × size` block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkState {
    pub size: usize,
    pub max_neurons: usize,
    pub activations: Vec<f32>,
    pub weights: Vec<f32>,
    pub readout: Vec<f32>,
    pub input_weights: Vec<f32>,
    pub neuron_types: Vec<i8>,
    pub energy: Vec<f32>,
    pub hyper: HyperParams,
    pub target_density: f32,
    pub spectral_radius: f32,
    pub locked: bool,
}

impl NetworkState {
    /// Weight of the synapse `j → i` in the snapshot.
    pub fn weight(&self, i: usize, j: usize) -> f32 {
        self.weights[i * self.size + j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(Status::GrowingSynapses.to_string(), "GROWING_SYNAPSES");
        assert_eq!(Status::Stabilizing.as_str(), "STABILIZING");
        assert_eq!(Status::default(), Status::Stable);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn status_serializes_as_label() {
        let s = serde_json::to_string(&Status::Unlocked).expect("serialize");
        assert_eq!(s, "\"UNLOCKED\"");
    }
}
