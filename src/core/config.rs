//! Engine and controller configuration.
//!
//! Every tuning constant of the engine lives here as a named field. The
//! defaults are empirically reasonable for small (<= 256 neuron) reservoirs
//! on smooth scalar forecasting tasks.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hyper::{HyperBounds, HyperParams};

/// How a newborn neuron's synapses are seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MitosisSeeding {
    /// Perturbed copy of the most active neuron's row and column.
    #[default]
    CloneParent,
    /// Connection probability proportional to current |activation|.
    PreferentialAttachment,
}

/// Which competition decides synapse survival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompetitionMode {
    /// Magnitude + intrinsic merit against a global prune threshold.
    #[default]
    Global,
    /// Per-synapse neighbor activity vs. presynaptic growth pressure.
    Lateral,
}

/// Output head of the regime controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControllerHead {
    /// Softmax over named regimes, each a complete preset.
    #[default]
    Discrete,
    /// Small signed deltas per hyperparameter.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControllerConfig {
    pub head: ControllerHead,
    /// Hidden width of both recurrent cells.
    pub hidden: usize,
    pub short_init_scale: f32,
    pub long_init_scale: f32,
    /// Forget-gate bias of the long-term cell (higher integrates longer).
    pub long_forget_bias: f32,

    /// Softmax temperature; < 1 favors exploitation.
    pub temperature: f32,
    /// Minimum ticks a selected regime stays in force.
    pub lock_duration: u64,
    /// Initial ticks with the regime forced to STABILIZE.
    pub warmup_ticks: u64,
    /// Instantaneous loss above which STABILIZE is forced immediately.
    pub panic_loss: f32,

    /// Ticks between reward evaluations / policy updates.
    pub eval_interval: u64,
    pub reward_scale: f32,
    pub baseline_rate: f32,
    pub min_advantage: f32,
    /// Geometric decay of action eligibility traces per tick.
    pub trace_decay: f32,
    pub policy_lr: f32,
    pub gate_lr: f32,
    pub lstm_lr: f32,
    pub weight_clip: f32,

    /// Per-tick blend rate toward the selected preset.
    pub blend_rate: f32,
    /// Continuous head: maximum delta per hyperparameter per tick.
    pub delta_scale: f32,
    /// Continuous head: stddev of Gaussian exploration on the pre-tanh output.
    pub exploration_noise: f32,

    /// Length of the error window the features are computed over.
    pub feature_window: usize,
    /// Histogram bins for activation entropy.
    pub entropy_bins: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            head: ControllerHead::Discrete,
            hidden: 8,
            short_init_scale: 0.5,
            long_init_scale: 0.1,
            long_forget_bias: 2.0,
            temperature: 0.5,
            lock_duration: 50,
            warmup_ticks: 100,
            panic_loss: 2.0,
            eval_interval: 10,
            reward_scale: 10.0,
            baseline_rate: 0.05,
            min_advantage: 0.01,
            trace_decay: 0.9,
            policy_lr: 0.05,
            gate_lr: 0.01,
            lstm_lr: 0.005,
            weight_clip: 3.0,
            blend_rate: 0.05,
            delta_scale: 0.01,
            exploration_noise: 0.3,
            feature_window: 32,
            entropy_bins: 10,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hidden == 0 || self.hidden > 128 {
            return Err(ConfigError::OutOfRange {
                field: "controller.hidden",
                min: 1.0,
                max: 128.0,
                got: self.hidden as f32,
            });
        }
        check_range("controller.temperature", self.temperature, 1e-3, 10.0)?;
        check_range("controller.trace_decay", self.trace_decay, 0.0, 1.0)?;
        check_range("controller.baseline_rate", self.baseline_rate, 0.0, 1.0)?;
        check_range("controller.blend_rate", self.blend_rate, 0.0, 1.0)?;
        check_range("controller.panic_loss", self.panic_loss, 0.0, f32::MAX)?;
        for (field, v) in [
            ("controller.short_init_scale", self.short_init_scale),
            ("controller.long_init_scale", self.long_init_scale),
            ("controller.reward_scale", self.reward_scale),
            ("controller.min_advantage", self.min_advantage),
            ("controller.policy_lr", self.policy_lr),
            ("controller.gate_lr", self.gate_lr),
            ("controller.lstm_lr", self.lstm_lr),
            ("controller.weight_clip", self.weight_clip),
            ("controller.delta_scale", self.delta_scale),
            ("controller.exploration_noise", self.exploration_noise),
        ] {
            check_range(field, v, 0.0, f32::MAX)?;
        }
        if !self.long_forget_bias.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "controller.long_forget_bias",
                min: f32::MIN,
                max: f32::MAX,
                got: self.long_forget_bias,
            });
        }
        if self.eval_interval == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "controller.eval_interval",
            });
        }
        if self.feature_window < 4 {
            return Err(ConfigError::OutOfRange {
                field: "controller.feature_window",
                min: 4.0,
                max: f32::MAX,
                got: self.feature_window as f32,
            });
        }
        if self.entropy_bins < 2 {
            return Err(ConfigError::OutOfRange {
                field: "controller.entropy_bins",
                min: 2.0,
                max: f32::MAX,
                got: self.entropy_bins as f32,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReservoirConfig {
    pub max_neurons: usize,
    pub initial_neurons: usize,
    /// Fraction of possible synapses wired at creation.
    pub initial_density: f32,
    pub density_min: f32,
    pub density_max: f32,
    /// Probability that a new neuron is excitatory.
    pub excitatory_fraction: f32,
    /// Constrain every nonzero `weights[i][*]` to the sign of `neuron_types[i]`.
    pub dale_law: bool,

    // Structural triggers.
    pub prune_threshold: f32,
    pub patience_limit: u32,
    pub mitosis_cooldown: u64,
    pub solved_threshold: f32,
    pub unlock_threshold: f32,
    /// Minimum normalized loss-slope improvement that resets patience.
    pub learning_slope_threshold: f32,
    /// Length of the sliding loss window used for the slope.
    pub slope_window: usize,

    // Learning.
    pub hyper: HyperParams,
    pub hyper_bounds: HyperBounds,
    /// Per-step clamp on each readout update.
    pub readout_delta_clamp: f32,
    /// Absolute clamp on readout weights.
    pub readout_limit: f32,
    /// Short window (ticks) of the noise-floor estimate.
    pub noise_floor_window: usize,
    /// Learning-rate multiplier applied to samples judged as noise.
    pub noise_damping: f32,
    /// Rate of the error-modulated Hebbian rule on recurrent synapses.
    pub recurrent_learning_rate: f32,

    // Energy / fatigue.
    pub energy_enabled: bool,
    pub energy_min: f32,
    pub energy_max: f32,
    pub energy_depletion: f32,
    pub energy_recharge: f32,

    // Divergence guard.
    pub divergence_loss: f32,
    pub max_input_magnitude: f32,

    // Spectral regulator schedule.
    /// Networks at or below this size are regulated every tick.
    pub regulator_small_network: usize,
    pub regulator_every: u64,
    pub regulator_iterations: usize,
    pub regulator_burst_iterations: usize,
    pub emergency_iterations: usize,
    /// Sinkhorn-Knopp passes after mitosis (0 disables).
    pub sinkhorn_iterations: usize,

    // Structural plasticity.
    pub mitosis_seeding: MitosisSeeding,
    /// Relative perturbation of cloned weights.
    pub mitosis_noise: f32,
    /// Expected in/out connections of a newborn under preferential attachment.
    pub attach_fanout: usize,
    pub competition: CompetitionMode,
    pub lateral_radius: usize,
    pub lateral_gain: f32,
    pub lateral_decay: f32,
    pub readout_merit: f32,
    pub bridge_merit: f32,
    pub engram_merit: f32,
    pub engram_decay: f32,
    pub engram_gain: f32,
    pub winter_period: u64,
    pub winter_duration: u64,
    pub winter_multiplier: f32,
    pub max_regrowth_per_tick: usize,
    /// New synapse magnitude as a fraction of the spectral target.
    pub regrow_scale: f32,
    /// |activation| above which a neuron counts as active for rewiring.
    pub activity_threshold: f32,
    /// Prune pass cadence while locked (0 disables).
    pub heartbeat_prune_every: u64,

    pub controller: ControllerConfig,

    pub seed: Option<u64>,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            max_neurons: 64,
            initial_neurons: 8,
            initial_density: 0.25,
            density_min: 0.1,
            density_max: 0.5,
            excitatory_fraction: 0.8,
            dale_law: true,

            prune_threshold: 0.01,
            patience_limit: 50,
            mitosis_cooldown: 100,
            solved_threshold: 0.01,
            unlock_threshold: 0.04,
            learning_slope_threshold: 0.01,
            slope_window: 20,

            hyper: HyperParams::default(),
            hyper_bounds: HyperBounds::default(),
            readout_delta_clamp: 0.1,
            readout_limit: 10.0,
            noise_floor_window: 10,
            noise_damping: 0.8,
            recurrent_learning_rate: 0.002,

            energy_enabled: true,
            energy_min: 0.5,
            energy_max: 1.0,
            energy_depletion: 0.02,
            energy_recharge: 0.05,

            divergence_loss: 50.0,
            max_input_magnitude: 1.0e4,

            regulator_small_network: 32,
            regulator_every: 4,
            regulator_iterations: 1,
            regulator_burst_iterations: 8,
            emergency_iterations: 30,
            sinkhorn_iterations: 0,

            mitosis_seeding: MitosisSeeding::CloneParent,
            mitosis_noise: 0.1,
            attach_fanout: 4,
            competition: CompetitionMode::Global,
            lateral_radius: 2,
            lateral_gain: 0.05,
            lateral_decay: 0.05,
            readout_merit: 0.5,
            bridge_merit: 0.005,
            engram_merit: 1.0,
            engram_decay: 0.02,
            engram_gain: 1.0,
            winter_period: 500,
            winter_duration: 50,
            winter_multiplier: 3.0,
            max_regrowth_per_tick: 8,
            regrow_scale: 0.1,
            activity_threshold: 0.1,
            heartbeat_prune_every: 0,

            controller: ControllerConfig::default(),

            seed: None,
        }
    }
}

impl ReservoirConfig {
    /// Maximum allowed `max_neurons` (the dense matrix is `max_neurons²`).
    pub const MAX_NEURONS: usize = 4096;

    /// Create a config with the given capacity and starting size.
    ///
    /// # Panics
    /// Panics if `initial_neurons` is below 2 or above `max_neurons`.
    pub fn with_size(max_neurons: usize, initial_neurons: usize) -> Self {
        assert!(initial_neurons >= 2, "initial_neurons must be >= 2");
        assert!(
            initial_neurons <= max_neurons,
            "initial_neurons must be <= max_neurons"
        );
        assert!(
            max_neurons <= Self::MAX_NEURONS,
            "max_neurons must be <= {}",
            Self::MAX_NEURONS
        );
        Self {
            max_neurons,
            initial_neurons,
            ..Default::default()
        }
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_learning_rate(mut self, rate: f32) -> Self {
        self.hyper.learning_rate = rate;
        self
    }

    pub fn with_patience_limit(mut self, limit: u32) -> Self {
        self.patience_limit = limit;
        self
    }

    pub fn with_thresholds(mut self, solved: f32, unlock: f32) -> Self {
        self.solved_threshold = solved;
        self.unlock_threshold = unlock;
        self
    }

    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// Validate the configuration. Nothing is clamped silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_neurons < 2 || self.max_neurons > Self::MAX_NEURONS {
            return Err(ConfigError::MaxNeurons {
                min: 2,
                max: Self::MAX_NEURONS,
                got: self.max_neurons,
            });
        }
        if self.initial_neurons < 2 || self.initial_neurons > self.max_neurons {
            return Err(ConfigError::InitialNeurons {
                max: self.max_neurons,
                got: self.initial_neurons,
            });
        }
        if !(self.density_min.is_finite()
            && self.density_max.is_finite()
            && 0.0 < self.density_min
            && self.density_min < self.density_max
            && self.density_max <= 1.0)
        {
            return Err(ConfigError::DensityBounds {
                min: self.density_min,
                max: self.density_max,
            });
        }
        check_range("initial_density", self.initial_density, 0.0, 1.0)?;
        check_range("excitatory_fraction", self.excitatory_fraction, 0.0, 1.0)?;

        check_range("prune_threshold", self.prune_threshold, 0.0, f32::MAX)?;
        check_range("solved_threshold", self.solved_threshold, 0.0, f32::MAX)?;
        check_range("unlock_threshold", self.unlock_threshold, 0.0, f32::MAX)?;
        if self.solved_threshold >= self.unlock_threshold {
            return Err(ConfigError::ThresholdOrder {
                solved: self.solved_threshold,
                unlock: self.unlock_threshold,
            });
        }
        check_range(
            "learning_slope_threshold",
            self.learning_slope_threshold,
            0.0,
            f32::MAX,
        )?;
        if self.patience_limit == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "patience_limit",
            });
        }
        if self.slope_window < 2 {
            return Err(ConfigError::OutOfRange {
                field: "slope_window",
                min: 2.0,
                max: f32::MAX,
                got: self.slope_window as f32,
            });
        }

        self.hyper_bounds.validate()?;
        if !self.hyper.is_finite() || !self.hyper_bounds.contains(&self.hyper) {
            return Err(ConfigError::OutOfRange {
                field: "hyper",
                min: 0.0,
                max: f32::MAX,
                got: self.hyper.leak,
            });
        }
        check_range("readout_delta_clamp", self.readout_delta_clamp, 0.0, f32::MAX)?;
        check_range("readout_limit", self.readout_limit, 0.0, f32::MAX)?;
        check_range("noise_damping", self.noise_damping, 0.0, 1.0)?;
        check_range(
            "recurrent_learning_rate",
            self.recurrent_learning_rate,
            0.0,
            1.0,
        )?;
        if self.noise_floor_window == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "noise_floor_window",
            });
        }

        check_range("energy_min", self.energy_min, 0.0, self.energy_max)?;
        check_range("energy_max", self.energy_max, self.energy_min, 2.0)?;
        check_range("energy_depletion", self.energy_depletion, 0.0, 1.0)?;
        check_range("energy_recharge", self.energy_recharge, 0.0, 1.0)?;

        check_range("divergence_loss", self.divergence_loss, f32::MIN_POSITIVE, f32::MAX)?;
        check_range(
            "max_input_magnitude",
            self.max_input_magnitude,
            f32::MIN_POSITIVE,
            f32::MAX,
        )?;

        if self.regulator_every == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "regulator_every",
            });
        }
        if self.regulator_iterations == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "regulator_iterations",
            });
        }

        check_range("mitosis_noise", self.mitosis_noise, 0.0, 0.9)?;
        check_range("lateral_gain", self.lateral_gain, 0.0, f32::MAX)?;
        check_range("lateral_decay", self.lateral_decay, 0.0, 1.0)?;
        check_range("readout_merit", self.readout_merit, 0.0, f32::MAX)?;
        check_range("bridge_merit", self.bridge_merit, 0.0, f32::MAX)?;
        check_range("engram_merit", self.engram_merit, 0.0, f32::MAX)?;
        check_range("engram_decay", self.engram_decay, 0.0, 1.0)?;
        check_range("engram_gain", self.engram_gain, 0.0, f32::MAX)?;
        check_range("winter_multiplier", self.winter_multiplier, 1.0, f32::MAX)?;
        check_range("regrow_scale", self.regrow_scale, 0.0, 1.0)?;
        check_range("activity_threshold", self.activity_threshold, 0.0, 1.0)?;
        if self.winter_period > 0 && self.winter_duration >= self.winter_period {
            return Err(ConfigError::OutOfRange {
                field: "winter_duration",
                min: 0.0,
                max: self.winter_period as f32,
                got: self.winter_duration as f32,
            });
        }

        self.controller.validate()
    }
}

fn check_range(field: &'static str, v: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if v.is_finite() && v >= min && v <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            got: v,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ReservoirConfig::default().validate().is_ok());
    }

    #[test]
    fn builder() {
        let cfg = ReservoirConfig::with_size(128, 16)
            .with_seed(42)
            .with_learning_rate(0.02)
            .with_patience_limit(30);
        assert_eq!(cfg.max_neurons, 128);
        assert_eq!(cfg.initial_neurons, 16);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.hyper.learning_rate, 0.02);
        assert_eq!(cfg.patience_limit, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "initial_neurons must be <= max_neurons")]
    fn with_size_rejects_oversized_start() {
        let _ = ReservoirConfig::with_size(8, 16);
    }

    #[test]
    fn rejects_bad_density_bounds() {
        let cfg = ReservoirConfig {
            density_min: 0.6,
            density_max: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DensityBounds { .. })
        ));
    }

    #[test]
    fn rejects_threshold_order() {
        let cfg = ReservoirConfig::default().with_thresholds(0.1, 0.05);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_rates() {
        let cfg = ReservoirConfig {
            energy_depletion: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "energy_depletion",
                ..
            })
        ));
    }

    #[test]
    fn rejects_hyper_outside_bounds() {
        let mut cfg = ReservoirConfig::default();
        cfg.hyper.leak = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_controller() {
        let controller = ControllerConfig {
            eval_interval: 0,
            ..Default::default()
        };
        let cfg = ReservoirConfig::default().with_controller(controller);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroInterval {
                field: "controller.eval_interval"
            })
        );
    }
}
