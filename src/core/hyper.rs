//! Live hyperparameters and the named operating regimes.
//!
//! `HyperParams` is the only channel through which the regime controller
//! affects the reservoir. The controller proposes; the engine applies the
//! proposal here, under `HyperBounds`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Number of live hyperparameters (length of the continuous delta head).
pub const HYPER_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HyperParams {
    /// Blend factor of the new tanh drive vs. the previous activation (0..1].
    pub leak: f32,
    /// Ceiling for the recurrent matrix's dominant singular value.
    pub spectral_target: f32,
    pub input_scale: f32,
    pub learning_rate: f32,
    /// EMA rate of the smoothed loss.
    pub smoothing_factor: f32,
    /// Lotka-Volterra growth rate of the target density.
    pub lv_growth: f32,
    /// Lotka-Volterra competition (self-limiting) rate of the target density.
    pub lv_decay: f32,
    /// Multiplier applied to the readout dot product.
    pub output_gain: f32,
}

impl Default for HyperParams {
    fn default() -> Self {
        Strategy::Exploit.preset()
    }
}

impl HyperParams {
    pub fn to_array(&self) -> [f32; HYPER_COUNT] {
        [
            self.leak,
            self.spectral_target,
            self.input_scale,
            self.learning_rate,
            self.smoothing_factor,
            self.lv_growth,
            self.lv_decay,
            self.output_gain,
        ]
    }

    pub fn from_array(v: [f32; HYPER_COUNT]) -> Self {
        Self {
            leak: v[0],
            spectral_target: v[1],
            input_scale: v[2],
            learning_rate: v[3],
            smoothing_factor: v[4],
            lv_growth: v[5],
            lv_decay: v[6],
            output_gain: v[7],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|x| x.is_finite())
    }

    /// Move each field a fraction `rate` of the way toward `target`, then clamp.
    pub fn blend_toward(&mut self, target: &HyperParams, rate: f32, bounds: &HyperBounds) {
        let rate = rate.clamp(0.0, 1.0);
        let cur = self.to_array();
        let tgt = target.to_array();
        let mut next = [0.0; HYPER_COUNT];
        for k in 0..HYPER_COUNT {
            next[k] = cur[k] + rate * (tgt[k] - cur[k]);
        }
        *self = bounds.clamp(&HyperParams::from_array(next));
    }

    /// Add signed deltas field-by-field, then clamp. Non-finite deltas are ignored.
    pub fn apply_deltas(&mut self, deltas: &[f32; HYPER_COUNT], bounds: &HyperBounds) {
        let mut next = self.to_array();
        for (x, d) in next.iter_mut().zip(deltas.iter()) {
            if d.is_finite() {
                *x += d;
            }
        }
        *self = bounds.clamp(&HyperParams::from_array(next));
    }
}

/// Inclusive per-field bounds enforced whenever hyperparameters change.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HyperBounds {
    pub min: HyperParams,
    pub max: HyperParams,
}

impl Default for HyperBounds {
    fn default() -> Self {
        Self {
            min: HyperParams {
                leak: 0.05,
                spectral_target: 0.1,
                input_scale: 0.05,
                learning_rate: 0.0,
                smoothing_factor: 0.005,
                lv_growth: 0.0,
                lv_decay: 0.0,
                output_gain: 0.25,
            },
            max: HyperParams {
                leak: 1.0,
                spectral_target: 1.5,
                input_scale: 3.0,
                learning_rate: 0.5,
                smoothing_factor: 0.5,
                lv_growth: 0.5,
                lv_decay: 0.5,
                output_gain: 2.0,
            },
        }
    }
}

const FIELD_NAMES: [&str; HYPER_COUNT] = [
    "leak",
    "spectral_target",
    "input_scale",
    "learning_rate",
    "smoothing_factor",
    "lv_growth",
    "lv_decay",
    "output_gain",
];

impl HyperBounds {
    pub fn clamp(&self, hp: &HyperParams) -> HyperParams {
        let lo = self.min.to_array();
        let hi = self.max.to_array();
        let mut v = hp.to_array();
        for k in 0..HYPER_COUNT {
            // A NaN field falls back to the lower bound rather than leaking.
            v[k] = if v[k].is_nan() { lo[k] } else { v[k].clamp(lo[k], hi[k]) };
        }
        HyperParams::from_array(v)
    }

    pub fn contains(&self, hp: &HyperParams) -> bool {
        let lo = self.min.to_array();
        let hi = self.max.to_array();
        hp.to_array()
            .iter()
            .enumerate()
            .all(|(k, x)| *x >= lo[k] && *x <= hi[k])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lo = self.min.to_array();
        let hi = self.max.to_array();
        for k in 0..HYPER_COUNT {
            if !lo[k].is_finite() || !hi[k].is_finite() || lo[k] > hi[k] || lo[k] < 0.0 {
                return Err(ConfigError::InvertedBounds {
                    field: FIELD_NAMES[k],
                    min: lo[k],
                    max: hi[k],
                });
            }
        }
        if self.min.leak <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "hyper_bounds.min.leak",
                min: f32::MIN_POSITIVE,
                max: 1.0,
                got: self.min.leak,
            });
        }
        if self.max.leak > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "hyper_bounds.max.leak",
                min: 0.0,
                max: 1.0,
                got: self.max.leak,
            });
        }
        Ok(())
    }
}

/// Named operating regimes selectable by the discrete controller head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Strategy {
    Explore,
    #[default]
    Exploit,
    /// The most conservative preset; forced during warmup and panic.
    Stabilize,
    Reset,
    Consolidate,
}

/// Which structural action a regime nudges the plasticity engine toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StructuralBias {
    #[default]
    None,
    /// Grow synapses toward inactive capacity.
    Rewire,
    /// Grow synapses at random.
    Regrow,
    Prune,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Explore,
        Strategy::Exploit,
        Strategy::Stabilize,
        Strategy::Reset,
        Strategy::Consolidate,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        match self {
            Strategy::Explore => 0,
            Strategy::Exploit => 1,
            Strategy::Stabilize => 2,
            Strategy::Reset => 3,
            Strategy::Consolidate => 4,
        }
    }

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i.min(Self::COUNT - 1)]
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Explore => "EXPLORE",
            Strategy::Exploit => "EXPLOIT",
            Strategy::Stabilize => "STABILIZE",
            Strategy::Reset => "RESET",
            Strategy::Consolidate => "CONSOLIDATE",
        }
    }

    /// The complete hyperparameter preset of this regime.
    pub fn preset(self) -> HyperParams {
        match self {
            Strategy::Explore => HyperParams {
                leak: 0.5,
                spectral_target: 0.95,
                input_scale: 1.1,
                learning_rate: 0.08,
                smoothing_factor: 0.08,
                lv_growth: 0.08,
                lv_decay: 0.08,
                output_gain: 1.0,
            },
            Strategy::Exploit => HyperParams {
                leak: 0.4,
                spectral_target: 0.9,
                input_scale: 1.0,
                learning_rate: 0.05,
                smoothing_factor: 0.05,
                lv_growth: 0.05,
                lv_decay: 0.1,
                output_gain: 1.0,
            },
            Strategy::Stabilize => HyperParams {
                leak: 0.4,
                spectral_target: 0.8,
                input_scale: 0.9,
                learning_rate: 0.03,
                smoothing_factor: 0.04,
                lv_growth: 0.02,
                lv_decay: 0.15,
                output_gain: 1.0,
            },
            Strategy::Reset => HyperParams {
                leak: 0.55,
                spectral_target: 0.9,
                input_scale: 1.0,
                learning_rate: 0.1,
                smoothing_factor: 0.1,
                lv_growth: 0.1,
                lv_decay: 0.05,
                output_gain: 1.0,
            },
            Strategy::Consolidate => HyperParams {
                leak: 0.4,
                spectral_target: 0.85,
                input_scale: 1.0,
                learning_rate: 0.03,
                smoothing_factor: 0.04,
                lv_growth: 0.03,
                lv_decay: 0.12,
                output_gain: 1.0,
            },
        }
    }

    pub fn structural_bias(self) -> StructuralBias {
        match self {
            Strategy::Explore => StructuralBias::Rewire,
            Strategy::Reset => StructuralBias::Regrow,
            Strategy::Stabilize | Strategy::Consolidate => StructuralBias::Prune,
            Strategy::Exploit => StructuralBias::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_sit_inside_default_bounds() {
        let bounds = HyperBounds::default();
        for s in Strategy::ALL {
            assert!(bounds.contains(&s.preset()), "{} preset out of bounds", s.name());
        }
        assert!(bounds.validate().is_ok());
    }

    #[test]
    fn stabilize_is_the_most_conservative_spectral_target() {
        let min = Strategy::ALL
            .iter()
            .map(|s| s.preset().spectral_target)
            .fold(f32::INFINITY, f32::min);
        assert_eq!(Strategy::Stabilize.preset().spectral_target, min);
    }

    #[test]
    fn blend_moves_partway_and_clamps() {
        let bounds = HyperBounds::default();
        let mut hp = Strategy::Exploit.preset();
        let target = Strategy::Reset.preset();
        hp.blend_toward(&target, 0.5, &bounds);
        assert!((hp.learning_rate - 0.075).abs() < 1e-6);

        hp.blend_toward(&target, 1.0, &bounds);
        assert_eq!(hp, target);
    }

    #[test]
    fn deltas_are_clamped_and_nan_ignored() {
        let bounds = HyperBounds::default();
        let mut hp = HyperParams::default();
        let mut deltas = [0.0; HYPER_COUNT];
        deltas[0] = 10.0;
        deltas[3] = f32::NAN;
        hp.apply_deltas(&deltas, &bounds);
        assert_eq!(hp.leak, bounds.max.leak);
        assert_eq!(hp.learning_rate, HyperParams::default().learning_rate);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut bounds = HyperBounds::default();
        bounds.min.input_scale = 4.0;
        assert!(matches!(
            bounds.validate(),
            Err(ConfigError::InvertedBounds { field: "input_scale", .. })
        ));
    }

    #[test]
    fn index_roundtrip() {
        for s in Strategy::ALL {
            assert_eq!(Strategy::from_index(s.index()), s);
        }
    }
}
