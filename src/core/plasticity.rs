//! Structural plasticity: target-density dynamics, learning-progress
//! patience, neuron growth (mitosis), and synapse pruning / regrowth /
//! rewiring.
//!
//! Every mutation here renormalizes the rows it touched before returning, so
//! the global spectral regulator only ever has to correct small excursions.

use std::collections::VecDeque;

use crate::config::{CompetitionMode, MitosisSeeding, ReservoirConfig};
use crate::network::{Network, NeuronId, EXCITATORY, INHIBITORY};
use crate::prng::Prng;

/// Activation floor so silent neurons keep a nonzero attachment probability.
const ATTACH_FLOOR: f32 = 1e-3;
/// Tolerance around `excitatory_fraction` before newborn types are forced.
const TYPE_DRIFT: f32 = 0.05;

/// Result of a successful mitosis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MitosisOutcome {
    pub neuron: NeuronId,
    pub excitatory: bool,
    /// Neuron whose connections were cloned (clone seeding only).
    pub parent: Option<NeuronId>,
    /// Synapses created into and out of the newborn.
    pub synapses: usize,
}

/// Result of a rewiring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewireOutcome {
    pub wired: usize,
    /// No active/inactive pair existed; the deficit was filled at random.
    pub fell_back: bool,
}

/// Sliding window of recent losses used to measure learning progress.
///
/// Progress is the drop from the first half of the window to the second
/// half, relative to the first half. Positive means the loss is falling.
#[derive(Debug, Clone)]
pub struct SlopeTracker {
    window: VecDeque<f32>,
    capacity: usize,
}

impl SlopeTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, loss: f32) {
        if !loss.is_finite() {
            return;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(loss);
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn improvement(&self) -> f32 {
        let len = self.window.len();
        if len < 2 {
            return 0.0;
        }
        let half = len / 2;
        let first: f32 = self.window.iter().take(half).sum();
        let second: f32 = self.window.iter().skip(len - half).sum();
        if first <= f32::EPSILON {
            return 0.0;
        }
        (first - second) / first
    }
}

/// Whether the periodic synapse winter is in force at `step`.
///
/// Winter engages every `winter_period` ticks (never during the first
/// period) and lasts `winter_duration` ticks.
pub fn is_winter(step: u64, cfg: &ReservoirConfig) -> bool {
    cfg.winter_period > 0
        && cfg.winter_duration > 0
        && step >= cfg.winter_period
        && step % cfg.winter_period < cfg.winter_duration
}

impl Network {
    /// Lotka-Volterra update of the target density.
    ///
    /// `Δd = lv_growth·d·demand − lv_decay·d²`, where demand is the smoothed
    /// loss relative to the unlock threshold (capped at 2). Winter multiplies
    /// the competition term.
    pub(crate) fn update_target_density(
        &mut self,
        avg_loss: f32,
        cfg: &ReservoirConfig,
        winter: bool,
    ) -> f32 {
        let demand = if avg_loss.is_finite() {
            (avg_loss / cfg.unlock_threshold).clamp(0.0, 2.0)
        } else {
            0.0
        };
        let decay = if winter {
            self.hyper.lv_decay * cfg.winter_multiplier
        } else {
            self.hyper.lv_decay
        };
        let d = self.target_density;
        let next = d + self.hyper.lv_growth * d * demand - decay * d * d;
        self.target_density = if next.is_finite() {
            next.clamp(cfg.density_min, cfg.density_max)
        } else {
            cfg.density_min
        };
        self.target_density
    }

    fn synapse_magnitude(&self, cfg: &ReservoirConfig, rng: &mut Prng) -> f32 {
        rng.gen_range_f32(0.1, 1.0) * self.hyper.spectral_target * cfg.regrow_scale
    }

    fn newborn_type(&self, cfg: &ReservoirConfig, rng: &mut Prng) -> i8 {
        let frac = self.excitatory_fraction();
        if frac < cfg.excitatory_fraction - TYPE_DRIFT {
            EXCITATORY
        } else if frac > cfg.excitatory_fraction + TYPE_DRIFT {
            INHIBITORY
        } else if rng.chance(cfg.excitatory_fraction) {
            EXCITATORY
        } else {
            INHIBITORY
        }
    }

    fn most_active(&self) -> Option<NeuronId> {
        let mut best: Option<(NeuronId, f32)> = None;
        for i in 0..self.size {
            let a = self.activations[i].abs();
            if best.map(|b| a > b.1).unwrap_or(true) {
                best = Some((i, a));
            }
        }
        best.map(|b| b.0)
    }

    /// Append one neuron at index `size`.
    ///
    /// Returns `None` at capacity. The newborn's readout starts at exactly
    /// zero; every row that received a synapse is renormalized to the
    /// spectral target.
    pub(crate) fn mitosis(&mut self, cfg: &ReservoirConfig, rng: &mut Prng) -> Option<MitosisOutcome> {
        if self.size >= self.max_neurons {
            return None;
        }
        let new = self.size;
        let stride = self.max_neurons;
        let ty = self.newborn_type(cfg, rng);

        self.neuron_types[new] = ty;
        self.readout[new] = 0.0;
        self.activations[new] = 0.0;
        self.prev_activations[new] = 0.0;
        self.energy[new] = cfg.energy_max;
        self.spectral_u[new] = 0.0;
        self.spectral_v[new] = 0.0;
        self.size += 1;

        let mut touched = vec![new];
        let mut synapses = 0;
        let mut parent = None;

        match cfg.mitosis_seeding {
            MitosisSeeding::CloneParent => {
                let p = self.most_active().filter(|p| *p != new);
                parent = p;
                if let Some(p) = p {
                    let noise = cfg.mitosis_noise;
                    self.input_weights[new] =
                        self.input_weights[p] * (1.0 + noise * rng.gen_range_f32(-1.0, 1.0));

                    // Incoming: copy the parent's row.
                    for j in 0..new {
                        let w = self.weights[p * stride + j];
                        if w == 0.0 {
                            continue;
                        }
                        let mag = w.abs() * (1.0 + noise * rng.gen_range_f32(-1.0, 1.0));
                        let sign = if self.dale_law { ty as f32 } else { w.signum() };
                        self.weights[new * stride + j] = sign * mag;
                        synapses += 1;
                    }
                    // Outgoing: copy the parent's column. Row i keeps its own sign.
                    for i in 0..new {
                        let w = self.weights[i * stride + p];
                        if w == 0.0 {
                            continue;
                        }
                        let mag = w.abs() * (1.0 + noise * rng.gen_range_f32(-1.0, 1.0));
                        self.weights[i * stride + new] = w.signum() * mag;
                        touched.push(i);
                        synapses += 1;
                    }
                } else {
                    self.input_weights[new] = rng.gen_range_f32(-1.0, 1.0);
                }
            }
            MitosisSeeding::PreferentialAttachment => {
                self.input_weights[new] = rng.gen_range_f32(-1.0, 1.0);
                let mass: Vec<f32> = (0..new)
                    .map(|i| self.activations[i].abs() + ATTACH_FLOOR)
                    .collect();

                for _ in 0..cfg.attach_fanout {
                    // Presynaptic partner feeding the newborn.
                    if let Some(j) = rng.weighted_index(&mass) {
                        let idx = new * stride + j;
                        if self.weights[idx] == 0.0 {
                            self.weights[idx] = self.row_sign(new, rng) * self.synapse_magnitude(cfg, rng);
                            synapses += 1;
                        }
                    }
                    // Postsynaptic partner driven by the newborn.
                    if let Some(i) = rng.weighted_index(&mass) {
                        let idx = i * stride + new;
                        if self.weights[idx] == 0.0 {
                            self.weights[idx] = self.row_sign(i, rng) * self.synapse_magnitude(cfg, rng);
                            touched.push(i);
                            synapses += 1;
                        }
                    }
                }
            }
        }

        let limit = self.hyper.spectral_target;
        touched.sort_unstable();
        touched.dedup();
        for i in touched {
            self.normalize_row(i, limit);
        }

        Some(MitosisOutcome {
            neuron: new,
            excitatory: ty == EXCITATORY,
            parent,
            synapses,
        })
    }

    /// Remove synapses whose magnitude plus intrinsic merit falls below the
    /// prune threshold (multiplied during winter). Returns the count removed.
    pub(crate) fn prune(&mut self, cfg: &ReservoirConfig, winter: bool) -> usize {
        let threshold = if winter {
            cfg.prune_threshold * cfg.winter_multiplier
        } else {
            cfg.prune_threshold
        };
        match cfg.competition {
            CompetitionMode::Global => self.prune_global(cfg, threshold),
            CompetitionMode::Lateral => self.prune_lateral(cfg, threshold, true),
        }
    }

    /// Maintenance prune while the network is locked.
    ///
    /// Removes sub-threshold synapses only; surviving weights are left
    /// exactly as they are, so lateral competition does not decay them.
    pub(crate) fn heartbeat_prune(&mut self, cfg: &ReservoirConfig) -> usize {
        match cfg.competition {
            CompetitionMode::Global => self.prune_global(cfg, cfg.prune_threshold),
            CompetitionMode::Lateral => self.prune_lateral(cfg, cfg.prune_threshold, false),
        }
    }

    /// Merit of the synapse `j → i`: readout contribution of the receiver,
    /// an E/I bridge bonus, and the engram trace.
    fn synapse_merit(&self, i: NeuronId, j: NeuronId, cfg: &ReservoirConfig) -> f32 {
        let contribution = (self.readout[i] * self.activations[i]).abs();
        let bridge = if self.neuron_types[i] != self.neuron_types[j] {
            cfg.bridge_merit
        } else {
            0.0
        };
        cfg.readout_merit * contribution + bridge + cfg.engram_merit * self.engram[self.idx(i, j)]
    }

    fn prune_global(&mut self, cfg: &ReservoirConfig, threshold: f32) -> usize {
        let n = self.size;
        let mut removed = 0;
        for i in 0..n {
            for j in 0..n {
                let idx = self.idx(i, j);
                let w = self.weights[idx];
                if w == 0.0 {
                    continue;
                }
                if w.abs() + self.synapse_merit(i, j, cfg) < threshold {
                    self.weights[idx] = 0.0;
                    self.engram[idx] = 0.0;
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Spatially local competition inside each row.
    ///
    /// A synapse whose neighbors (same row, columns within `lateral_radius`)
    /// carry more squared weight than its own growth pressure (presynaptic
    /// energy times `lateral_gain`) is weakened by `lateral_decay`; anything
    /// left under the threshold is removed. With `compete` off only the
    /// removal runs.
    fn prune_lateral(&mut self, cfg: &ReservoirConfig, threshold: f32, compete: bool) -> usize {
        let n = self.size;
        let stride = self.max_neurons;
        let r = cfg.lateral_radius;
        let mut removed = 0;
        let mut row = vec![0.0f32; n];

        for i in 0..n {
            row.copy_from_slice(&self.weights[i * stride..i * stride + n]);
            for j in 0..n {
                let w = row[j];
                if w == 0.0 {
                    continue;
                }
                let lo = j.saturating_sub(r);
                let hi = (j + r).min(n - 1);
                let neighbor: f32 = (lo..=hi).filter(|k| *k != j).map(|k| row[k] * row[k]).sum();
                let pressure = cfg.lateral_gain * self.energy[j];

                let idx = i * stride + j;
                let mut next = w;
                if compete && neighbor > pressure {
                    next *= 1.0 - cfg.lateral_decay;
                }
                if next.abs() < threshold {
                    self.weights[idx] = 0.0;
                    self.engram[idx] = 0.0;
                    removed += 1;
                } else {
                    self.weights[idx] = next;
                }
            }
        }
        removed
    }

    fn connection_deficit(&self) -> usize {
        self.target_connections().saturating_sub(self.connection_count())
    }

    /// Fill the gap to the density target with small random synapses.
    ///
    /// At most `max_regrowth_per_tick` synapses; gives up after
    /// `4 × deficit` candidate draws.
    pub(crate) fn regrow(&mut self, cfg: &ReservoirConfig, rng: &mut Prng) -> usize {
        let n = self.size;
        let deficit = self.connection_deficit();
        if n < 2 || deficit == 0 {
            return 0;
        }
        let budget = deficit.min(cfg.max_regrowth_per_tick);
        let mut attempts = deficit * 4;
        let mut touched = Vec::new();
        let mut grown = 0;

        while grown < budget && attempts > 0 {
            attempts -= 1;
            let i = rng.gen_range_usize(0, n);
            let j = rng.gen_range_usize(0, n);
            let idx = self.idx(i, j);
            if i == j || self.weights[idx] != 0.0 {
                continue;
            }
            self.weights[idx] = self.row_sign(i, rng) * self.synapse_magnitude(cfg, rng);
            touched.push(i);
            grown += 1;
        }

        let limit = self.hyper.spectral_target;
        touched.sort_unstable();
        touched.dedup();
        for i in touched {
            self.normalize_row(i, limit);
        }
        grown
    }

    /// Connect active neurons (senders) into inactive ones (receivers).
    ///
    /// Falls back to [`Network::regrow`] when no active/inactive pair exists.
    pub(crate) fn rewire(&mut self, cfg: &ReservoirConfig, rng: &mut Prng) -> RewireOutcome {
        let n = self.size;
        let deficit = self.connection_deficit();
        if n < 2 || deficit == 0 {
            return RewireOutcome::default();
        }

        let (active, inactive): (Vec<NeuronId>, Vec<NeuronId>) =
            (0..n).partition(|i| self.activations[*i].abs() >= cfg.activity_threshold);
        if active.is_empty() || inactive.is_empty() {
            return RewireOutcome {
                wired: self.regrow(cfg, rng),
                fell_back: true,
            };
        }

        let budget = deficit.min(cfg.max_regrowth_per_tick);
        let mut attempts = deficit * 4;
        let mut touched = Vec::new();
        let mut wired = 0;

        while wired < budget && attempts > 0 {
            attempts -= 1;
            let pre = active[rng.gen_range_usize(0, active.len())];
            let post = inactive[rng.gen_range_usize(0, inactive.len())];
            let idx = self.idx(post, pre);
            if self.weights[idx] != 0.0 {
                continue;
            }
            self.weights[idx] = self.row_sign(post, rng) * self.synapse_magnitude(cfg, rng);
            touched.push(post);
            wired += 1;
        }

        let limit = self.hyper.spectral_target;
        touched.sort_unstable();
        touched.dedup();
        for i in touched {
            self.normalize_row(i, limit);
        }
        RewireOutcome {
            wired,
            fell_back: false,
        }
    }

    /// Geometric decay of every engram trace in the active block.
    pub(crate) fn decay_engrams(&mut self, cfg: &ReservoirConfig) {
        let n = self.size;
        let stride = self.max_neurons;
        let keep = 1.0 - cfg.engram_decay;
        for i in 0..n {
            for e in &mut self.engram[i * stride..i * stride + n] {
                *e *= keep;
            }
        }
    }
}
