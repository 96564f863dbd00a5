//! The single mutable network aggregate.
//!
//! Storage is dense: `weights` is a row-major `max_neurons × max_neurons`
//! buffer where row = postsynaptic (receiver) and column = presynaptic
//! (sender). A zero entry means "no synapse". Only the leading
//! `size × size` block is live; the rest stays zero until mitosis reaches it.
//!
//! A sparse row-list layout (`Vec<(col, weight)>` per row) is the scaling
//! path past a few thousand neurons; at reservoir sizes the dense block
//! keeps power iteration and global normalization trivial.

use crate::config::ReservoirConfig;
use crate::hyper::HyperParams;
use crate::prng::Prng;

pub type NeuronId = usize;

pub const EXCITATORY: i8 = 1;
pub const INHIBITORY: i8 = -1;

#[derive(Debug, Clone)]
pub struct Network {
    pub(crate) max_neurons: usize,
    pub(crate) size: usize,
    pub(crate) dale_law: bool,

    pub(crate) activations: Vec<f32>,
    pub(crate) prev_activations: Vec<f32>,
    pub(crate) weights: Vec<f32>,
    pub(crate) readout: Vec<f32>,
    pub(crate) input_weights: Vec<f32>,
    pub(crate) neuron_types: Vec<i8>,

    /// Metabolic availability per neuron, within `[energy_min, energy_max]`.
    pub(crate) energy: Vec<f32>,
    /// Decaying trace of recent learning per synapse (same layout as `weights`).
    pub(crate) engram: Vec<f32>,

    pub(crate) target_density: f32,
    pub(crate) patience: u32,
    pub(crate) locked: bool,

    pub(crate) hyper: HyperParams,

    // Warm-started power-iteration vectors and the last estimate.
    pub(crate) spectral_u: Vec<f32>,
    pub(crate) spectral_v: Vec<f32>,
    pub(crate) spectral_radius: f32,
}

impl Network {
    pub fn new(cfg: &ReservoirConfig, rng: &mut Prng) -> Self {
        let max = cfg.max_neurons;
        let n = cfg.initial_neurons.min(max);

        let mut net = Self {
            max_neurons: max,
            size: n,
            dale_law: cfg.dale_law,
            activations: vec![0.0; max],
            prev_activations: vec![0.0; max],
            weights: vec![0.0; max * max],
            readout: vec![0.0; max],
            input_weights: vec![0.0; max],
            neuron_types: vec![EXCITATORY; max],
            energy: vec![cfg.energy_max; max],
            engram: vec![0.0; max * max],
            target_density: cfg
                .initial_density
                .clamp(cfg.density_min, cfg.density_max),
            patience: 0,
            locked: false,
            hyper: cfg.hyper,
            spectral_u: vec![0.0; max],
            spectral_v: vec![0.0; max],
            spectral_radius: 0.0,
        };

        for i in 0..n {
            net.neuron_types[i] = if rng.chance(cfg.excitatory_fraction) {
                EXCITATORY
            } else {
                INHIBITORY
            };
            net.input_weights[i] = rng.gen_range_f32(-1.0, 1.0);
        }

        // Sparse random topology; self-loops excluded.
        for i in 0..n {
            for j in 0..n {
                if i == j || !rng.chance(cfg.initial_density) {
                    continue;
                }
                let mag = rng.gen_range_f32(0.05, 1.0);
                let sign = net.row_sign(i, rng);
                net.weights[i * max + j] = sign * mag;
            }
        }

        let seed_val = 1.0 / (n as f32).sqrt();
        for k in 0..n {
            net.spectral_u[k] = seed_val;
            net.spectral_v[k] = seed_val;
        }

        net
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn max_neurons(&self) -> usize {
        self.max_neurons
    }

    #[inline]
    pub(crate) fn idx(&self, i: NeuronId, j: NeuronId) -> usize {
        i * self.max_neurons + j
    }

    #[inline]
    pub fn weight(&self, i: NeuronId, j: NeuronId) -> f32 {
        self.weights[self.idx(i, j)]
    }

    /// Sign new synapses in row `i` must take.
    ///
    /// Under Dale's Law this is the row neuron's type; otherwise a coin flip.
    pub(crate) fn row_sign(&self, i: NeuronId, rng: &mut Prng) -> f32 {
        if self.dale_law {
            self.neuron_types[i] as f32
        } else if rng.chance(0.5) {
            1.0
        } else {
            -1.0
        }
    }

    /// Number of nonzero synapses in the active block.
    pub fn connection_count(&self) -> usize {
        let n = self.size;
        (0..n)
            .map(|i| {
                let row = &self.weights[i * self.max_neurons..i * self.max_neurons + n];
                row.iter().filter(|w| **w != 0.0).count()
            })
            .sum()
    }

    /// Possible synapses in the active block (self-loops excluded).
    pub fn possible_connections(&self) -> usize {
        self.size * self.size.saturating_sub(1)
    }

    /// Connection count implied by the current target density.
    pub fn target_connections(&self) -> usize {
        (self.target_density * self.possible_connections() as f32).round() as usize
    }

    pub fn row_l1(&self, i: NeuronId) -> f32 {
        let n = self.size;
        let start = i * self.max_neurons;
        self.weights[start..start + n].iter().map(|w| w.abs()).sum()
    }

    /// Scale row `i` down so its L1 sum does not exceed `limit`.
    ///
    /// Cheap local fix applied right after a structural mutation touches a row.
    pub fn normalize_row(&mut self, i: NeuronId, limit: f32) {
        let l1 = self.row_l1(i);
        if l1 <= limit || l1 <= 0.0 {
            return;
        }
        let scale = limit / l1;
        let n = self.size;
        let start = i * self.max_neurons;
        for w in &mut self.weights[start..start + n] {
            *w *= scale;
        }
    }

    pub fn excitatory_fraction(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let exc = self.neuron_types[..self.size]
            .iter()
            .filter(|t| **t == EXCITATORY)
            .count();
        exc as f32 / self.size as f32
    }

    pub fn mean_energy(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        self.energy[..self.size].iter().sum::<f32>() / self.size as f32
    }

    /// Shannon entropy of the binned activation histogram over [-1, 1],
    /// normalized to [0, 1] by `ln(bins)`.
    pub fn activation_entropy(&self, bins: usize) -> f32 {
        let n = self.size;
        if n == 0 || bins < 2 {
            return 0.0;
        }
        let mut hist = vec![0usize; bins];
        for a in &self.activations[..n] {
            let x = if a.is_finite() { a.clamp(-1.0, 1.0) } else { 0.0 };
            let b = (((x + 1.0) * 0.5) * bins as f32) as usize;
            hist[b.min(bins - 1)] += 1;
        }
        let mut h = 0.0f32;
        for c in hist {
            if c == 0 {
                continue;
            }
            let p = c as f32 / n as f32;
            h -= p * p.ln();
        }
        (h / (bins as f32).ln()).clamp(0.0, 1.0)
    }

    /// Zero current and previous activations (emergency recovery).
    pub fn zero_state(&mut self) {
        for a in &mut self.activations {
            *a = 0.0;
        }
        for a in &mut self.prev_activations {
            *a = 0.0;
        }
    }

    /// Replace any non-finite weight or readout entry with zero.
    ///
    /// Returns how many entries were scrubbed.
    pub fn scrub_non_finite(&mut self) -> usize {
        let mut scrubbed = 0;
        for w in self.weights.iter_mut().chain(self.readout.iter_mut()) {
            if !w.is_finite() {
                *w = 0.0;
                scrubbed += 1;
            }
        }
        for e in &mut self.energy {
            if !e.is_finite() {
                *e = 1.0;
                scrubbed += 1;
            }
        }
        scrubbed
    }

    /// Count of nonzero weights whose sign disagrees with their row's type.
    pub fn dale_violations(&self) -> usize {
        let n = self.size;
        let mut bad = 0;
        for i in 0..n {
            let t = self.neuron_types[i] as f32;
            for j in 0..n {
                let w = self.weight(i, j);
                if w != 0.0 && w.signum() != t {
                    bad += 1;
                }
            }
        }
        bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(seed: u64) -> Network {
        let cfg = ReservoirConfig::default().with_seed(seed);
        let mut rng = Prng::new(seed);
        Network::new(&cfg, &mut rng)
    }

    #[test]
    fn fresh_network_shape() {
        let n = net(1);
        assert_eq!(n.size(), 8);
        assert_eq!(n.max_neurons(), 64);
        assert_eq!(n.weights.len(), 64 * 64);
        assert!(n.readout.iter().all(|r| *r == 0.0));
        assert!(n.activations.iter().all(|a| *a == 0.0));
        assert!(n.connection_count() > 0);
        for i in 0..n.size() {
            assert_eq!(n.weight(i, i), 0.0, "no self-loops at creation");
        }
    }

    #[test]
    fn inactive_block_is_empty() {
        let n = net(2);
        for i in n.size()..n.max_neurons() {
            for j in 0..n.max_neurons() {
                assert_eq!(n.weight(i, j), 0.0);
                assert_eq!(n.weight(j, i), 0.0);
            }
        }
    }

    #[test]
    fn fresh_network_respects_dale() {
        for seed in 1..20 {
            assert_eq!(net(seed).dale_violations(), 0);
        }
    }

    #[test]
    fn row_normalization_caps_l1() {
        let mut n = net(3);
        for j in 0..n.size() {
            let idx = n.idx(0, j);
            n.weights[idx] = if j == 0 { 0.0 } else { 0.9 };
        }
        n.normalize_row(0, 0.5);
        assert!((n.row_l1(0) - 0.5).abs() < 1e-5);

        // Already below the limit: untouched.
        let before = n.row_l1(0);
        n.normalize_row(0, 2.0);
        assert_eq!(n.row_l1(0), before);
    }

    #[test]
    fn entropy_extremes() {
        let mut n = net(4);
        n.zero_state();
        assert_eq!(n.activation_entropy(8), 0.0);
        for i in 0..n.size() {
            n.activations[i] = -1.0 + (2.0 * i as f32 + 1.0) / n.size() as f32;
        }
        assert!((n.activation_entropy(8) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn scrub_removes_nan() {
        let mut n = net(5);
        n.weights[1] = f32::NAN;
        n.readout[0] = f32::INFINITY;
        assert_eq!(n.scrub_non_finite(), 2);
        assert!(n.weights.iter().all(|w| w.is_finite()));
    }
}
