//! Reservoir core: leaky-integrator forward pass, online LMS readout, and the
//! error-modulated Hebbian rule on recurrent synapses.

use crate::config::ReservoirConfig;
use crate::dense::{self, ExecutionTier};
use crate::network::Network;

/// Smallest magnitude a sign-clamped synapse is held at instead of flipping.
const MIN_SYNAPSE: f32 = 1e-4;

impl Network {
    /// Advance every active neuron by one tick and return the readout.
    ///
    /// `a[i] = (1-leak)·prev[i] + leak·tanh(Σ_j w[i][j]·prev[j] + w_in[i]·input·input_scale)`,
    /// then optionally scaled by the neuron's energy, which is depleted by use
    /// and recharged toward `energy_max`.
    pub(crate) fn forward(&mut self, input: f32, cfg: &ReservoirConfig, tier: ExecutionTier) -> f32 {
        let n = self.size;
        let stride = self.max_neurons;
        let hp = self.hyper;

        self.prev_activations[..n].copy_from_slice(&self.activations[..n]);

        let mut drive = vec![0.0f32; n];
        dense::matvec(&self.weights, stride, n, &self.prev_activations, &mut drive, tier);

        let leak = hp.leak;
        let scaled_input = input * hp.input_scale;
        for i in 0..n {
            let s = drive[i] + self.input_weights[i] * scaled_input;
            let mut a = (1.0 - leak) * self.prev_activations[i] + leak * s.tanh();

            if cfg.energy_enabled {
                let e = self.energy[i];
                a *= e;
                let next = e - cfg.energy_depletion * a.abs()
                    + cfg.energy_recharge * (cfg.energy_max - e);
                self.energy[i] = next.clamp(cfg.energy_min, cfg.energy_max);
            }

            self.activations[i] = a;
        }

        hp.output_gain * dense::dot(&self.activations[..n], &self.readout[..n], tier)
    }

    /// One LMS step on the readout: `readout[i] += lr·error·a[i]`, each delta
    /// clamped to ±`readout_delta_clamp`. Returns the L1 of applied deltas.
    pub(crate) fn learn_readout(&mut self, error: f32, lr: f32, cfg: &ReservoirConfig) -> f32 {
        if lr <= 0.0 || !error.is_finite() {
            return 0.0;
        }
        let clamp = cfg.readout_delta_clamp;
        let limit = cfg.readout_limit;
        let mut l1 = 0.0;
        for i in 0..self.size {
            let delta = (lr * error * self.activations[i]).clamp(-clamp, clamp);
            let prev = self.readout[i];
            self.readout[i] = (prev + delta).clamp(-limit, limit);
            l1 += (self.readout[i] - prev).abs();
        }
        l1
    }

    /// Error-modulated Hebbian update on existing recurrent synapses.
    ///
    /// `modulation > 0` (this tick beat the running average) reinforces the
    /// current coactivity; `< 0` weakens it. Each update deposits into the
    /// synapse's engram trace. Returns the L1 of applied deltas.
    pub(crate) fn recurrent_plasticity(
        &mut self,
        modulation: f32,
        rate: f32,
        cfg: &ReservoirConfig,
    ) -> f32 {
        if rate <= 0.0 || modulation == 0.0 || !modulation.is_finite() {
            return 0.0;
        }
        let n = self.size;
        let stride = self.max_neurons;
        let gain = rate * modulation.clamp(-1.0, 1.0);
        let mut l1 = 0.0;

        for i in 0..n {
            let post = self.activations[i];
            if post == 0.0 {
                continue;
            }
            let row_type = self.neuron_types[i] as f32;
            for j in 0..n {
                let idx = i * stride + j;
                let w = self.weights[idx];
                if w == 0.0 {
                    continue;
                }
                let delta = gain * post * self.prev_activations[j];
                if delta == 0.0 {
                    continue;
                }
                let mut next = w + delta;
                if self.dale_law && next * row_type <= 0.0 {
                    next = row_type * MIN_SYNAPSE;
                } else if next == 0.0 {
                    next = w.signum() * MIN_SYNAPSE;
                }
                let applied = (next - w).abs();
                self.weights[idx] = next;
                self.engram[idx] += cfg.engram_gain * applied;
                l1 += applied;
            }
        }
        l1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::Prng;

    fn quiet_net() -> (Network, ReservoirConfig) {
        let cfg = ReservoirConfig {
            energy_enabled: false,
            ..ReservoirConfig::default().with_seed(1)
        };
        let mut rng = Prng::new(1);
        (Network::new(&cfg, &mut rng), cfg)
    }

    #[test]
    fn leaky_update_matches_formula() {
        let (mut net, cfg) = quiet_net();
        for w in net.weights.iter_mut() {
            *w = 0.0;
        }
        net.activations[0] = 0.5;
        net.input_weights[0] = 0.7;
        let leak = net.hyper.leak;
        let scale = net.hyper.input_scale;

        net.forward(0.3, &cfg, ExecutionTier::Scalar);

        let expected = (1.0 - leak) * 0.5 + leak * (0.7f32 * 0.3 * scale).tanh();
        assert!((net.activations[0] - expected).abs() < 1e-6);
        assert_eq!(net.prev_activations[0], 0.5);
    }

    #[test]
    fn prediction_is_gain_times_dot() {
        let (mut net, cfg) = quiet_net();
        for i in 0..net.size() {
            net.readout[i] = 0.1 * i as f32;
        }
        let p = net.forward(0.8, &cfg, ExecutionTier::Scalar);
        let manual: f32 = (0..net.size()).map(|i| net.readout[i] * net.activations[i]).sum();
        assert!((p - net.hyper.output_gain * manual).abs() < 1e-5);
    }

    #[test]
    fn energy_attenuates_and_stays_bounded() {
        let cfg = ReservoirConfig::default().with_seed(2);
        let mut rng = Prng::new(2);
        let mut net = Network::new(&cfg, &mut rng);
        for _ in 0..200 {
            net.forward(1.0, &cfg, ExecutionTier::Scalar);
            for i in 0..net.size() {
                assert!(net.energy[i] >= cfg.energy_min && net.energy[i] <= cfg.energy_max);
            }
        }
        // Driven neurons have spent some energy.
        assert!(net.mean_energy() < cfg.energy_max);
    }

    #[test]
    fn readout_delta_is_clamped() {
        let (mut net, cfg) = quiet_net();
        net.activations[0] = 1.0;
        let l1 = net.learn_readout(100.0, 1.0, &cfg);
        assert!((net.readout[0] - cfg.readout_delta_clamp).abs() < 1e-6);
        assert!(l1 > 0.0);
    }

    #[test]
    fn zero_rate_freezes_readout() {
        let (mut net, cfg) = quiet_net();
        net.activations[..net.size].fill(0.5);
        let before = net.readout.clone();
        assert_eq!(net.learn_readout(0.7, 0.0, &cfg), 0.0);
        assert_eq!(net.readout, before);
    }

    #[test]
    fn recurrent_rule_respects_dale_and_feeds_engram() {
        let (mut net, cfg) = quiet_net();
        for i in 0..net.size() {
            net.activations[i] = 0.9;
            net.prev_activations[i] = -0.9;
        }
        // Large negative drive pushes every synapse toward a sign flip.
        for _ in 0..50 {
            net.recurrent_plasticity(1.0, 0.5, &cfg);
        }
        assert_eq!(net.dale_violations(), 0);
        assert!(net.engram.iter().any(|e| *e > 0.0));
    }
}
