//! Adaptive regime controller.
//!
//! Two small gated recurrent cells read the same feature vector: a
//! "short-term" cell initialized with large weights (reacts to spikes) and a
//! "long-term" cell with small weights and a high forget bias (integrates
//! slow trends). A learned sigmoid gate blends their hidden states, and one
//! of two heads turns the blend into a proposal:
//!
//! - discrete: softmax over [`Strategy`] presets, with hysteresis;
//! - continuous: tanh-bounded deltas per hyperparameter.
//!
//! Learning is REINFORCE without autodiff: eligibility traces of
//! `∂log π/∂W` are accumulated every tick and applied, scaled by the
//! baseline-subtracted reward, once per evaluation interval. The gate and the
//! cells' output gates get a one-step truncated gradient.
//!
//! The controller never touches the network. It returns a [`Proposal`] that
//! the engine applies under its own bounds.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{ControllerConfig, ControllerHead};
use crate::hyper::{HyperBounds, HyperParams, Strategy, StructuralBias, HYPER_COUNT};
use crate::prng::Prng;

pub const FEATURE_COUNT: usize = 10;

const PRE_CLAMP: f32 = 20.0;
const CELL_CLAMP: f32 = 10.0;
const EPS: f32 = 1e-6;
/// EMA rate of the smoothed-trend feature.
const TREND_SMOOTHING: f32 = 0.1;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-PRE_CLAMP, PRE_CLAMP)).exp())
}

/// A standard LSTM cell with clamped pre-activations and cell state.
///
/// Gate rows are laid out `[input | forget | candidate | output]`, each
/// `hidden` rows of `inputs + hidden` columns (the input concatenated with
/// the previous hidden state).
#[derive(Debug, Clone)]
pub struct LstmCell {
    inputs: usize,
    hidden: usize,
    w: Vec<f32>,
    b: Vec<f32>,
    h: Vec<f32>,
    c: Vec<f32>,
    // Cached from the last forward pass for the truncated gradient.
    z: Vec<f32>,
    out_gate: Vec<f32>,
}

impl LstmCell {
    pub fn new(inputs: usize, hidden: usize, init_scale: f32, forget_bias: f32, rng: &mut Prng) -> Self {
        let cols = inputs + hidden;
        let w = (0..4 * hidden * cols)
            .map(|_| rng.gen_range_f32(-init_scale, init_scale))
            .collect();
        let mut b = vec![0.0; 4 * hidden];
        for x in &mut b[hidden..2 * hidden] {
            *x = forget_bias;
        }
        Self {
            inputs,
            hidden,
            w,
            b,
            h: vec![0.0; hidden],
            c: vec![0.0; hidden],
            z: vec![0.0; cols],
            out_gate: vec![0.0; hidden],
        }
    }

    pub fn hidden_state(&self) -> &[f32] {
        &self.h
    }

    pub fn cell_state(&self) -> &[f32] {
        &self.c
    }

    pub fn forward(&mut self, x: &[f32]) -> &[f32] {
        let hd = self.hidden;
        let cols = self.inputs + hd;
        for (k, v) in x.iter().take(self.inputs).enumerate() {
            self.z[k] = if v.is_finite() { *v } else { 0.0 };
        }
        self.z[self.inputs..].copy_from_slice(&self.h);

        let mut pre = vec![0.0f32; 4 * hd];
        for (r, p) in pre.iter_mut().enumerate() {
            let row = &self.w[r * cols..(r + 1) * cols];
            let s: f32 = row.iter().zip(self.z.iter()).map(|(a, b)| a * b).sum();
            *p = (s + self.b[r]).clamp(-PRE_CLAMP, PRE_CLAMP);
        }

        for k in 0..hd {
            let i = sigmoid(pre[k]);
            let f = sigmoid(pre[hd + k]);
            let g = pre[2 * hd + k].tanh();
            let o = sigmoid(pre[3 * hd + k]);
            self.c[k] = (f * self.c[k] + i * g).clamp(-CELL_CLAMP, CELL_CLAMP);
            self.h[k] = o * self.c[k].tanh();
            self.out_gate[k] = o;
        }
        &self.h
    }

    /// One-step update of the output-gate weights given `∂J/∂h`.
    fn nudge_output_gate(&mut self, grad_h: &[f32], lr: f32, clip: f32) {
        let hd = self.hidden;
        let cols = self.inputs + hd;
        for k in 0..hd {
            let o = self.out_gate[k];
            let g = grad_h[k] * self.c[k].tanh() * o * (1.0 - o);
            if g == 0.0 || !g.is_finite() {
                continue;
            }
            let r = 3 * hd + k;
            for (w, z) in self.w[r * cols..(r + 1) * cols].iter_mut().zip(self.z.iter()) {
                *w = (*w + lr * g * z).clamp(-clip, clip);
            }
            self.b[r] = (self.b[r] + lr * g).clamp(-clip, clip);
        }
    }

    fn mean_activity(&self) -> f32 {
        if self.hidden == 0 {
            return 0.0;
        }
        self.h.iter().map(|x| x.abs()).sum::<f32>() / self.hidden as f32
    }
}

/// What the controller sees each tick. Borrowed, read-only.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Recent signed errors, oldest first.
    pub errors: &'a [f32],
    pub loss: f32,
    pub avg_loss: f32,
    /// Normalized activation entropy in [0, 1].
    pub entropy: f32,
    pub hyper: &'a HyperParams,
    pub bounds: &'a HyperBounds,
    pub density: f32,
    pub density_min: f32,
    pub density_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControllerMode {
    #[default]
    Warmup,
    Normal,
    Panic,
}

impl ControllerMode {
    pub fn name(self) -> &'static str {
        match self {
            ControllerMode::Warmup => "WARMUP",
            ControllerMode::Normal => "NORMAL",
            ControllerMode::Panic => "PANIC",
        }
    }
}

/// A regime change proposed to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Proposal {
    /// Move the live hyperparameters toward `strategy`'s preset by `rate`.
    Preset { strategy: Strategy, rate: f32 },
    /// Add these deltas field-by-field.
    Deltas([f32; HYPER_COUNT]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub mode: ControllerMode,
    pub strategy: Strategy,
    pub bias: StructuralBias,
    pub proposal: Proposal,
    /// `(from, to)` when the strategy changed this tick.
    pub switched: Option<(Strategy, Strategy)>,
    /// Reward computed this tick (evaluation ticks only).
    pub reward: Option<f32>,
}

/// Read-only view of the controller's internals for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControllerIntrospection {
    pub mode: ControllerMode,
    pub strategy: Strategy,
    /// Mean |h| of the short-term cell.
    pub short_activity: f32,
    /// Mean |h| of the long-term cell.
    pub long_activity: f32,
    /// Blend gate value: 1 = all short-term, 0 = all long-term.
    pub gate: f32,
    pub baseline: f32,
    pub last_reward: f32,
    /// Discrete head's current strategy distribution (zero for the continuous head).
    pub probabilities: [f32; Strategy::COUNT],
    pub features: [f32; FEATURE_COUNT],
}

/// Build the normalized feature vector.
///
/// `smoothed_trend` is the controller's running EMA of feature 0.
pub fn extract_features(obs: &Observation<'_>, smoothed_trend: f32) -> [f32; FEATURE_COUNT] {
    let mut f = [0.0f32; FEATURE_COUNT];
    let e = obs.errors;
    let n = e.len();

    if n >= 4 {
        let abs: Vec<f32> = e.iter().map(|x| x.abs()).collect();
        let mean_abs = abs.iter().sum::<f32>() / n as f32;
        let half = n / 2;
        let first = abs[..half].iter().sum::<f32>() / half as f32;
        let second = abs[n - half..].iter().sum::<f32>() / half as f32;

        // Low frequency: trend, positive when the error is shrinking.
        f[0] = ((first - second) / (mean_abs + EPS)).tanh();

        // Mid frequency: zero crossings around the window mean.
        let mean = e.iter().sum::<f32>() / n as f32;
        let crossings = e
            .windows(2)
            .filter(|w| (w[0] - mean) * (w[1] - mean) < 0.0)
            .count();
        f[1] = 2.0 * crossings as f32 / (n - 1) as f32 - 1.0;

        // High frequency: volatility of successive differences.
        let diffs: Vec<f32> = e.windows(2).map(|w| w[1] - w[0]).collect();
        let dm = diffs.iter().sum::<f32>() / diffs.len() as f32;
        let var = diffs.iter().map(|d| (d - dm) * (d - dm)).sum::<f32>() / diffs.len() as f32;
        f[2] = (var.sqrt() / (mean_abs + EPS)).tanh();

        // Pattern break: current error vs recent average.
        f[3] = (abs[n - 1] / (mean_abs + EPS) - 1.0).tanh();

        // Phase: rising or falling.
        let step = abs[n - 1] - abs[n - 2];
        f[4] = if step > 0.0 {
            1.0
        } else if step < 0.0 {
            -1.0
        } else {
            0.0
        };
    }

    f[5] = smoothed_trend.clamp(-1.0, 1.0);
    f[6] = 2.0 * obs.entropy.clamp(0.0, 1.0) - 1.0;
    f[7] = if obs.loss.is_finite() { obs.loss.tanh() } else { 1.0 };

    let lr_span = obs.bounds.max.learning_rate - obs.bounds.min.learning_rate;
    f[8] = if lr_span > 0.0 {
        2.0 * (obs.hyper.learning_rate - obs.bounds.min.learning_rate) / lr_span - 1.0
    } else {
        0.0
    };
    let d_span = obs.density_max - obs.density_min;
    f[9] = if d_span > 0.0 {
        2.0 * (obs.density - obs.density_min) / d_span - 1.0
    } else {
        0.0
    };

    for x in &mut f {
        *x = if x.is_finite() { x.clamp(-1.0, 1.0) } else { 0.0 };
    }
    f
}

#[derive(Debug, Clone)]
pub struct RegimeController {
    cfg: ControllerConfig,
    rng: Prng,

    short: LstmCell,
    long: LstmCell,
    gate_w: Vec<f32>,
    gate_b: f32,
    gate: f32,
    blended: Vec<f32>,

    /// `outputs × hidden` policy weights and per-output bias.
    policy_w: Vec<f32>,
    policy_b: Vec<f32>,
    /// Eligibility traces, same layout as `policy_w` plus the bias.
    trace_w: Vec<f32>,
    trace_b: Vec<f32>,
    /// Most recent `∂log π/∂logits` (discrete) or unit noise (continuous).
    score: Vec<f32>,

    probs: [f32; Strategy::COUNT],
    strategy: Strategy,
    strategy_since: u64,
    mode: ControllerMode,

    features: [f32; FEATURE_COUNT],
    smoothed_trend: f32,
    baseline: f32,
    last_reward: f32,
    last_eval_loss: Option<f32>,
    tick: u64,
}

impl RegimeController {
    pub fn new(cfg: ControllerConfig, mut rng: Prng) -> Self {
        let hd = cfg.hidden;
        let short = LstmCell::new(FEATURE_COUNT, hd, cfg.short_init_scale, 1.0, &mut rng);
        let long = LstmCell::new(
            FEATURE_COUNT,
            hd,
            cfg.long_init_scale,
            cfg.long_forget_bias,
            &mut rng,
        );
        let outputs = match cfg.head {
            ControllerHead::Discrete => Strategy::COUNT,
            ControllerHead::Continuous => HYPER_COUNT,
        };
        let policy_w = (0..outputs * hd)
            .map(|_| rng.gen_range_f32(-0.1, 0.1))
            .collect();
        let gate_w = (0..2 * hd).map(|_| rng.gen_range_f32(-0.1, 0.1)).collect();

        Self {
            cfg,
            rng,
            short,
            long,
            gate_w,
            gate_b: 0.0,
            gate: 0.5,
            blended: vec![0.0; hd],
            policy_w,
            policy_b: vec![0.0; outputs],
            trace_w: vec![0.0; outputs * hd],
            trace_b: vec![0.0; outputs],
            score: vec![0.0; outputs],
            probs: [1.0 / Strategy::COUNT as f32; Strategy::COUNT],
            strategy: Strategy::Stabilize,
            strategy_since: 0,
            mode: ControllerMode::Warmup,
            features: [0.0; FEATURE_COUNT],
            smoothed_trend: 0.0,
            baseline: 0.0,
            last_reward: 0.0,
            last_eval_loss: None,
            tick: 0,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    /// Swap tuning constants without rebuilding weights (head and width fixed).
    pub(crate) fn set_config(&mut self, cfg: ControllerConfig) {
        self.cfg = cfg;
    }

    pub fn introspect(&self) -> ControllerIntrospection {
        ControllerIntrospection {
            mode: self.mode,
            strategy: self.strategy,
            short_activity: self.short.mean_activity(),
            long_activity: self.long.mean_activity(),
            gate: self.gate,
            baseline: self.baseline,
            last_reward: self.last_reward,
            probabilities: match self.cfg.head {
                ControllerHead::Discrete => self.probs,
                ControllerHead::Continuous => [0.0; Strategy::COUNT],
            },
            features: self.features,
        }
    }

    fn forward(&mut self, features: &[f32; FEATURE_COUNT]) {
        let hd = self.cfg.hidden;
        self.short.forward(features);
        self.long.forward(features);

        let hs = self.short.hidden_state();
        let hl = self.long.hidden_state();
        let mut g = self.gate_b;
        for k in 0..hd {
            g += self.gate_w[k] * hs[k] + self.gate_w[hd + k] * hl[k];
        }
        self.gate = sigmoid(g);
        for k in 0..hd {
            self.blended[k] = self.gate * hs[k] + (1.0 - self.gate) * hl[k];
        }
    }

    fn logits(&self) -> Vec<f32> {
        let hd = self.cfg.hidden;
        self.policy_b
            .iter()
            .enumerate()
            .map(|(o, b)| {
                let row = &self.policy_w[o * hd..(o + 1) * hd];
                b + row.iter().zip(self.blended.iter()).map(|(w, h)| w * h).sum::<f32>()
            })
            .collect()
    }

    fn softmax(&mut self, logits: &[f32]) {
        let t = self.cfg.temperature.max(1e-3);
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (p, l) in self.probs.iter_mut().zip(logits.iter()) {
            *p = ((l - max) / t).exp();
            sum += *p;
        }
        if !(sum.is_finite() && sum > 0.0) {
            self.probs = [1.0 / Strategy::COUNT as f32; Strategy::COUNT];
            return;
        }
        for p in &mut self.probs {
            *p /= sum;
        }
    }

    /// Decay traces, then add this tick's score ⊗ blended hidden state.
    fn accumulate_traces(&mut self) {
        let hd = self.cfg.hidden;
        let lambda = self.cfg.trace_decay;
        for (o, s) in self.score.iter().enumerate() {
            for k in 0..hd {
                let t = &mut self.trace_w[o * hd + k];
                *t = lambda * *t + s * self.blended[k];
            }
            self.trace_b[o] = lambda * self.trace_b[o] + s;
        }
    }

    /// Apply the REINFORCE update for `advantage` to the policy, the blend
    /// gate, and both cells' output gates.
    fn reinforce(&mut self, advantage: f32) {
        let hd = self.cfg.hidden;
        let clip = self.cfg.weight_clip;
        let lr = self.cfg.policy_lr;

        // ∂J/∂h through the current policy weights, before they move.
        let mut grad_h = vec![0.0f32; hd];
        for (o, s) in self.score.iter().enumerate() {
            for k in 0..hd {
                grad_h[k] += advantage * s * self.policy_w[o * hd + k];
            }
        }

        for (w, t) in self.policy_w.iter_mut().zip(self.trace_w.iter()) {
            *w = (*w + lr * advantage * t).clamp(-clip, clip);
        }
        for (b, t) in self.policy_b.iter_mut().zip(self.trace_b.iter()) {
            *b = (*b + lr * advantage * t).clamp(-clip, clip);
        }

        let hs = self.short.hidden_state().to_vec();
        let hl = self.long.hidden_state().to_vec();
        let g = self.gate;
        let d_gate: f32 = (0..hd).map(|k| grad_h[k] * (hs[k] - hl[k])).sum::<f32>() * g * (1.0 - g);
        if d_gate.is_finite() {
            let glr = self.cfg.gate_lr;
            for k in 0..hd {
                self.gate_w[k] = (self.gate_w[k] + glr * d_gate * hs[k]).clamp(-clip, clip);
                self.gate_w[hd + k] = (self.gate_w[hd + k] + glr * d_gate * hl[k]).clamp(-clip, clip);
            }
            self.gate_b = (self.gate_b + glr * d_gate).clamp(-clip, clip);
        }

        let grad_short: Vec<f32> = grad_h.iter().map(|x| x * g).collect();
        let grad_long: Vec<f32> = grad_h.iter().map(|x| x * (1.0 - g)).collect();
        self.short.nudge_output_gate(&grad_short, self.cfg.lstm_lr, clip);
        self.long.nudge_output_gate(&grad_long, self.cfg.lstm_lr, clip);
    }

    /// Reward on evaluation ticks: clamped improvement of the smoothed loss.
    fn evaluate(&mut self, avg_loss: f32) -> Option<f32> {
        if !avg_loss.is_finite() {
            return None;
        }
        let prev = self.last_eval_loss.replace(avg_loss)?;
        let reward = ((prev - avg_loss) * self.cfg.reward_scale).clamp(-1.0, 1.0);
        let advantage = reward - self.baseline;
        self.baseline += self.cfg.baseline_rate * (reward - self.baseline);
        self.last_reward = reward;
        if advantage.abs() > self.cfg.min_advantage {
            self.reinforce(advantage);
        }
        Some(reward)
    }

    fn sample_strategy(&mut self) -> Strategy {
        let probs = self.probs;
        Strategy::from_index(self.rng.weighted_index(&probs).unwrap_or(Strategy::Exploit.index()))
    }

    /// One controller tick. `tick` is the engine's step counter.
    pub fn step(&mut self, tick: u64, obs: &Observation<'_>) -> Decision {
        self.tick = tick;
        let raw = extract_features(obs, self.smoothed_trend);
        self.smoothed_trend += TREND_SMOOTHING * (raw[0] - self.smoothed_trend);
        self.features = raw;
        self.forward(&raw);

        let logits = self.logits();
        let eval_tick = tick > 0 && tick % self.cfg.eval_interval == 0;
        let previous = self.strategy;

        self.mode = if tick < self.cfg.warmup_ticks {
            ControllerMode::Warmup
        } else if obs.loss.is_nan() || obs.loss > self.cfg.panic_loss {
            ControllerMode::Panic
        } else {
            ControllerMode::Normal
        };

        let mut deltas = None;
        match self.cfg.head {
            ControllerHead::Discrete => {
                self.softmax(&logits);
                let t = self.cfg.temperature.max(1e-3);
                let chosen = self.strategy.index();
                for (o, s) in self.score.iter_mut().enumerate() {
                    let onehot = if o == chosen { 1.0 } else { 0.0 };
                    *s = (onehot - self.probs[o]) / t;
                }
            }
            ControllerHead::Continuous => {
                let span = obs.bounds.max.to_array();
                let mut d = [0.0f32; HYPER_COUNT];
                for o in 0..HYPER_COUNT {
                    let eps = self.rng.gaussian();
                    self.score[o] = eps;
                    let out = (logits[o] + self.cfg.exploration_noise * eps).tanh();
                    // Relative to each field's upper bound.
                    d[o] = out * self.cfg.delta_scale * span[o];
                }
                deltas = Some(d);
            }
        }
        self.accumulate_traces();

        let reward = if eval_tick { self.evaluate(obs.avg_loss) } else { None };

        match self.mode {
            ControllerMode::Warmup | ControllerMode::Panic => {
                self.strategy = Strategy::Stabilize;
                self.strategy_since = tick;
            }
            ControllerMode::Normal => {
                let unlocked = tick.saturating_sub(self.strategy_since) >= self.cfg.lock_duration;
                if self.cfg.head == ControllerHead::Discrete && eval_tick && unlocked {
                    let next = self.sample_strategy();
                    if next != self.strategy {
                        self.strategy = next;
                        self.strategy_since = tick;
                    }
                } else if self.cfg.head == ControllerHead::Continuous {
                    self.strategy = Strategy::Exploit;
                }
            }
        }

        let proposal = match (self.mode, deltas) {
            (ControllerMode::Panic, _) => Proposal::Preset {
                strategy: Strategy::Stabilize,
                rate: 1.0,
            },
            (ControllerMode::Normal, Some(d)) => Proposal::Deltas(d),
            _ => Proposal::Preset {
                strategy: self.strategy,
                rate: self.cfg.blend_rate,
            },
        };
        let bias = match self.mode {
            ControllerMode::Normal if self.cfg.head == ControllerHead::Discrete => {
                self.strategy.structural_bias()
            }
            _ => StructuralBias::None,
        };

        Decision {
            mode: self.mode,
            strategy: self.strategy,
            bias,
            proposal,
            switched: (previous != self.strategy).then_some((previous, self.strategy)),
            reward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs<'a>(errors: &'a [f32], loss: f32, hyper: &'a HyperParams, bounds: &'a HyperBounds) -> Observation<'a> {
        Observation {
            errors,
            loss,
            avg_loss: loss,
            entropy: 0.5,
            hyper,
            bounds,
            density: 0.25,
            density_min: 0.1,
            density_max: 0.5,
        }
    }

    fn controller(cfg: ControllerConfig) -> RegimeController {
        RegimeController::new(cfg, Prng::new(17))
    }

    #[test]
    fn lstm_state_stays_bounded() {
        let mut rng = Prng::new(1);
        let mut cell = LstmCell::new(3, 4, 5.0, 1.0, &mut rng);
        for _ in 0..500 {
            cell.forward(&[1e6, -1e6, f32::NAN]);
        }
        assert!(cell.cell_state().iter().all(|c| c.abs() <= CELL_CLAMP));
        assert!(cell.hidden_state().iter().all(|h| h.is_finite() && h.abs() <= 1.0));
    }

    #[test]
    fn long_cell_integrates_more_slowly() {
        let mut rng = Prng::new(2);
        let mut short = LstmCell::new(1, 8, 0.5, 1.0, &mut rng);
        let mut long = LstmCell::new(1, 8, 0.1, 2.0, &mut rng);
        let s0 = short.forward(&[1.0]).to_vec();
        let l0 = long.forward(&[1.0]).to_vec();
        let s1 = short.forward(&[-1.0]).to_vec();
        let l1 = long.forward(&[-1.0]).to_vec();
        let ds: f32 = s0.iter().zip(&s1).map(|(a, b)| (a - b).abs()).sum();
        let dl: f32 = l0.iter().zip(&l1).map(|(a, b)| (a - b).abs()).sum();
        assert!(dl < ds, "long {dl} vs short {ds}");
    }

    #[test]
    fn features_are_normalized() {
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        let errors: Vec<f32> = (0..32).map(|t| (t as f32 * 0.7).sin() * 100.0).collect();
        let f = extract_features(&obs(&errors, 1e9, &hp, &bounds), 3.0);
        assert!(f.iter().all(|x| x.is_finite() && (-1.0..=1.0).contains(x)));

        // Oscillating error crosses its mean often.
        let alt: Vec<f32> = (0..16).map(|t| if t % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let f = extract_features(&obs(&alt, 0.1, &hp, &bounds), 0.0);
        assert!((f[1] - 1.0).abs() < 1e-6);

        // Shrinking error has a positive trend.
        let shrinking: Vec<f32> = (0..16).map(|t| 1.0 / (t as f32 + 1.0)).collect();
        let f = extract_features(&obs(&shrinking, 0.1, &hp, &bounds), 0.0);
        assert!(f[0] > 0.0);
        assert_eq!(f[4], -1.0);
    }

    #[test]
    fn short_window_yields_zero_signal_features() {
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        let f = extract_features(&obs(&[0.5, 0.4], 0.2, &hp, &bounds), 0.0);
        assert_eq!(&f[..5], &[0.0; 5]);
    }

    #[test]
    fn warmup_forces_stabilize() {
        let mut c = controller(ControllerConfig::default());
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        for t in 0..50 {
            let d = c.step(t, &obs(&[], 0.1, &hp, &bounds));
            assert_eq!(d.mode, ControllerMode::Warmup);
            assert_eq!(d.strategy, Strategy::Stabilize);
        }
    }

    #[test]
    fn panic_overrides_lock_and_resets_timer() {
        let cfg = ControllerConfig {
            warmup_ticks: 0,
            lock_duration: 1000,
            ..Default::default()
        };
        let mut c = controller(cfg);
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        c.strategy = Strategy::Explore;
        c.strategy_since = 0;
        let d = c.step(5, &obs(&[], 10.0, &hp, &bounds));
        assert_eq!(d.mode, ControllerMode::Panic);
        assert_eq!(d.strategy, Strategy::Stabilize);
        assert_eq!(
            d.proposal,
            Proposal::Preset {
                strategy: Strategy::Stabilize,
                rate: 1.0
            }
        );
        assert_eq!(d.switched, Some((Strategy::Explore, Strategy::Stabilize)));
        assert_eq!(c.strategy_since, 5);
    }

    #[test]
    fn lock_duration_prevents_thrashing() {
        let cfg = ControllerConfig {
            warmup_ticks: 0,
            lock_duration: 40,
            eval_interval: 1,
            temperature: 10.0,
            ..Default::default()
        };
        let mut c = controller(cfg);
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        let mut last_switch: Option<u64> = None;
        for t in 1..400 {
            let d = c.step(t, &obs(&[], 0.1, &hp, &bounds));
            if d.switched.is_some() {
                if let Some(prev) = last_switch {
                    assert!(t - prev >= 40, "switched at {t} after {prev}");
                }
                last_switch = Some(t);
            }
        }
        assert!(last_switch.is_some(), "high temperature should switch at least once");
    }

    #[test]
    fn probabilities_form_a_distribution() {
        let cfg = ControllerConfig {
            warmup_ticks: 0,
            ..Default::default()
        };
        let mut c = controller(cfg);
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        let errors = [0.3, -0.2, 0.4, -0.1, 0.2];
        c.step(1, &obs(&errors, 0.1, &hp, &bounds));
        let p = c.introspect().probabilities;
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn positive_advantage_reinforces_held_strategy() {
        let cfg = ControllerConfig {
            warmup_ticks: 0,
            lock_duration: 1_000_000,
            eval_interval: 1,
            min_advantage: 0.0,
            baseline_rate: 0.0,
            ..Default::default()
        };
        let mut c = controller(cfg);
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        c.strategy = Strategy::Consolidate;
        let errors = [0.3, -0.2, 0.4, -0.1, 0.2, 0.1];

        c.step(1, &obs(&errors, 0.5, &hp, &bounds));
        let before = c.probs[Strategy::Consolidate.index()];
        // Loss keeps falling: every evaluation pays a positive reward.
        let mut loss = 0.5;
        for t in 2..60 {
            loss *= 0.95;
            c.step(t, &obs(&errors, loss, &hp, &bounds));
        }
        let after = c.probs[Strategy::Consolidate.index()];
        assert!(after > before, "{before} -> {after}");
        assert!(c.policy_w.iter().all(|w| w.abs() <= c.cfg.weight_clip));
    }

    #[test]
    fn continuous_head_emits_bounded_deltas() {
        let cfg = ControllerConfig {
            head: ControllerHead::Continuous,
            warmup_ticks: 0,
            ..Default::default()
        };
        let mut c = controller(cfg);
        let hp = HyperParams::default();
        let bounds = HyperBounds::default();
        let max = bounds.max.to_array();
        for t in 1..50 {
            let d = c.step(t, &obs(&[0.1, 0.2, 0.1, 0.3], 0.1, &hp, &bounds));
            match d.proposal {
                Proposal::Deltas(v) => {
                    for k in 0..HYPER_COUNT {
                        assert!(v[k].abs() <= cfg.delta_scale * max[k] + 1e-6);
                    }
                }
                other => panic!("expected deltas, got {other:?}"),
            }
            assert_eq!(d.bias, StructuralBias::None);
        }
        assert_eq!(c.introspect().probabilities, [0.0; Strategy::COUNT]);
    }
}
