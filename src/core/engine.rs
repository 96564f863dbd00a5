//! The simulation engine.
//!
//! `Engine` exclusively owns the [`Network`] and the [`RegimeController`].
//! One call to [`Engine::step`] runs one tick in a fixed order:
//!
//! 1. reservoir update and readout
//! 2. divergence guard, smoothed loss, lock/unlock
//! 3. learning (readout LMS, recurrent Hebbian rule)
//! 4. spectral regulation (periodic)
//! 5. controller observation, regime application
//! 6. structural adaptation
//! 7. metrics assembly
//!
//! Numeric faults never escape a tick: they are recovered here and reported
//! through [`Status::Stabilizing`] and the event list.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::config::ReservoirConfig;
use crate::controller::{Observation, Proposal, RegimeController};
use crate::dense::ExecutionTier;
use crate::error::ConfigError;
use crate::hyper::{HyperParams, StructuralBias};
use crate::metrics::{Metrics, NetworkState, Status};
use crate::network::Network;
use crate::plasticity::{is_winter, SlopeTracker};
use crate::prng::Prng;
use crate::spectral::{self, RegulationReport};
use crate::task::{Sample, TaskSource};

/// Bounded length of the task history kept for [`TaskSource::sample`].
const HISTORY_CAP: usize = 256;
/// Salt for the controller's forked random stream.
const CONTROLLER_STREAM: u64 = 0xC0_17_20_11;

pub struct Engine {
    cfg: ReservoirConfig,
    net: Network,
    controller: RegimeController,
    rng: Prng,
    tier: ExecutionTier,

    steps: u64,
    avg_loss: Option<f32>,
    slope: SlopeTracker,
    /// Recent |error| for the noise-floor gate.
    noise_floor: VecDeque<f32>,
    /// Recent signed errors for controller features.
    errors: VecDeque<f32>,

    last_mitosis: Option<u64>,
    regrown_total: u64,
    /// Run the regulator with burst iterations on the next tick.
    pending_burst: bool,
    last_regulation: Option<RegulationReport>,

    history: VecDeque<f32>,
    /// Hyperparameters a reset starts from (config, or a task's suggestion).
    initial_hyper: HyperParams,
}

impl Engine {
    pub fn new(cfg: ReservoirConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let (net, controller, rng) = Self::fresh_parts(&cfg, cfg.hyper);
        Ok(Self {
            cfg,
            net,
            controller,
            rng,
            tier: ExecutionTier::Scalar,
            steps: 0,
            avg_loss: None,
            slope: SlopeTracker::new(cfg.slope_window),
            noise_floor: VecDeque::with_capacity(cfg.noise_floor_window),
            errors: VecDeque::with_capacity(cfg.controller.feature_window),
            last_mitosis: None,
            regrown_total: 0,
            pending_burst: true,
            last_regulation: None,
            history: VecDeque::with_capacity(HISTORY_CAP),
            initial_hyper: cfg.hyper,
        })
    }

    fn fresh_parts(cfg: &ReservoirConfig, hyper: HyperParams) -> (Network, RegimeController, Prng) {
        let mut rng = Prng::new(cfg.seed.unwrap_or(1));
        let controller_rng = rng.fork(CONTROLLER_STREAM);
        let mut net = Network::new(cfg, &mut rng);
        net.hyper = hyper;
        let controller = RegimeController::new(cfg.controller, controller_rng);
        (net, controller, rng)
    }

    pub fn config(&self) -> &ReservoirConfig {
        &self.cfg
    }

    /// Set the execution tier for the dense kernels.
    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn execution_tier(&self) -> ExecutionTier {
        self.tier
    }

    /// The tier that will actually run, honoring compile-time feature gates.
    pub fn effective_execution_tier(&self) -> ExecutionTier {
        self.tier.effective()
    }

    pub fn is_locked(&self) -> bool {
        self.net.locked
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn hyper(&self) -> &HyperParams {
        &self.net.hyper
    }

    pub fn controller(&self) -> &RegimeController {
        &self.controller
    }

    pub fn last_regulation(&self) -> Option<RegulationReport> {
        self.last_regulation
    }

    /// Read-only borrow of the network, for observers.
    pub fn network(&self) -> &Network {
        &self.net
    }

    /// Update the configuration in-place.
    ///
    /// Topology (`max_neurons`, `initial_neurons`, `dale_law`) and the
    /// controller's head and width are fixed for the engine's lifetime. A
    /// changed `hyper` is applied to the live network immediately.
    pub fn update_config<F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ReservoirConfig),
    {
        let old = self.cfg;
        let mut cfg = old;
        f(&mut cfg);

        if cfg.max_neurons != old.max_neurons || cfg.initial_neurons != old.initial_neurons {
            return Err(ConfigError::Topology("neuron counts"));
        }
        if cfg.dale_law != old.dale_law {
            return Err(ConfigError::Topology("dale_law"));
        }
        if cfg.controller.head != old.controller.head || cfg.controller.hidden != old.controller.hidden {
            return Err(ConfigError::Topology("controller head and width"));
        }

        cfg.validate()?;
        self.cfg = cfg;
        self.controller.set_config(cfg.controller);

        if cfg.hyper != old.hyper {
            self.net.hyper = cfg.hyper;
        }
        if cfg.slope_window != old.slope_window {
            self.slope = SlopeTracker::new(cfg.slope_window);
        }
        self.net.target_density = self
            .net
            .target_density
            .clamp(cfg.density_min, cfg.density_max);

        // A changed seed restarts the engine's stream for reproducibility.
        if cfg.seed != old.seed {
            if let Some(seed) = cfg.seed {
                self.rng = Prng::new(seed);
            }
        }
        Ok(())
    }

    /// Discard the network and controller and start over from the config.
    pub fn reset(&mut self) {
        self.reset_with_hyper(self.cfg.hyper);
    }

    /// Reset for a new task: apply its suggested hyperparameters (clamped)
    /// and prime the history with its seed values.
    pub fn reset_for_task(&mut self, task: &dyn TaskSource) {
        let hyper = task
            .suggested_hyperparams()
            .map(|hp| self.cfg.hyper_bounds.clamp(&hp))
            .unwrap_or(self.cfg.hyper);
        self.reset_with_hyper(hyper);
        for v in task.seed_history() {
            self.push_history(v);
        }
        info!(task = task.name(), "engine reset for task");
    }

    fn reset_with_hyper(&mut self, hyper: HyperParams) {
        let (net, controller, rng) = Self::fresh_parts(&self.cfg, hyper);
        self.net = net;
        self.controller = controller;
        self.rng = rng;
        self.steps = 0;
        self.avg_loss = None;
        self.slope.clear();
        self.noise_floor.clear();
        self.errors.clear();
        self.last_mitosis = None;
        self.regrown_total = 0;
        self.pending_burst = true;
        self.last_regulation = None;
        self.history.clear();
        self.initial_hyper = hyper;
    }

    /// Hyperparameters the current episode started from.
    pub fn initial_hyper(&self) -> &HyperParams {
        &self.initial_hyper
    }

    fn push_history(&mut self, v: f32) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(v);
    }

    /// Pull one sample from `task` and step on it.
    ///
    /// A forecast uses the previous series value as input (0 if none).
    pub fn step_task(&mut self, task: &mut dyn TaskSource) -> Metrics {
        let tick = self.steps + 1;
        match task.sample(tick, self.history.make_contiguous()) {
            Sample::Forecast(value) => {
                let input = self.history.back().copied().unwrap_or(0.0);
                self.push_history(value);
                self.step(input, value)
            }
            Sample::Pair { input, target } => {
                self.push_history(input);
                self.step(input, target)
            }
        }
    }

    /// Advance one tick.
    pub fn step(&mut self, input: f32, target: f32) -> Metrics {
        self.steps += 1;
        let tick = self.steps;
        let cfg = self.cfg;
        let mut events = Vec::new();

        let winter = is_winter(tick, &cfg);
        if winter && !is_winter(tick - 1, &cfg) {
            debug!(step = tick, "synapse winter begins");
            events.push(format!(
                "[WINTER] prune pressure x{} for {} ticks",
                cfg.winter_multiplier, cfg.winter_duration
            ));
        }

        let limit = cfg.max_input_magnitude;
        if !(input.is_finite() && target.is_finite()) || input.abs() > limit || target.abs() > limit {
            let reason = format!("sample ({input}, {target}) outside ±{limit}");
            return self.emergency(tick, target, winter, reason, events);
        }

        // 1. Reservoir update.
        let prediction = self.net.forward(input, &cfg, self.tier);
        let error = target - prediction;
        let loss = error * error;
        if !(prediction.is_finite() && loss.is_finite()) || loss > cfg.divergence_loss {
            let reason = format!("loss {loss} exceeds {}", cfg.divergence_loss);
            return self.emergency(tick, target, winter, reason, events);
        }

        // 2. Smoothed loss and the solved lock.
        let prev_avg = self.avg_loss.unwrap_or(loss);
        let avg = prev_avg + self.net.hyper.smoothing_factor * (loss - prev_avg);
        self.avg_loss = Some(avg);
        self.slope.push(loss);
        while self.errors.len() >= cfg.controller.feature_window {
            self.errors.pop_front();
        }
        self.errors.push_back(error);

        let mut unlocked_now = false;
        if self.net.locked {
            if avg > cfg.unlock_threshold {
                self.net.locked = false;
                unlocked_now = true;
                info!(step = tick, avg_loss = avg, "unlocked");
                events.push(format!("[UNLOCK] avg loss {avg:.4} above {}", cfg.unlock_threshold));
            }
        } else if avg < cfg.solved_threshold
            && self.slope.is_full()
            && tick >= cfg.controller.warmup_ticks
        {
            self.net.locked = true;
            self.net.patience = 0;
            info!(step = tick, avg_loss = avg, "solved; locked");
            events.push(format!("[LOCK] solved at avg loss {avg:.4}"));
        }
        let locked = self.net.locked;

        // 3. Learning.
        let mut lr = if locked { 0.0 } else { self.net.hyper.learning_rate };
        if lr > 0.0 && !self.noise_floor.is_empty() {
            let floor = self.noise_floor.iter().sum::<f32>() / self.noise_floor.len() as f32;
            if floor > error.abs() {
                lr *= cfg.noise_damping;
            }
        }
        while self.noise_floor.len() >= cfg.noise_floor_window {
            self.noise_floor.pop_front();
        }
        self.noise_floor.push_back(error.abs());

        if lr > 0.0 {
            self.net.learn_readout(error, lr, &cfg);
            self.net
                .recurrent_plasticity(prev_avg - loss, cfg.recurrent_learning_rate, &cfg);
        }

        // 4. Spectral regulation.
        if !locked {
            let due = self.pending_burst
                || self.net.size() <= cfg.regulator_small_network
                || tick % cfg.regulator_every == 0;
            if due {
                let iterations = if self.pending_burst {
                    spectral::refresh_iterate(&mut self.net, self.tier);
                    cfg.regulator_burst_iterations.max(cfg.regulator_iterations)
                } else {
                    cfg.regulator_iterations
                };
                let target_sigma = self.net.hyper.spectral_target;
                let report = spectral::regulate(&mut self.net, target_sigma, iterations, &mut self.rng, self.tier);
                self.last_regulation = Some(report);
                self.pending_burst = false;
            }
        }

        // 5. Controller.
        let errors = self.errors.make_contiguous();
        let obs = Observation {
            errors,
            loss,
            avg_loss: avg,
            entropy: self.net.activation_entropy(cfg.controller.entropy_bins),
            hyper: &self.net.hyper,
            bounds: &cfg.hyper_bounds,
            density: self.net.target_density,
            density_min: cfg.density_min,
            density_max: cfg.density_max,
        };
        let decision = self.controller.step(tick, &obs);
        if let Some(reward) = decision.reward {
            debug!(step = tick, reward, baseline = self.controller.introspect().baseline, "controller evaluated");
        }
        if let Some((from, to)) = decision.switched {
            debug!(step = tick, from = from.name(), to = to.name(), "strategy switch");
            events.push(format!("[STRATEGY] {} -> {}", from.name(), to.name()));
        }
        if !locked {
            match decision.proposal {
                Proposal::Preset { strategy, rate } => {
                    self.net
                        .hyper
                        .blend_toward(&strategy.preset(), rate, &cfg.hyper_bounds);
                }
                Proposal::Deltas(deltas) => {
                    self.net.hyper.apply_deltas(&deltas, &cfg.hyper_bounds);
                }
            }
        }

        // 6. Structural adaptation.
        let improving = self.slope.improvement() >= cfg.learning_slope_threshold;
        let mut grew = false;
        let mut pruned = 0;
        let mut regrown = 0;
        let mut rewired = 0;

        if locked {
            self.net.patience = 0;
            if cfg.heartbeat_prune_every > 0 && tick % cfg.heartbeat_prune_every == 0 {
                pruned = self.net.heartbeat_prune(&cfg);
            }
        } else {
            self.net.update_target_density(avg, &cfg, winter);

            if !improving && avg > cfg.solved_threshold {
                self.net.patience = self.net.patience.saturating_add(1);
            } else {
                self.net.patience = 0;
            }

            let cooled = self
                .last_mitosis
                .map(|t| tick - t >= cfg.mitosis_cooldown)
                .unwrap_or(true);
            if self.net.patience > cfg.patience_limit && cooled {
                if let Some(out) = self.net.mitosis(&cfg, &mut self.rng) {
                    grew = true;
                    self.net.patience = 0;
                    self.last_mitosis = Some(tick);
                    let kind = if out.excitatory { "excitatory" } else { "inhibitory" };
                    info!(step = tick, neuron = out.neuron, kind, synapses = out.synapses, "mitosis");
                    events.push(format!("[MITOSIS] neuron {} added ({kind})", out.neuron));
                }
            }

            if avg <= cfg.unlock_threshold {
                pruned = self.net.prune(&cfg, winter);
            }
            match decision.bias {
                StructuralBias::Prune => {}
                StructuralBias::Rewire => {
                    let out = self.net.rewire(&cfg, &mut self.rng);
                    if out.fell_back {
                        regrown = out.wired;
                    } else {
                        rewired = out.wired;
                    }
                }
                StructuralBias::Regrow | StructuralBias::None => {
                    regrown = self.net.regrow(&cfg, &mut self.rng);
                }
            }

            if grew || pruned + regrown + rewired > 0 {
                self.settle_structure(tick, grew);
            }
        }

        if pruned > 0 {
            debug!(step = tick, pruned, winter, "pruned synapses");
            events.push(format!("[PRUNE] {pruned} synapses removed"));
        }
        if regrown > 0 {
            debug!(step = tick, regrown, "regrew synapses");
            events.push(format!("[REGROWTH] {regrown} synapses added"));
        }
        if rewired > 0 {
            debug!(step = tick, rewired, "rewired synapses");
            events.push(format!("[REWIRE] {rewired} synapses into inactive neurons"));
        }
        self.regrown_total += (regrown + rewired) as u64;
        self.net.decay_engrams(&cfg);

        // 7. Metrics.
        let status = if unlocked_now {
            Status::Unlocked
        } else if locked {
            Status::Locked
        } else if grew {
            Status::Growing
        } else if rewired > 0 {
            Status::Rewiring
        } else if regrown > 0 {
            Status::GrowingSynapses
        } else if pruned > 0 {
            Status::Pruning
        } else if improving && avg < cfg.unlock_threshold {
            Status::Converging
        } else if self.net.patience > cfg.patience_limit / 2 {
            Status::Stagnant
        } else if improving {
            Status::Learning
        } else {
            Status::Stable
        };

        self.metrics(tick, prediction, target, error, loss, status, winter, decision.reward, events)
    }

    /// Re-bound the recurrent gain in the tick that changed the topology:
    /// an optional Sinkhorn pass after growth, then a refreshed burst of the
    /// regulator.
    fn settle_structure(&mut self, tick: u64, grew: bool) {
        let cfg = self.cfg;
        let target_sigma = self.net.hyper.spectral_target;
        if grew && cfg.sinkhorn_iterations > 0 {
            let shrunk = spectral::sinkhorn_normalize(&mut self.net, target_sigma, cfg.sinkhorn_iterations);
            debug!(step = tick, shrunk, "sinkhorn pass after growth");
        }
        spectral::refresh_iterate(&mut self.net, self.tier);
        let iterations = cfg.regulator_burst_iterations.max(cfg.regulator_iterations);
        let report = spectral::regulate(&mut self.net, target_sigma, iterations, &mut self.rng, self.tier);
        self.last_regulation = Some(report);
        self.pending_burst = false;
    }

    /// Local recovery from a numeric blow-up: scrub, zero state, force a long
    /// regulator pass, and report a degenerate record.
    fn emergency(
        &mut self,
        tick: u64,
        target: f32,
        winter: bool,
        reason: String,
        mut events: Vec<String>,
    ) -> Metrics {
        let scrubbed = self.net.scrub_non_finite();
        if scrubbed > 0 {
            warn!(step = tick, scrubbed, "non-finite weights scrubbed");
        }
        self.net.zero_state();
        let target_sigma = self.net.hyper.spectral_target;
        let report = spectral::regulate(
            &mut self.net,
            target_sigma,
            self.cfg.emergency_iterations,
            &mut self.rng,
            self.tier,
        );
        self.last_regulation = Some(report);

        info!(step = tick, %reason, "emergency stabilization");
        events.push(format!("[EMERGENCY] {reason}; activations reset"));

        let target = if target.is_finite() { target } else { 0.0 };
        self.metrics(tick, 0.0, target, 0.0, 0.0, Status::Stabilizing, winter, None, events)
    }

    #[allow(clippy::too_many_arguments)]
    fn metrics(
        &self,
        tick: u64,
        prediction: f32,
        target: f32,
        error: f32,
        loss: f32,
        status: Status,
        winter: bool,
        reward: Option<f32>,
        events: Vec<String>,
    ) -> Metrics {
        Metrics {
            step: tick,
            prediction,
            target,
            error,
            loss,
            avg_loss: self.avg_loss.unwrap_or(0.0),
            active_connections: self.net.connection_count(),
            target_connections: self.net.target_connections(),
            target_density: self.net.target_density,
            regrown_total: self.regrown_total,
            neuron_count: self.net.size(),
            patience: self.net.patience,
            spectral_radius: self.net.spectral_radius,
            status,
            winter,
            hyper: self.net.hyper,
            controller: self.controller.introspect(),
            reward,
            events,
        }
    }

    /// Owned snapshot of the active block for visualization.
    pub fn network_state(&self) -> NetworkState {
        let n = self.net.size();
        let mut weights = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                weights.push(self.net.weight(i, j));
            }
        }
        NetworkState {
            size: n,
            max_neurons: self.net.max_neurons(),
            activations: self.net.activations[..n].to_vec(),
            weights,
            readout: self.net.readout[..n].to_vec(),
            input_weights: self.net.input_weights[..n].to_vec(),
            neuron_types: self.net.neuron_types[..n].to_vec(),
            energy: self.net.energy[..n].to_vec(),
            hyper: self.net.hyper,
            target_density: self.net.target_density,
            spectral_radius: self.net.spectral_radius,
            locked: self.net.locked,
        }
    }
}
