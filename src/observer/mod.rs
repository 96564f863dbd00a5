use crate::controller::ControllerMode;
use crate::engine::Engine;
use crate::hyper::Strategy;

/// A read-only summary of what the engine is doing.
///
/// Observers cannot mutate or steer the engine. Snapshots are taken on
/// demand and may allocate; the tick loop is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub steps: u64,
    pub size: usize,
    pub max_neurons: usize,
    pub connections: usize,
    pub density: f32,
    pub target_density: f32,
    pub spectral_radius: f32,
    pub locked: bool,
    pub excitatory_fraction: f32,
    pub mean_energy: f32,
    pub mode: ControllerMode,
    pub strategy: Strategy,
}

pub struct EngineAdapter<'a> {
    engine: &'a Engine,
}

impl<'a> EngineAdapter<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let net = self.engine.network();
        let connections = net.connection_count();
        let possible = net.possible_connections();
        let density = if possible == 0 {
            0.0
        } else {
            connections as f32 / possible as f32
        };
        let controller = self.engine.controller();

        EngineSnapshot {
            steps: self.engine.steps(),
            size: net.size(),
            max_neurons: net.max_neurons(),
            connections,
            density,
            target_density: net.target_density,
            spectral_radius: net.spectral_radius,
            locked: self.engine.is_locked(),
            excitatory_fraction: net.excitatory_fraction(),
            mean_energy: net.mean_energy(),
            mode: controller.mode(),
            strategy: controller.strategy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservoirConfig;

    #[test]
    fn snapshot_tracks_engine() {
        let cfg = ReservoirConfig::with_size(32, 16).with_seed(5);
        let mut engine = Engine::new(cfg).expect("valid config");

        let before = EngineAdapter::new(&engine).snapshot();
        assert_eq!(before.steps, 0);
        assert_eq!(before.size, 16);
        assert_eq!(before.max_neurons, 32);
        assert!(!before.locked);
        assert_eq!(before.mode, ControllerMode::Warmup);

        for t in 0..10u64 {
            let x = (0.1 * t as f32).sin();
            engine.step(x, (0.1 * (t + 1) as f32).sin());
        }

        let after = EngineAdapter::new(&engine).snapshot();
        assert_eq!(after.steps, 10);
        assert!(after.density >= 0.0 && after.density <= 1.0);
        assert!(after.mean_energy > 0.0 && after.mean_energy <= 1.0 + 1e-6);
        assert!((0.0..=1.0).contains(&after.excitatory_fraction));
        assert!(after.spectral_radius.is_finite());
    }
}
