//! Task collaborator contract.
//!
//! The engine does not generate data. A [`TaskSource`] produces one sample
//! per tick, either a forecast value (the engine feeds the previous value as
//! input and the new one as target) or an explicit input/target pair.

use crate::hyper::HyperParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Next value of a scalar series.
    Forecast(f32),
    Pair { input: f32, target: f32 },
}

pub trait TaskSource {
    /// Produce the sample for `tick`, given recent history (oldest first).
    fn sample(&mut self, tick: u64, history: &[f32]) -> Sample;

    /// Values to prime the history with after a reset.
    fn seed_history(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Hyperparameters this task prefers to start from.
    fn suggested_hyperparams(&self) -> Option<HyperParams> {
        None
    }

    fn name(&self) -> &str;
}

/// `amplitude · sin(omega · t)` as a one-step-ahead forecast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineTask {
    pub omega: f32,
    pub amplitude: f32,
}

impl Default for SineTask {
    fn default() -> Self {
        Self {
            omega: 0.1,
            amplitude: 1.0,
        }
    }
}

impl SineTask {
    pub fn new(omega: f32) -> Self {
        Self {
            omega,
            ..Default::default()
        }
    }

    pub fn value(&self, tick: u64) -> f32 {
        self.amplitude * (self.omega * tick as f32).sin()
    }
}

impl TaskSource for SineTask {
    fn sample(&mut self, tick: u64, _history: &[f32]) -> Sample {
        Sample::Forecast(self.value(tick))
    }

    fn seed_history(&self) -> Vec<f32> {
        vec![self.value(0)]
    }

    fn name(&self) -> &str {
        "sine"
    }
}

/// Fixed input with a fixed target: an error the readout cannot remove
/// when the input carries no signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantOffsetTask {
    pub input: f32,
    pub target: f32,
}

impl TaskSource for ConstantOffsetTask {
    fn sample(&mut self, _tick: u64, _history: &[f32]) -> Sample {
        Sample::Pair {
            input: self.input,
            target: self.target,
        }
    }

    fn suggested_hyperparams(&self) -> Option<HyperParams> {
        Some(crate::hyper::Strategy::Stabilize.preset())
    }

    fn name(&self) -> &str {
        "constant-offset"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_forecasts_the_series() {
        let mut task = SineTask::default();
        assert_eq!(task.sample(0, &[]), Sample::Forecast(0.0));
        match task.sample(10, &[]) {
            Sample::Forecast(v) => assert!((v - 1.0f32.sin()).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(task.name(), "sine");
        assert_eq!(task.seed_history(), vec![0.0]);
    }

    #[test]
    fn constant_offset_is_a_fixed_pair() {
        let mut task = ConstantOffsetTask {
            input: 0.0,
            target: 5.0,
        };
        for t in 0..3 {
            assert_eq!(
                task.sample(t, &[]),
                Sample::Pair {
                    input: 0.0,
                    target: 5.0
                }
            );
        }
        assert!(task.suggested_hyperparams().is_some());
    }
}
