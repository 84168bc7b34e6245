//! Host configuration

use phasetask_engine::defaults::DEFAULT_MAX_POOLED_PER_SHAPE;
use phasetask_engine::{PhaseSet, PumpConfig};

/// Configuration for a `HeadlessHost`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Fixed-step ticks run per frame
    pub physics_steps_per_frame: u32,

    /// Phases the host drives
    pub phases: PhaseSet,

    /// Per-shape pool limit of the host's pump
    pub max_pooled_per_shape: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            physics_steps_per_frame: 1,
            phases: PhaseSet::all(),
            max_pooled_per_shape: DEFAULT_MAX_POOLED_PER_SHAPE,
        }
    }
}

impl HostConfig {
    /// A host without a fixed-step loop
    pub fn frame_only() -> Self {
        Self {
            physics_steps_per_frame: 0,
            phases: PhaseSet::frame_only(),
            ..Self::default()
        }
    }

    /// Set the fixed-step ticks per frame
    pub fn with_physics_steps(mut self, steps: u32) -> Self {
        self.physics_steps_per_frame = steps;
        self
    }

    /// Set the wired phases
    pub fn with_phases(mut self, phases: PhaseSet) -> Self {
        self.phases = phases;
        self
    }

    /// Pump configuration matching this host
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig::default()
            .with_phases(self.phases)
            .with_max_pooled_per_shape(self.max_pooled_per_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasetask_engine::Phase;

    #[test]
    fn test_frame_only_preset() {
        let config = HostConfig::frame_only();
        assert_eq!(config.physics_steps_per_frame, 0);
        assert!(config.phases.contains(Phase::IsolatedPrimary));
        assert!(!config.phases.contains(Phase::Secondary));

        let pump = config.pump_config();
        assert_eq!(pump.phases, config.phases);
    }
}
