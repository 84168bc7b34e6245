//! Host frame-loop phases
//!
//! A phase names a point in the host's per-tick execution at which queued
//! work runs. Pausable phases only tick while the host is running; isolated
//! phases are driven by a separate, always-active entry point and keep
//! ticking while the host is paused.

use std::fmt;

/// A point in the host frame loop at which queued work is drained
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Normal per-frame tick (process/update)
    Primary = 0,
    /// Fixed-step tick (physics)
    Secondary = 1,
    /// Per-frame tick that keeps running while the host is paused
    IsolatedPrimary = 2,
    /// Fixed-step tick that keeps running while the host is paused
    IsolatedSecondary = 3,
}

impl Phase {
    /// Number of phases
    pub const COUNT: usize = 4;

    /// All phases, in index order
    pub const ALL: [Phase; Phase::COUNT] = [
        Phase::Primary,
        Phase::Secondary,
        Phase::IsolatedPrimary,
        Phase::IsolatedSecondary,
    ];

    /// Dense index of this phase (0..COUNT)
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this phase keeps ticking while the host is paused
    pub const fn is_isolated(self) -> bool {
        matches!(self, Phase::IsolatedPrimary | Phase::IsolatedSecondary)
    }

    /// The isolated counterpart of a pausable phase (identity for isolated phases)
    pub const fn isolated(self) -> Phase {
        match self {
            Phase::Primary | Phase::IsolatedPrimary => Phase::IsolatedPrimary,
            Phase::Secondary | Phase::IsolatedSecondary => Phase::IsolatedSecondary,
        }
    }

    /// Stable lowercase name, used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Phase::Primary => "primary",
            Phase::Secondary => "secondary",
            Phase::IsolatedPrimary => "isolated_primary",
            Phase::IsolatedSecondary => "isolated_secondary",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of phases a host drives
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PhaseSet(u8);

impl PhaseSet {
    /// No phases
    pub const fn empty() -> Self {
        PhaseSet(0)
    }

    /// Every phase
    pub const fn all() -> Self {
        PhaseSet(0b1111)
    }

    /// Primary phase and its isolated counterpart, for hosts without a fixed-step loop
    pub const fn frame_only() -> Self {
        PhaseSet::empty()
            .with(Phase::Primary)
            .with(Phase::IsolatedPrimary)
    }

    /// This set plus `phase`
    pub const fn with(self, phase: Phase) -> Self {
        PhaseSet(self.0 | (1 << phase.index()))
    }

    /// This set minus `phase`
    pub const fn without(self, phase: Phase) -> Self {
        PhaseSet(self.0 & !(1 << phase.index()))
    }

    /// Whether `phase` is in the set
    pub const fn contains(self, phase: Phase) -> bool {
        self.0 & (1 << phase.index()) != 0
    }

    /// Whether the set is empty
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the phases in the set, in index order
    pub fn iter(self) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().filter(move |phase| self.contains(*phase))
    }
}

impl Default for PhaseSet {
    fn default() -> Self {
        PhaseSet::all()
    }
}

impl FromIterator<Phase> for PhaseSet {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        iter.into_iter().fold(PhaseSet::empty(), PhaseSet::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_index_matches_all() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
    }

    #[test]
    fn test_isolated_counterparts() {
        assert_eq!(Phase::Primary.isolated(), Phase::IsolatedPrimary);
        assert_eq!(Phase::Secondary.isolated(), Phase::IsolatedSecondary);
        assert_eq!(Phase::IsolatedPrimary.isolated(), Phase::IsolatedPrimary);
        assert!(!Phase::Primary.is_isolated());
        assert!(Phase::IsolatedSecondary.is_isolated());
    }

    #[test]
    fn test_phase_set_membership() {
        let set = PhaseSet::frame_only();
        assert!(set.contains(Phase::Primary));
        assert!(set.contains(Phase::IsolatedPrimary));
        assert!(!set.contains(Phase::Secondary));

        let set = set.without(Phase::Primary);
        assert!(!set.contains(Phase::Primary));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Phase::IsolatedPrimary]);
    }

    #[test]
    fn test_phase_set_from_iter() {
        let set: PhaseSet = [Phase::Secondary, Phase::IsolatedSecondary].into_iter().collect();
        assert_eq!(set.iter().count(), 2);
        assert!(PhaseSet::empty().is_empty());
        assert_eq!(PhaseSet::default(), PhaseSet::all());
    }
}
