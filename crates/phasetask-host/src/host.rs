//! Headless frame loop
//!
//! One call to `iterate` is one host frame:
//!
//! 1. `physics_steps_per_frame` times: the secondary tick (skipped while
//!    paused), then the isolated secondary tick
//! 2. the primary tick (skipped while paused), then the isolated primary tick
//! 3. the scene tree's structural flush
//! 4. the deferred lane
//!
//! Phases the host is not configured to drive are skipped.

use crate::config::HostConfig;
use crate::error::HostError;
use crate::scene::SceneTree;
use phasetask_engine::{global, LoopPump, Phase, TickReport};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Notifications the host's owner sends it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The host is being destroyed; tear the pump down for good
    Predelete,
    /// Hot reload: tear the pump down and build a fresh one
    Reload,
}

/// What one frame did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame number, starting at 1
    pub frame: u64,
    /// Whether pausable phases were skipped
    pub paused: bool,
    /// Fixed-step ticks run
    pub physics_steps: u32,
    /// Continuations run across every phase, deferred lane included
    pub continuations: usize,
    /// Repeating-item polls across every phase, deferred lane included
    pub items_polled: usize,
    /// Structural mutations applied by the flush
    pub scene_mutations: usize,
}

impl FrameReport {
    fn absorb(&mut self, tick: TickReport) {
        self.continuations += tick.continuations;
        self.items_polled += tick.items_polled;
    }
}

enum PumpSource {
    /// The host created the pump and owns its lifecycle
    Owned,
    /// The pump is `global::current()`, wired through the host hook
    Global,
}

/// A simulated engine main loop driving a loop pump
pub struct HeadlessHost {
    config: HostConfig,
    source: PumpSource,

    /// Pump the host's ticks go to; filled by the host hook in global mode
    wired: Rc<RefCell<Option<LoopPump>>>,
    /// Times a pump has been wired to this host
    wirings: Rc<Cell<u32>>,

    scene: Rc<SceneTree>,
    paused: Cell<bool>,
    frames: Cell<u64>,
    shut_down: Cell<bool>,
}

impl HeadlessHost {
    /// Create a host driving a pump of its own
    pub fn new(config: HostConfig) -> Self {
        let pump = LoopPump::with_config(config.pump_config());
        tracing::debug!(physics_steps = config.physics_steps_per_frame, "headless host created");
        Self {
            source: PumpSource::Owned,
            wired: Rc::new(RefCell::new(Some(pump))),
            wirings: Rc::new(Cell::new(1)),
            scene: Rc::new(SceneTree::new()),
            paused: Cell::new(false),
            frames: Cell::new(0),
            shut_down: Cell::new(false),
            config,
        }
    }

    /// Create a host driving the calling thread's global pump
    ///
    /// Installs the host hook and default configuration, so every pump
    /// `global::current()` creates from now on (after a reload, say) is wired
    /// to this host. One such host per thread.
    pub fn attach_global(config: HostConfig) -> Self {
        let wired = Rc::new(RefCell::new(None));
        let wirings = Rc::new(Cell::new(0));

        global::set_default_config(config.pump_config());
        let (slot, count) = (Rc::clone(&wired), Rc::clone(&wirings));
        global::set_host_hook(move |pump: &LoopPump| {
            *slot.borrow_mut() = Some(pump.clone());
            count.set(count.get() + 1);
            tracing::debug!(wirings = count.get(), "host wired to loop pump");
        });

        let host = Self {
            source: PumpSource::Global,
            wired,
            wirings,
            scene: Rc::new(SceneTree::new()),
            paused: Cell::new(false),
            frames: Cell::new(0),
            shut_down: Cell::new(false),
            config,
        };
        // A pump created before the hook was installed never saw it
        if global::is_initialized() {
            global::teardown();
        }
        global::ensure_initialized();
        host
    }

    /// The pump the host currently drives, recreating it after a reload
    pub fn pump(&self) -> Result<LoopPump, HostError> {
        if self.shut_down.get() {
            return Err(HostError::ShutDown);
        }
        if let Some(pump) = self.wired.borrow().as_ref() {
            if !pump.is_shut_down() {
                return Ok(pump.clone());
            }
        }
        match self.source {
            PumpSource::Owned => {
                let pump = LoopPump::with_config(self.config.pump_config());
                *self.wired.borrow_mut() = Some(pump.clone());
                self.wirings.set(self.wirings.get() + 1);
                Ok(pump)
            }
            PumpSource::Global => {
                let pump = global::current();
                *self.wired.borrow_mut() = Some(pump.clone());
                Ok(pump)
            }
        }
    }

    /// The scene tree
    pub fn scene(&self) -> &Rc<SceneTree> {
        &self.scene
    }

    /// Host configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Pause or resume the pausable phases
    pub fn set_paused(&self, paused: bool) {
        if self.paused.replace(paused) != paused {
            tracing::debug!(paused, "host pause state changed");
        }
    }

    /// Whether pausable phases are skipped
    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// Frames iterated so far
    pub fn frame_count(&self) -> u64 {
        self.frames.get()
    }

    /// Times a pump has been wired to this host (1 + reloads)
    pub fn wirings(&self) -> u32 {
        self.wirings.get()
    }

    /// Whether the predelete notification was received
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    /// Run one frame
    pub fn iterate(&self) -> Result<FrameReport, HostError> {
        let pump = self.pump()?;
        let phases = self.config.phases;
        let paused = self.paused.get();
        let frame = self.frames.get() + 1;
        self.frames.set(frame);

        let mut report = FrameReport {
            frame,
            paused,
            ..FrameReport::default()
        };

        for _ in 0..self.config.physics_steps_per_frame {
            if !paused && phases.contains(Phase::Secondary) {
                report.absorb(pump.tick(Phase::Secondary)?);
            }
            if phases.contains(Phase::IsolatedSecondary) {
                report.absorb(pump.tick_isolated(Phase::IsolatedSecondary)?);
            }
            report.physics_steps += 1;
        }

        if !paused && phases.contains(Phase::Primary) {
            report.absorb(pump.tick(Phase::Primary)?);
        }
        if phases.contains(Phase::IsolatedPrimary) {
            report.absorb(pump.tick_isolated(Phase::IsolatedPrimary)?);
        }

        report.scene_mutations = self.scene.flush();
        report.absorb(pump.run_deferred()?);

        tracing::trace!(
            frame,
            paused,
            continuations = report.continuations,
            items_polled = report.items_polled,
            scene_mutations = report.scene_mutations,
            "host frame"
        );
        Ok(report)
    }

    /// Run `count` frames
    pub fn run_frames(&self, count: usize) -> Result<Vec<FrameReport>, HostError> {
        (0..count).map(|_| self.iterate()).collect()
    }

    /// Deliver a lifecycle notification
    pub fn notify(&self, event: HostEvent) {
        tracing::debug!(?event, "host notification");
        match event {
            HostEvent::Predelete => {
                if self.shut_down.replace(true) {
                    return;
                }
                self.teardown_pump();
                if let PumpSource::Global = self.source {
                    global::clear_host_hook();
                }
            }
            HostEvent::Reload => {
                if self.shut_down.get() {
                    return;
                }
                self.teardown_pump();
                // Rebuilt lazily by the next `pump()`
            }
        }
    }

    fn teardown_pump(&self) {
        let wired = self.wired.borrow_mut().take();
        match self.source {
            PumpSource::Owned => {
                if let Some(pump) = wired {
                    pump.teardown();
                }
            }
            PumpSource::Global => global::teardown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasetask_engine::{Continuation, ItemPoll};

    #[test]
    fn test_frame_counts_physics_steps() {
        let host = HeadlessHost::new(HostConfig::default().with_physics_steps(3));
        let report = host.iterate().unwrap();
        assert_eq!(report.frame, 1);
        assert_eq!(report.physics_steps, 3);
        assert_eq!(host.frame_count(), 1);
    }

    #[test]
    fn test_frame_only_host_skips_fixed_step() {
        let host = HeadlessHost::new(HostConfig::frame_only());
        let pump = host.pump().unwrap();
        pump.add_action(Phase::Primary, || ItemPoll::Done).unwrap();
        let report = host.iterate().unwrap();
        assert_eq!(report.physics_steps, 0);
        assert_eq!(report.items_polled, 1);
    }

    #[test]
    fn test_owned_reload_builds_new_pump() {
        let host = HeadlessHost::new(HostConfig::default());
        let before = host.pump().unwrap();
        before
            .add_continuation(Phase::Primary, Continuation::callback(|| {}))
            .unwrap();

        host.notify(HostEvent::Reload);
        assert!(before.is_shut_down());

        let after = host.pump().unwrap();
        assert!(!after.ptr_eq(&before));
        assert_eq!(host.wirings(), 2);
        assert_eq!(host.iterate().unwrap().continuations, 0);
    }

    #[test]
    fn test_predelete_stops_host() {
        let host = HeadlessHost::new(HostConfig::default());
        let pump = host.pump().unwrap();
        host.notify(HostEvent::Predelete);

        assert!(host.is_shut_down());
        assert!(pump.is_shut_down());
        assert!(matches!(host.iterate(), Err(HostError::ShutDown)));

        // Reload after predelete does nothing
        host.notify(HostEvent::Reload);
        assert!(matches!(host.pump(), Err(HostError::ShutDown)));
    }
}
