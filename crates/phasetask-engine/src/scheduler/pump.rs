//! The loop pump: phase lanes, frame pools and task entry points

use crate::cancel::{CancelEpoch, CancelToken};
use crate::defaults::{DEFAULT_MAX_POOLED_PER_SHAPE, DEFAULT_QUEUE_CAPACITY, DEFAULT_RUNNER_CAPACITY};
use crate::error::{Fault, TaskError};
use crate::phase::{Phase, PhaseSet};
use crate::scheduler::handoff::{Inbox, MainThreadSender};
use crate::scheduler::queue::ContinuationQueue;
use crate::scheduler::repeating::{RepeatingItem, RepeatingRunner};
use crate::sink::{self, UnhandledSink};
use crate::task::driver::Abort;
use crate::task::{
    CompletionSource, Continuation, Frame, FramePool, PoolSize, ShapeKey, Source, TaskHandle,
};
use rustc_hash::FxHashMap;
use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::thread::{self, ThreadId};

/// Pump configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// Phases the host drives; everything else is rejected with `InvalidPhase`
    pub phases: PhaseSet,

    /// Maximum idle drivers kept per frame shape
    pub max_pooled_per_shape: usize,

    /// Initial capacity of each lane's queue and runner
    pub initial_queue_capacity: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            phases: PhaseSet::all(),
            max_pooled_per_shape: DEFAULT_MAX_POOLED_PER_SHAPE,
            initial_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PumpConfig {
    /// Configuration for hosts without a fixed-step loop
    pub fn frame_only() -> Self {
        Self {
            phases: PhaseSet::frame_only(),
            ..Self::default()
        }
    }

    /// Set the wired phases
    pub fn with_phases(mut self, phases: PhaseSet) -> Self {
        self.phases = phases;
        self
    }

    /// Set the per-shape pool limit
    pub fn with_max_pooled_per_shape(mut self, max: usize) -> Self {
        self.max_pooled_per_shape = max;
        self
    }

    /// Set the initial lane capacity
    pub fn with_initial_queue_capacity(mut self, capacity: usize) -> Self {
        self.initial_queue_capacity = capacity;
        self
    }
}

/// Pump statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Drains per phase, indexed by `Phase::index`
    pub ticks: [u64; Phase::COUNT],

    /// Drains of the deferred lane
    pub deferred_runs: u64,

    /// Continuations run across all lanes
    pub continuations_run: u64,

    /// Repeating-item polls across all lanes
    pub items_polled: u64,

    /// Tasks started through `spawn` or `forget`
    pub tasks_spawned: u64,

    /// Faults handed to the unhandled-fault sink
    pub faults_published: u64,
}

impl PumpStats {
    /// Drains of `phase`
    pub fn ticks_of(&self, phase: Phase) -> u64 {
        self.ticks[phase.index()]
    }
}

/// What one drain did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Continuations run from the swapped-out batch
    pub continuations: usize,
    /// Repeating items polled
    pub items_polled: usize,
    /// Repeating items still registered after the pass
    pub items_remaining: usize,
}

/// One phase's queue and runner
struct Lane {
    queue: ContinuationQueue,
    runner: RepeatingRunner,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ContinuationQueue::with_capacity(capacity),
            runner: RepeatingRunner::with_capacity(capacity.max(DEFAULT_RUNNER_CAPACITY)),
        }
    }
}

type SizeGetter = Box<dyn Fn() -> PoolSize>;

pub(crate) struct PumpCore {
    config: PumpConfig,
    lanes: [Lane; Phase::COUNT],
    deferred: Lane,
    deferred_requested: Cell<bool>,
    epoch: CancelEpoch,
    shut_down: Cell<bool>,

    /// `FramePool<F>` per frame type
    pools: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    diagnostics: RefCell<Vec<(ShapeKey, SizeGetter)>>,
    /// Every driver the pools created, pooled or bound
    drivers: RefCell<Vec<Weak<dyn Abort>>>,

    sink: RefCell<UnhandledSink>,
    main_thread: ThreadId,
    inbox: RefCell<Option<Inbox>>,
    stats: RefCell<PumpStats>,
}

impl PumpCore {
    pub(crate) fn track_driver(&self, driver: Weak<dyn Abort>) {
        let mut drivers = self.drivers.borrow_mut();
        if drivers.len() == drivers.capacity() {
            drivers.retain(|driver| driver.strong_count() > 0);
        }
        drivers.push(driver);
    }
}

/// Owner of the phase lanes and frame pools for one frame-loop thread
///
/// Cloning is cheap and yields another handle to the same pump. The host
/// calls `tick`, `tick_isolated` and `run_deferred` from its frame loop and
/// `teardown` when it shuts down.
#[derive(Clone)]
pub struct LoopPump {
    core: Rc<PumpCore>,
}

impl LoopPump {
    /// Create a pump with the default configuration, owned by the calling thread
    pub fn new() -> Self {
        Self::with_config(PumpConfig::default())
    }

    /// Create a pump with `config`, owned by the calling thread
    pub fn with_config(config: PumpConfig) -> Self {
        let capacity = config.initial_queue_capacity;
        let main_thread = thread::current().id();
        tracing::debug!(
            phases = ?config.phases,
            max_pooled = config.max_pooled_per_shape,
            ?main_thread,
            "creating loop pump"
        );
        Self {
            core: Rc::new(PumpCore {
                lanes: std::array::from_fn(|_| Lane::new(capacity)),
                deferred: Lane::new(capacity),
                deferred_requested: Cell::new(false),
                epoch: CancelEpoch::new(),
                shut_down: Cell::new(false),
                pools: RefCell::new(FxHashMap::default()),
                diagnostics: RefCell::new(Vec::new()),
                drivers: RefCell::new(Vec::new()),
                sink: RefCell::new(sink::default_sink()),
                main_thread,
                inbox: RefCell::new(Some(Inbox::new())),
                stats: RefCell::new(PumpStats::default()),
                config,
            }),
        }
    }

    pub(crate) fn from_core(core: Rc<PumpCore>) -> Self {
        Self { core }
    }

    /// Whether `teardown` has run
    pub fn is_shut_down(&self) -> bool {
        self.core.shut_down.get()
    }

    /// Configuration the pump was created with
    pub fn config(&self) -> &PumpConfig {
        &self.core.config
    }

    /// Whether two handles refer to the same pump
    pub fn ptr_eq(&self, other: &LoopPump) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    fn lane(&self, phase: Phase) -> Result<&Lane, TaskError> {
        if self.is_shut_down() {
            return Err(TaskError::ShutDown);
        }
        if !self.core.config.phases.contains(phase) {
            return Err(TaskError::InvalidPhase(phase));
        }
        Ok(&self.core.lanes[phase.index()])
    }

    fn deferred_lane(&self) -> Result<&Lane, TaskError> {
        if self.is_shut_down() {
            return Err(TaskError::ShutDown);
        }
        Ok(&self.core.deferred)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Run `continuation` once at the next drain of `phase`
    pub fn add_continuation(
        &self,
        phase: Phase,
        continuation: impl Into<Continuation>,
    ) -> Result<(), TaskError> {
        self.lane(phase)?.queue.push(continuation.into());
        Ok(())
    }

    /// Poll `item` at every drain of `phase` until it reports done
    pub fn add_action(&self, phase: Phase, item: impl RepeatingItem + 'static) -> Result<(), TaskError> {
        self.lane(phase)?.runner.add(item);
        Ok(())
    }

    /// Run `continuation` once at the next deferred drain
    pub fn add_deferred_continuation(
        &self,
        continuation: impl Into<Continuation>,
    ) -> Result<(), TaskError> {
        self.deferred_lane()?.queue.push(continuation.into());
        self.core.deferred_requested.set(true);
        Ok(())
    }

    /// Poll `item` at every deferred drain until it reports done
    pub fn add_deferred_action(&self, item: impl RepeatingItem + 'static) -> Result<(), TaskError> {
        self.deferred_lane()?.runner.add(item);
        self.core.deferred_requested.set(true);
        Ok(())
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Drain a pausable phase; the host skips this while paused
    pub fn tick(&self, phase: Phase) -> Result<TickReport, TaskError> {
        if phase.is_isolated() {
            return Err(TaskError::InvalidPhase(phase));
        }
        self.drain(phase)
    }

    /// Drain an isolated phase; the host calls this every frame, paused or not
    pub fn tick_isolated(&self, phase: Phase) -> Result<TickReport, TaskError> {
        if !phase.is_isolated() {
            return Err(TaskError::InvalidPhase(phase));
        }
        self.drain(phase)
    }

    /// Drain the deferred lane
    ///
    /// The host calls this once per frame after its primary tick and after
    /// flushing structural mutations.
    pub fn run_deferred(&self) -> Result<TickReport, TaskError> {
        let lane = self.deferred_lane()?;
        self.core.deferred_requested.set(false);
        let report = self.run_lane(lane);
        let continuations = self.core.deferred.queue.len();

        {
            let mut stats = self.core.stats.borrow_mut();
            stats.deferred_runs += 1;
        }
        if continuations > 0 || report.items_remaining > 0 {
            self.core.deferred_requested.set(true);
        }
        tracing::trace!(
            continuations = report.continuations,
            items_polled = report.items_polled,
            "drained deferred lane"
        );
        Ok(report)
    }

    /// Whether deferred work is waiting
    pub fn deferred_requested(&self) -> bool {
        self.core.deferred_requested.get()
    }

    fn drain(&self, phase: Phase) -> Result<TickReport, TaskError> {
        let lane = self.lane(phase)?;
        self.drain_inbox();
        let report = self.run_lane(lane);

        self.core.stats.borrow_mut().ticks[phase.index()] += 1;
        tracing::trace!(
            %phase,
            continuations = report.continuations,
            items_polled = report.items_polled,
            items_remaining = report.items_remaining,
            "drained phase"
        );
        Ok(report)
    }

    fn run_lane(&self, lane: &Lane) -> TickReport {
        let on_panic = |fault: Fault| self.publish_unhandled(fault);
        let continuations = lane.queue.run_until(&on_panic, &|| self.is_shut_down());
        let (items_polled, items_remaining) = if self.is_shut_down() {
            (0, 0)
        } else {
            lane.runner.run(&on_panic)
        };

        let mut stats = self.core.stats.borrow_mut();
        stats.continuations_run += continuations as u64;
        stats.items_polled += items_polled as u64;
        TickReport {
            continuations,
            items_polled,
            items_remaining,
        }
    }

    /// Move work posted from other threads into its phase queue
    fn drain_inbox(&self) {
        let posted = match &*self.core.inbox.borrow() {
            Some(inbox) => inbox.drain(),
            None => return,
        };
        for item in posted {
            let work = item.work;
            if let Err(error) = self.add_continuation(item.phase, Continuation::callback(move || work())) {
                tracing::warn!(phase = %item.phase, %error, "dropping posted work");
            }
        }
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Start `frame` and return a handle to its result
    ///
    /// The frame is stepped synchronously up to its first suspension point
    /// before this returns.
    pub fn spawn<F: Frame>(&self, frame: F) -> TaskHandle<F::Output> {
        self.spawn_with_cancel(frame, CancelToken::none())
    }

    /// Start `frame` observing `cancel` at each suspension point
    ///
    /// On a torn-down pump the frame is dropped and the handle is already canceled.
    pub fn spawn_with_cancel<F: Frame>(&self, frame: F, cancel: CancelToken) -> TaskHandle<F::Output> {
        if self.is_shut_down() {
            tracing::debug!(shape = type_name::<F>(), "spawn on a torn-down pump");
            drop(frame);
            let source = Rc::new(CompletionSource::new());
            source.try_set_canceled();
            return source.handle();
        }
        let driver = self.pool::<F>().acquire();
        self.core.stats.borrow_mut().tasks_spawned += 1;
        let token = driver.start(frame, cancel, false);
        TaskHandle::new(driver as Rc<dyn Source<F::Output>>, token)
    }

    /// Start `frame` without a handle
    ///
    /// The driver consumes the outcome itself: a fault goes to the
    /// unhandled-fault sink, a cancellation is dropped.
    pub fn forget<F: Frame>(&self, frame: F) {
        self.forget_with_cancel(frame, CancelToken::none());
    }

    /// `forget` observing `cancel`
    pub fn forget_with_cancel<F: Frame>(&self, frame: F, cancel: CancelToken) {
        if self.is_shut_down() {
            tracing::debug!(shape = type_name::<F>(), "forget on a torn-down pump");
            return;
        }
        let driver = self.pool::<F>().acquire();
        self.core.stats.borrow_mut().tasks_spawned += 1;
        driver.start(frame, cancel, true);
    }

    // ========================================================================
    // Pools & diagnostics
    // ========================================================================

    /// The driver pool for frame type `F`, created on first use
    ///
    /// A torn-down pump hands out a detached pool that is neither kept nor
    /// reported.
    pub fn pool<F: Frame>(&self) -> Rc<FramePool<F>> {
        let id = TypeId::of::<F>();
        if let Some(existing) = self.core.pools.borrow().get(&id) {
            if let Ok(pool) = Rc::clone(existing).downcast::<FramePool<F>>() {
                return pool;
            }
        }

        let max = self.core.config.max_pooled_per_shape;
        if self.is_shut_down() {
            return FramePool::<F>::new(Weak::new(), max);
        }
        let pool = FramePool::<F>::new(Rc::downgrade(&self.core), max);
        self.core
            .pools
            .borrow_mut()
            .insert(id, Rc::clone(&pool) as Rc<dyn Any>);

        let weak: Weak<FramePool<F>> = Rc::downgrade(&pool);
        self.register_size_getter(ShapeKey::of::<F>(), move || {
            weak.upgrade().map(|pool| pool.size()).unwrap_or_default()
        });
        tracing::debug!(shape = type_name::<F>(), max_pooled = max, "registered frame pool");
        pool
    }

    /// Register (or replace) the size getter reported for `shape`
    pub fn register_size_getter(&self, shape: ShapeKey, getter: impl Fn() -> PoolSize + 'static) {
        let mut diagnostics = self.core.diagnostics.borrow_mut();
        let getter: SizeGetter = Box::new(getter);
        match diagnostics.iter_mut().find(|(key, _)| *key == shape) {
            Some(entry) => entry.1 = getter,
            None => diagnostics.push((shape, getter)),
        }
    }

    /// Occupancy of every registered pool, in registration order
    pub fn pool_sizes(&self) -> Vec<(ShapeKey, PoolSize)> {
        self.core
            .diagnostics
            .borrow()
            .iter()
            .map(|(shape, getter)| (*shape, getter()))
            .collect()
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Token canceled by the next `cancel_all`
    pub fn global_cancellation_token(&self) -> CancelToken {
        self.core.epoch.token()
    }

    /// Cancel every token handed out so far; returns the new generation
    pub fn cancel_all(&self) -> u64 {
        let generation = self.core.epoch.cancel_all();
        tracing::debug!(generation, "canceled all outstanding tokens");
        generation
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Id of the thread that created the pump
    pub fn main_thread_id(&self) -> ThreadId {
        self.core.main_thread
    }

    /// Whether the caller is on the pump's thread
    pub fn is_on_main_thread(&self) -> bool {
        thread::current().id() == self.core.main_thread
    }

    /// Handle for posting work to this pump from other threads
    pub fn main_thread_sender(&self) -> Result<MainThreadSender, TaskError> {
        match &*self.core.inbox.borrow() {
            Some(inbox) => Ok(inbox.sender(self.core.main_thread, self.core.config.phases)),
            None => Err(TaskError::ShutDown),
        }
    }

    // ========================================================================
    // Unhandled faults
    // ========================================================================

    /// Replace the unhandled-fault sink, returning the previous one
    pub fn set_unhandled_sink(&self, sink: impl Fn(Fault) + 'static) -> UnhandledSink {
        mem::replace(&mut *self.core.sink.borrow_mut(), Rc::new(sink))
    }

    /// Hand `fault` to the unhandled-fault sink
    pub fn publish_unhandled(&self, fault: Fault) {
        self.core.stats.borrow_mut().faults_published += 1;
        // The sink may replace itself
        let sink = Rc::clone(&self.core.sink.borrow());
        sink(fault);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut the pump down
    ///
    /// Cancels every outstanding token, closes the hand-off inbox, drops all
    /// repeating items and queued callbacks, and completes every pending task
    /// as canceled, wherever its resumer was waiting. Callbacks left in a batch
    /// that is draining when this runs are dropped too. Registration and
    /// ticking fail with `ShutDown` afterwards; spawning hands back a canceled
    /// handle. Idempotent.
    pub fn teardown(&self) {
        if self.core.shut_down.replace(true) {
            return;
        }
        let generation = self.core.epoch.cancel_all();
        drop(self.core.inbox.borrow_mut().take());

        // Held strongly so drivers whose only owner is a dropped item survive
        let drivers: Vec<Rc<dyn Abort>> = mem::take(&mut *self.core.drivers.borrow_mut())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut pending = Vec::new();
        for lane in self.core.lanes.iter().chain(std::iter::once(&self.core.deferred)) {
            pending.extend(lane.queue.take_all());
            lane.runner.clear();
        }
        self.core.deferred_requested.set(false);

        let mut resumed = 0usize;
        for continuation in pending {
            if !continuation.is_resume() {
                continue;
            }
            resumed += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation.invoke())) {
                self.publish_unhandled(Fault::from_panic(payload));
            }
        }

        // Tasks whose resumer sat in a repeating item or an outside source
        let mut aborted = 0usize;
        for driver in &drivers {
            match panic::catch_unwind(AssertUnwindSafe(|| driver.abort())) {
                Ok(true) => aborted += 1,
                Ok(false) => {}
                Err(payload) => self.publish_unhandled(Fault::from_panic(payload)),
            }
        }

        let pools = mem::take(&mut *self.core.pools.borrow_mut());
        let diagnostics = mem::take(&mut *self.core.diagnostics.borrow_mut());
        let shapes = pools.len();
        drop(pools);
        drop(diagnostics);

        tracing::debug!(generation, resumed, aborted, shapes, "loop pump torn down");
    }

    /// Snapshot of the pump's counters
    pub fn stats(&self) -> PumpStats {
        self.core.stats.borrow().clone()
    }
}

impl fmt::Debug for LoopPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopPump")
            .field("main_thread", &self.core.main_thread)
            .field("phases", &self.core.config.phases)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
