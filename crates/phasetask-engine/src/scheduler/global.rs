//! The frame-loop thread's pump
//!
//! `current()` creates the pump on first use and hands it to the installed
//! host hook so the host can wire its per-tick notifications. `teardown()`
//! shuts it down and clears the slot; the next `current()` builds a fresh
//! pump and runs the hook again, which is how a host reload rewires itself.
//!
//! The pump is per thread. The main-thread id and sender are additionally
//! published process-wide so worker threads can find their way back.

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::phase::Phase;
use crate::scheduler::handoff::MainThreadSender;
use crate::scheduler::pump::{LoopPump, PumpConfig};
use crate::scheduler::repeating::RepeatingItem;
use crate::task::{Continuation, Frame, TaskHandle};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread::{self, ThreadId};

type HostHook = Rc<dyn Fn(&LoopPump)>;

thread_local! {
    static CURRENT: RefCell<Option<LoopPump>> = RefCell::new(None);
    static HOST_HOOK: RefCell<Option<HostHook>> = RefCell::new(None);
    static DEFAULT_CONFIG: RefCell<PumpConfig> = RefCell::new(PumpConfig::default());
}

struct MainThread {
    id: ThreadId,
    sender: Option<MainThreadSender>,
}

static MAIN_THREAD: Lazy<RwLock<Option<MainThread>>> = Lazy::new(|| RwLock::new(None));

fn publish_main_thread(pump: &LoopPump) {
    *MAIN_THREAD.write() = Some(MainThread {
        id: pump.main_thread_id(),
        sender: pump.main_thread_sender().ok(),
    });
}

fn retract_main_thread(pump: &LoopPump) {
    let mut slot = MAIN_THREAD.write();
    if slot.as_ref().map(|main| main.id) == Some(pump.main_thread_id()) {
        *slot = None;
    }
}

/// The pump of the calling thread, created (and handed to the host hook) on first use
pub fn current() -> LoopPump {
    if let Some(pump) = CURRENT.with(|slot| slot.borrow().clone()) {
        return pump;
    }

    let config = DEFAULT_CONFIG.with(|config| config.borrow().clone());
    let pump = LoopPump::with_config(config);
    CURRENT.with(|slot| *slot.borrow_mut() = Some(pump.clone()));
    publish_main_thread(&pump);
    tracing::debug!(thread = ?pump.main_thread_id(), "global loop pump created");

    // The hook may call back into `current()`; the slot is already filled
    let hook = HOST_HOOK.with(|hook| hook.borrow().clone());
    if let Some(hook) = hook {
        hook(&pump);
    }
    pump
}

/// Create the calling thread's pump if it does not exist yet
///
/// Returns whether a pump was created, in which case the host hook ran.
pub fn ensure_initialized() -> bool {
    if is_initialized() {
        return false;
    }
    current();
    true
}

/// Replace the calling thread's pump with `pump`, returning the previous one
///
/// The previous pump is not torn down. The host hook is not run.
pub fn install(pump: LoopPump) -> Option<LoopPump> {
    publish_main_thread(&pump);
    CURRENT.with(|slot| slot.borrow_mut().replace(pump))
}

/// Tear down the calling thread's pump and clear the slot
///
/// Does nothing if no pump exists.
pub fn teardown() {
    let pump = CURRENT.with(|slot| slot.borrow_mut().take());
    if let Some(pump) = pump {
        retract_main_thread(&pump);
        pump.teardown();
        tracing::debug!("global loop pump cleared");
    }
}

/// Whether the calling thread has a pump
pub fn is_initialized() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Install the callback run every time `current()` creates a pump
pub fn set_host_hook(hook: impl Fn(&LoopPump) + 'static) {
    HOST_HOOK.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

/// Remove the host hook
pub fn clear_host_hook() {
    let previous = HOST_HOOK.with(|slot| slot.borrow_mut().take());
    drop(previous);
}

/// Configuration for pumps created by `current()` from now on
pub fn set_default_config(config: PumpConfig) {
    DEFAULT_CONFIG.with(|slot| *slot.borrow_mut() = config);
}

/// `current().add_continuation(..)`
pub fn add_continuation(phase: Phase, continuation: impl Into<Continuation>) -> Result<(), TaskError> {
    current().add_continuation(phase, continuation)
}

/// `current().add_action(..)`
pub fn add_action(phase: Phase, item: impl RepeatingItem + 'static) -> Result<(), TaskError> {
    current().add_action(phase, item)
}

/// `current().add_deferred_continuation(..)`
pub fn add_deferred_continuation(continuation: impl Into<Continuation>) -> Result<(), TaskError> {
    current().add_deferred_continuation(continuation)
}

/// `current().add_deferred_action(..)`
pub fn add_deferred_action(item: impl RepeatingItem + 'static) -> Result<(), TaskError> {
    current().add_deferred_action(item)
}

/// `current().spawn(..)`
pub fn spawn<F: Frame>(frame: F) -> TaskHandle<F::Output> {
    current().spawn(frame)
}

/// `current().forget(..)`
pub fn forget<F: Frame>(frame: F) {
    current().forget(frame)
}

/// `current().global_cancellation_token()`
pub fn global_cancellation_token() -> CancelToken {
    current().global_cancellation_token()
}

/// `current().cancel_all()`
pub fn cancel_all() -> u64 {
    current().cancel_all()
}

/// Id of the thread that owns the global pump, from any thread
pub fn main_thread_id() -> Option<ThreadId> {
    MAIN_THREAD.read().as_ref().map(|main| main.id)
}

/// Whether the caller is the thread that owns the global pump
pub fn is_on_main_thread() -> bool {
    main_thread_id() == Some(thread::current().id())
}

/// Sender for the global pump, from any thread
pub fn main_thread_sender() -> Option<MainThreadSender> {
    MAIN_THREAD.read().as_ref().and_then(|main| main.sender.clone())
}
