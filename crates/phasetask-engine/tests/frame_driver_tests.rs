use phasetask_engine::{
    CompletionSource, Fault, Frame, LoopPump, Phase, PoolSize, PumpConfig, ShapeKey, Status, Step,
    StepContext, TaskError, TaskHandle,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Poll;

// ============================================================================
// Frames
// ============================================================================

/// Yields to the primary phase `left` times, recording every step
#[derive(Default)]
struct Countdown {
    left: u32,
    steps: Vec<u32>,
}

impl Countdown {
    fn new(left: u32) -> Self {
        Self {
            left,
            steps: Vec::new(),
        }
    }
}

impl Frame for Countdown {
    type Output = usize;

    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<usize>, TaskError> {
        self.steps.push(self.left);
        if self.left == 0 {
            return Ok(Step::Completed(self.steps.len()));
        }
        self.left -= 1;
        cx.yield_to(Phase::Primary)?;
        Ok(Step::Suspended)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sensor offline")]
struct SensorError;

/// Yields `delay` times, then fails or panics
#[derive(Default)]
struct Failing {
    delay: u32,
    panic: bool,
}

impl Frame for Failing {
    type Output = ();

    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<()>, TaskError> {
        if self.delay > 0 {
            self.delay -= 1;
            cx.yield_to(Phase::Primary)?;
            return Ok(Step::Suspended);
        }
        if self.panic {
            panic!("frame exploded");
        }
        Err(TaskError::fault(SensorError))
    }
}

/// Spawns a `Countdown` and awaits it
#[derive(Default)]
struct Parent {
    child: Option<TaskHandle<usize>>,
}

impl Frame for Parent {
    type Output = usize;

    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<usize>, TaskError> {
        let pump = cx.pump().clone();
        let child = self.child.get_or_insert_with(|| pump.spawn(Countdown::new(2)));
        match child.poll_result(cx) {
            Poll::Ready(result) => Ok(Step::Completed(result? * 10)),
            Poll::Pending => Ok(Step::Suspended),
        }
    }
}

/// Completes its own wake-up source while still stepping
#[derive(Default)]
struct SelfWaking {
    stage: u8,
}

impl Frame for SelfWaking {
    type Output = u8;

    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<u8>, TaskError> {
        if self.stage == 1 {
            return Ok(Step::Completed(self.stage));
        }
        self.stage = 1;
        let source: CompletionSource<()> = CompletionSource::new();
        source.on_completed(source.version(), cx.resumer().into());
        source.try_set_result(());
        Ok(Step::Suspended)
    }
}

fn recording_sink(pump: &LoopPump) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    pump.set_unhandled_sink(move |fault: Fault| s.borrow_mut().push(fault.to_string()));
    seen
}

// ============================================================================
// Reuse Tests
// ============================================================================

#[test]
fn test_recycled_driver_starts_clean() {
    let pump = LoopPump::new();

    let handle = pump.spawn(Countdown::new(1));
    pump.tick(Phase::Primary).unwrap();
    assert_eq!(handle.result().unwrap(), 2);

    let pool = pump.pool::<Countdown>();
    assert_eq!(pool.size(), PoolSize { pooled: 1, outstanding: 0 });

    // The pooled driver holds a default frame, not the last invocation's locals
    let driver = pool.acquire();
    assert!(driver.with_frame(|frame| frame.steps.is_empty() && frame.left == 0));
    pool.release(driver);

    // The next spawn reuses the allocation and sees only its own state
    let handle = pump.spawn(Countdown::new(0));
    assert_eq!(handle.result().unwrap(), 1);
    assert_eq!(pool.created(), 1);
}

#[test]
fn test_pool_limit_from_config() {
    let pump = LoopPump::with_config(PumpConfig::default().with_max_pooled_per_shape(2));
    let handles: Vec<_> = (0..3).map(|_| pump.spawn(Countdown::new(1))).collect();

    let sizes = pump.pool_sizes();
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes[0].0, ShapeKey::of::<Countdown>());
    assert_eq!(sizes[0].1, PoolSize { pooled: 0, outstanding: 3 });

    pump.tick(Phase::Primary).unwrap();
    for handle in handles {
        assert_eq!(handle.result().unwrap(), 2);
    }
    assert_eq!(
        pump.pool::<Countdown>().size(),
        PoolSize { pooled: 2, outstanding: 0 }
    );
}

// ============================================================================
// Await Tests
// ============================================================================

#[test]
fn test_nested_await() {
    let pump = LoopPump::new();
    let handle = pump.spawn(Parent::default());
    assert_eq!(handle.status().unwrap(), Status::Pending);

    pump.tick(Phase::Primary).unwrap();
    assert!(!handle.is_completed());

    // Child finishes on the second tick and resumes the parent inline
    pump.tick(Phase::Primary).unwrap();
    assert_eq!(handle.result().unwrap(), 30);

    assert_eq!(pump.pool::<Countdown>().size().outstanding, 0);
    assert_eq!(pump.pool::<Parent>().size().outstanding, 0);
}

#[test]
fn test_resumption_while_stepping_reruns() {
    let pump = LoopPump::new();
    let handle = pump.spawn(SelfWaking::default());
    assert_eq!(handle.result().unwrap(), 1);
}

#[test]
fn test_on_completed_callback() {
    let pump = LoopPump::new();
    let handle = pump.spawn(Countdown::new(1));
    let fired = Rc::new(Cell::new(false));
    let f = fired.clone();
    handle.on_completed(phasetask_engine::Continuation::callback(move || f.set(true)));

    assert!(!fired.get());
    pump.tick(Phase::Primary).unwrap();
    assert!(fired.get());
    assert_eq!(handle.result().unwrap(), 2);
}

#[test]
fn test_take_result_while_pending() {
    let pump = LoopPump::new();
    let mut handle = pump.spawn(Countdown::new(1));
    assert!(handle.take_result().is_none());

    pump.tick(Phase::Primary).unwrap();
    assert_eq!(handle.take_result().unwrap().unwrap(), 2);
    assert!(matches!(
        handle.take_result(),
        Some(Err(TaskError::AlreadyConsumed))
    ));
}

// ============================================================================
// Fault Tests
// ============================================================================

#[test]
fn test_error_is_stored_as_fault() {
    let pump = LoopPump::new();
    let handle = pump.spawn(Failing { delay: 1, panic: false });
    pump.tick(Phase::Primary).unwrap();

    assert_eq!(handle.status().unwrap(), Status::Faulted);
    match handle.result() {
        Err(TaskError::Faulted(fault)) => {
            assert!(fault.downcast_ref::<SensorError>().is_some());
            assert!(!fault.is_panic());
        }
        other => panic!("Expected fault, got {:?}", other),
    }
}

#[test]
fn test_panic_is_stored_as_fault() {
    let pump = LoopPump::new();
    let handle = pump.spawn(Failing { delay: 0, panic: true });
    match handle.result() {
        Err(TaskError::Faulted(fault)) => {
            assert!(fault.is_panic());
            assert_eq!(fault.to_string(), "panicked: frame exploded");
        }
        other => panic!("Expected panic fault, got {:?}", other),
    }
    assert_eq!(pump.pool::<Failing>().size().pooled, 1);
}

#[test]
fn test_forgotten_fault_goes_to_sink() {
    let pump = LoopPump::new();
    let seen = recording_sink(&pump);

    pump.forget(Failing { delay: 1, panic: false });
    assert!(seen.borrow().is_empty());
    pump.tick(Phase::Primary).unwrap();

    assert_eq!(*seen.borrow(), vec!["sensor offline".to_string()]);
    assert_eq!(pump.stats().faults_published, 1);
    // Returned to the pool without anyone taking the result
    assert_eq!(
        pump.pool::<Failing>().size(),
        PoolSize { pooled: 1, outstanding: 0 }
    );
}

#[test]
fn test_dropped_handle_fault_goes_to_sink() {
    let pump = LoopPump::new();
    let seen = recording_sink(&pump);

    let handle = pump.spawn(Failing { delay: 1, panic: true });
    drop(handle);
    pump.tick(Phase::Primary).unwrap();

    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].contains("frame exploded"));
    assert_eq!(pump.pool::<Failing>().size().outstanding, 0);
}

#[test]
fn test_completed_handle_dropped_recycles() {
    let pump = LoopPump::new();
    let seen = recording_sink(&pump);

    let handle = pump.spawn(Countdown::new(0));
    assert!(handle.is_completed());
    drop(handle);

    assert!(seen.borrow().is_empty());
    assert_eq!(pump.pool::<Countdown>().size().pooled, 1);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_cancel_epoch() {
    let pump = LoopPump::new();
    let seen = recording_sink(&pump);

    let before = pump.global_cancellation_token();
    let early = pump.spawn_with_cancel(Countdown::new(1), before.clone());
    pump.forget_with_cancel(Countdown::new(1), before.clone());

    pump.cancel_all();
    let after = pump.global_cancellation_token();
    let late = pump.spawn_with_cancel(Countdown::new(1), after.clone());

    assert!(before.is_canceled());
    assert!(!after.is_canceled());

    // Cancellation is observed at the next resumption
    assert_eq!(early.status().unwrap(), Status::Pending);
    pump.tick(Phase::Primary).unwrap();

    assert!(matches!(early.result(), Err(TaskError::Canceled)));
    assert_eq!(late.result().unwrap(), 2);
    // Canceled fire-and-forget tasks are not reported
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_frame_checks_cancellation_itself() {
    #[derive(Default)]
    struct Checking;

    impl Frame for Checking {
        type Output = ();

        fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<()>, TaskError> {
            assert!(cx.cancel_token().can_be_canceled());
            cx.check_canceled()?;
            Ok(Step::Completed(()))
        }
    }

    let pump = LoopPump::new();
    let token = pump.global_cancellation_token();
    let handle = pump.spawn_with_cancel(Checking, token);
    assert!(handle.result().is_ok());
}
