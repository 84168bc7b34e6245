//! Frame driver pool for reusing drivers across task lifetimes.
//!
//! When a task's result has been consumed, its driver (frame storage,
//! completion source and continuation buffer) is returned to the pool. The
//! next task of the same frame shape acquires the recycled driver instead of
//! allocating a new one.

use crate::scheduler::pump::PumpCore;
use crate::task::driver::{Abort, FrameDriver};
use crate::task::frame::Frame;
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Identity of a frame shape, used to key pools and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    id: TypeId,
    name: &'static str,
}

impl ShapeKey {
    /// Key for frame type `F`
    pub fn of<F: 'static>() -> Self {
        Self {
            id: TypeId::of::<F>(),
            name: std::any::type_name::<F>(),
        }
    }

    /// Type name of the frame
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `TypeId` of the frame
    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Pool occupancy reported to diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSize {
    /// Idle drivers ready for reuse
    pub pooled: usize,
    /// Drivers currently bound to a task
    pub outstanding: usize,
}

/// Pool of reusable drivers for one frame shape.
///
/// Keeps up to `max_size` idle drivers; drivers released beyond that are
/// dropped. Pool operations never fail: an empty pool allocates.
pub struct FramePool<F: Frame> {
    this: Weak<FramePool<F>>,
    pump: Weak<PumpCore>,
    free: RefCell<Vec<Rc<FrameDriver<F>>>>,
    max_size: usize,
    outstanding: Cell<usize>,
    created: Cell<usize>,
}

impl<F: Frame> FramePool<F> {
    pub(crate) fn new(pump: Weak<PumpCore>, max_size: usize) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            pump,
            free: RefCell::new(Vec::new()),
            max_size,
            outstanding: Cell::new(0),
            created: Cell::new(0),
        })
    }

    /// Get an idle driver from the pool, or create a new one.
    pub fn acquire(&self) -> Rc<FrameDriver<F>> {
        let recycled = self.free.borrow_mut().pop();
        let driver = recycled.unwrap_or_else(|| {
            self.created.set(self.created.get() + 1);
            let driver = FrameDriver::new(self.this.clone(), self.pump.clone());
            if let Some(pump) = self.pump.upgrade() {
                pump.track_driver(Rc::downgrade(&driver) as Weak<dyn Abort>);
            }
            driver
        });
        self.outstanding.set(self.outstanding.get() + 1);
        driver
    }

    /// Reset a driver and return it to the pool for reuse.
    pub fn release(&self, driver: Rc<FrameDriver<F>>) {
        driver.reset();
        self.outstanding
            .set(self.outstanding.get().saturating_sub(1));

        let overflow = {
            let mut free = self.free.borrow_mut();
            if free.len() < self.max_size {
                free.push(driver);
                None
            } else {
                Some(driver)
            }
        };
        // else: drop outside the borrow, pool is full
        drop(overflow);
    }

    /// Current occupancy
    pub fn size(&self) -> PoolSize {
        PoolSize {
            pooled: self.free.borrow().len(),
            outstanding: self.outstanding.get(),
        }
    }

    /// Total drivers ever allocated by this pool
    pub fn created(&self) -> usize {
        self.created.get()
    }

    /// Maximum number of idle drivers kept
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
