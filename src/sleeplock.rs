use core::cell::Cell;

use crate::proc::{myproc, sleep, wakeup};
use crate::spinlock::Spinlock;

/// Long-term lock for processes: the holder may block while keeping it,
/// and waiters give up the CPU instead of spinning.
pub struct Sleeplock {
    locked: Cell<bool>, // Is the lock held?
    lk: Spinlock,       // spinlock protecting this sleep lock

    // For debugging:
    name: &'static str, // Name of lock.
    pid: Cell<i32>,     // Process holding lock
}

// the Cells are only touched under `lk`.
unsafe impl Sync for Sleeplock {}

impl Sleeplock {
    pub const fn new(name: &'static str) -> Self {
        Sleeplock {
            locked: Cell::new(false),
            lk: Spinlock::new("sleep lock"),
            name,
            pid: Cell::new(0),
        }
    }

    pub fn acquire_sleep(&self) {
        self.lk.acquire();
        while self.locked.get() {
            sleep(self as *const Sleeplock as usize, &self.lk);
        }
        self.locked.set(true);
        self.pid.set(myproc().pid);
        self.lk.release();
    }

    pub fn release_sleep(&self) {
        if !self.holding_sleep() {
            panic!("release_sleep {}", self.name);
        }
        self.lk.acquire();
        self.locked.set(false);
        self.pid.set(0);
        wakeup(self as *const Sleeplock as usize);
        self.lk.release();
    }

    pub fn holding_sleep(&self) -> bool {
        self.lk.acquire();
        let r = self.locked.get() && self.pid.get() == myproc().pid;
        self.lk.release();
        r
    }
}
