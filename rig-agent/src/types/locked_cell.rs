//! A mutex-guarded cell for small cross-thread values.
//!
//! Several threads touch scalar session state: the transport reader task,
//! the pump loop, and arbitrary callers of the state-change notifier. Each
//! such value lives in its own [`LockedCell`] so the lock is held only for
//! the single read or write. The lock itself is never exposed; callers
//! cannot hold it across other work, so cells cannot deadlock against each
//! other.

use parking_lot::Mutex;

/// A thread-safe mutable cell.
///
/// Values are moved in and cloned out; there is no way to borrow the
/// guarded value, which keeps every lock scope to a single access.
#[derive(Debug, Default)]
pub struct LockedCell<T> {
    value: Mutex<T>,
}

impl<T: Clone> LockedCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Clone the current value out of the cell.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Store a new value.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Store a new value and return the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.lock(), value)
    }

    /// Mutate the value under the lock.
    ///
    /// Used where several fields of the guarded value must change
    /// together (credential updates). `f` must not block or touch other
    /// cells.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut *self.value.lock());
    }
}
