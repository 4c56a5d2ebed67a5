use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock recovery used throughout the crate: observers and registries stay
/// usable after a panicking holder, since their state is valid between
/// mutations.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What to do with an error when no `on_error` observer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log the error at `error` level and continue.
    #[default]
    Log,
    /// Panic the task that observed the error.
    Panic,
}

/// An ordered list of observer callbacks.
///
/// Observers are invoked synchronously in registration order. Registration
/// after delivery has started only affects subsequent notifications.
pub(crate) struct Observers<F: ?Sized> {
    list: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> Observers<F> {
    pub(crate) fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, observer: Arc<F>) {
        write_lock(&self.list).push(observer);
    }

    /// Snapshot the current observers, in registration order.
    ///
    /// Delivery iterates the snapshot without holding the lock, so an
    /// observer may itself register further observers.
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        read_lock(&self.list).clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        read_lock(&self.list).is_empty()
    }
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self::new()
    }
}
