//! Poison-tolerant wrappers around `std::sync` locking.
//!
//! A poisoned mutex here would mean a worker thread panicked mid-pulse; the
//! protected state (pin handles, counters) is still structurally valid, so
//! every lock site in the crate recovers the guard instead of propagating the
//! poison.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if it was poisoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block on a condition variable, recovering the guard if poisoned.
pub(crate) fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
