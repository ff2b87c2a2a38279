//! # LibOS synchronization primitives
//!
//! The deferred execution core runs on whatever thread the host kernel calls
//! it from, so it brings its own small set of primitives:
//!
//! * [`SpinLock`]: test-and-test-and-set lock with an RAII guard. Used for the
//!   process-wide deferred execution lock, the detach lock and per-thread
//!   preemption slots.
//! * [`SyncOnceCell`]: one-time initialization (calling-convention table,
//!   logger slot).
//! * [`Completion`]: a one-shot signal a caller can block on with an optional
//!   timeout. Blocking is delegated to a host [`Sleeper`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod completion;
mod spin_lock;
mod sync_once_cell;

pub use completion::{Completion, Sleeper, TimedOut};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
