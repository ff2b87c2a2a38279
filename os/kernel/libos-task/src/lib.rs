//! # Host Task Handles
//!
//! The core never touches `task_struct` directly. It holds opaque
//! [`TaskPtr`]s and asks the host, through [`TaskOps`], for pids, reference
//! counts and wakeups.
//!
//! [`TaskRef`] is the scope guard over a host task reference: constructing
//! one takes a reference (or adopts one the host already handed out),
//! cloning takes another, and dropping gives it back on every path.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod registers;
mod task_ref;

pub use registers::UserRegisters;
pub use task_ref::TaskRef;

use alloc::boxed::Box;
use core::fmt;

/// Host thread id (`pid` in kernel terms) or thread group id (`tgid`).
pub type Pid = i32;

/// Opaque host task pointer.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskPtr(usize);

impl TaskPtr {
    #[inline]
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaskPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskPtr({:#x})", self.0)
    }
}

/// Called with the thread group id of an exiting process.
pub type ExitHook = Box<dyn Fn(Pid) + Send + Sync>;

/// Process and thread services of the host kernel.
pub trait TaskOps: Send + Sync {
    /// Take a reference on `task`.
    fn get_task(&self, task: TaskPtr);

    /// Drop a reference taken by [`get_task`](Self::get_task) or [`find_task`](Self::find_task).
    fn put_task(&self, task: TaskPtr);

    fn pid(&self, task: TaskPtr) -> Pid;

    fn tgid(&self, task: TaskPtr) -> Pid;

    /// The task executing on this CPU. No reference is taken.
    fn current(&self) -> TaskPtr;

    /// Look up a thread by id. The returned task is already referenced.
    fn find_task(&self, tid: Pid) -> Option<TaskPtr>;

    /// Whether `task` is currently on a CPU.
    fn is_running(&self, task: TaskPtr) -> bool;

    /// Kick `task` out of an interruptible sleep.
    fn wake_up(&self, task: TaskPtr);

    /// Run `hook` whenever a thread group leader exits.
    fn add_exit_hook(&self, hook: ExitHook);
}
