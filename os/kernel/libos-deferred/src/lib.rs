//! # Deferred Execution
//!
//! Runs caller-chosen user code on an arbitrary thread of a controlled
//! process, the way an APC does: the thread's next return to user mode is
//! redirected into the requested function, and its return lands on a
//! per-process stub that reports the result back through the delegated
//! call channel.
//!
//! ## Flow
//!
//! ```text
//! schedule(work, tid) ─► FIFO of tid ─► (front) build frame on private stack
//!                                        install registers, kick thread
//!   thread returns to user ─► on_return_to_user swaps in the registers
//!   work returns ─► return stub ─► NTFY_COMPLETE ─► finish()
//!                                    pop, notify, next item or restore
//! ```
//!
//! * [`calling_convention`]: register/stack layout per ABI.
//! * [`return_stub`]: the machine code every injected call returns into.
//! * [`DeferredExecution`]: the engine and its per-process registry.
//! * [`Job`]: the caller's side of one work item.
//!
//! [`init_calling_conventions`] must run once before anything is scheduled.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod calling_convention;
mod engine;
mod error;
mod job;
mod preempt;
mod private_stack;
mod registry;
pub mod return_stub;
mod stack;
mod work;

pub use calling_convention::{
    CallingConvention, ConventionRegistry, ConventionSetup, calling_convention,
    init_calling_conventions,
};
pub use engine::{DeferredExecution, EngineHost};
pub use error::DeferredError;
pub use job::Job;
pub use preempt::PreemptSlot;
pub use private_stack::PrivateStack;
pub use return_stub::{Arch, ReturnStub, return_stub};
pub use stack::{StackBuilder, StackPusher, WordSize};
pub use work::{CompletionCallback, Notify, Work, WorkHandler, WorkState};
