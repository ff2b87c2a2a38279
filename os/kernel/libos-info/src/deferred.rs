//! # Deferred Execution Configuration

use crate::memory::{PAGE_SIZE, PhysicalLocation};

/// Pages in each per-thread private stack (mapped into kernel and user space).
pub const DEFERRED_STACK_PAGES: usize = 4;

/// Pages reserved for the per-process return stub.
pub const RETURN_STUB_PAGES: usize = 1;

/// Host syscall number that routes into the delegated call dispatcher.
///
/// The return stub loads this into `rax` before issuing `syscall`.
pub const DELEGATED_SYSCALL_NR: u32 = 0x1337;

/// Maximum number of word-sized parameters a work item can carry.
pub const MAX_WORK_PARAMETERS: usize = 4;

/// Number of word-sized arguments a delegated call carries.
pub const DELEGATED_MAX_ARGS: usize = 5;

/// Largest user buffer an `EXTENDED` delegated call may pass in.
pub const DELEGATED_MAX_BUFFER: usize = 64 * 1024;

/// End of the range reachable from 32-bit code.
pub const USER_32BIT_LIMIT: u64 = 1 << 32;

/// Attention ids of the delegated call channel.
///
/// The id travels in `rdi`, the arguments in `rsi`, `rdx`, `r10`, `r8`, `r9`.
pub mod attention {
    /// Enumerate the named callback database.
    pub const DB_PULL: u64 = 3;
    /// Call a named callback with a user buffer.
    pub const EXTENDED: u64 = 4;
    /// Injected work returned; `rsi` carries its result.
    pub const NTFY_COMPLETE: u64 = 5;
    /// Call a named callback with register arguments.
    pub const SHORT: u64 = 6;
}

/// Runtime knobs of the deferred execution engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EngineConfig {
    /// Pages per private stack.
    pub stack_pages: usize,
    /// Where private stack frames are allocated from.
    pub stack_location: PhysicalLocation,
    /// Preferred user address for private stacks, `None` lets the host pick.
    pub user_stack_hint: Option<u64>,
    /// Preferred user address for the return stub, `None` lets the host pick.
    pub return_stub_hint: Option<u64>,
    /// Private stacks and the return stub end at or below this address.
    /// IA32 conventions need it at [`USER_32BIT_LIMIT`] or lower.
    pub user_limit: Option<u64>,
}

impl EngineConfig {
    /// Size of one private stack in bytes.
    #[inline]
    #[must_use]
    pub const fn stack_bytes(&self) -> u64 {
        self.stack_pages as u64 * PAGE_SIZE
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_pages: DEFERRED_STACK_PAGES,
            stack_location: PhysicalLocation::Normal,
            user_stack_hint: None,
            return_stub_hint: None,
            user_limit: Some(USER_32BIT_LIMIT),
        }
    }
}

const _: () = {
    assert!(DEFERRED_STACK_PAGES > 0);
    assert!(RETURN_STUB_PAGES > 0);
    assert!(attention::NTFY_COMPLETE <= i32::MAX as u64);
};
