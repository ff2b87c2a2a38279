use core::sync::atomic::{AtomicBool, Ordering, fence};
use libos_sync::SpinLock;
use libos_task::UserRegisters;

#[derive(Default)]
struct Frames {
    pending: Option<UserRegisters>,
    original: Option<UserRegisters>,
}

/// Register handoff between the engine and a thread's return to user mode.
///
/// The engine [`install`](Self::install)s the state to switch to; the thread
/// picks it up in [`apply`](Self::apply) on its next way out of the kernel.
/// The state the thread had before its first redirection is kept until the
/// queue drains.
#[derive(Default)]
pub struct PreemptSlot {
    swap: AtomicBool,
    frames: SpinLock<Frames>,
}

impl PreemptSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            swap: AtomicBool::new(false),
            frames: SpinLock::new(Frames {
                pending: None,
                original: None,
            }),
        }
    }

    /// Publish `regs` for the thread's next return to user mode.
    pub fn install(&self, regs: UserRegisters) {
        self.frames.lock().pending = Some(regs);
        self.swap.store(true, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.swap.load(Ordering::Acquire)
    }

    /// Swap a pending state into `live`. Returns whether anything changed.
    pub fn apply(&self, live: &mut UserRegisters) -> bool {
        if !self.swap.swap(false, Ordering::AcqRel) {
            return false;
        }

        let mut frames = self.frames.lock();
        let Some(mut next) = frames.pending.take() else {
            return false;
        };
        if frames.original.is_none() {
            frames.original = Some(*live);
        }
        next.inherit_frame(live);
        *live = next;
        true
    }

    /// Start the next item directly from the completion path.
    ///
    /// The thread is already in the kernel on our behalf, so the new state
    /// replaces `live` right away instead of waiting for the next return.
    pub fn chain(&self, live: &mut UserRegisters, mut next: UserRegisters) {
        self.swap.store(false, Ordering::Release);
        self.frames.lock().pending = None;
        next.inherit_frame(live);
        *live = next;
    }

    /// The pre-redirection state; clears the slot.
    pub fn take_original(&self) -> Option<UserRegisters> {
        self.swap.store(false, Ordering::Release);
        let mut frames = self.frames.lock();
        frames.pending = None;
        frames.original.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> UserRegisters {
        UserRegisters {
            rip: 0x1111,
            rsp: 0x7ff0,
            cs: 0x33,
            ss: 0x2b,
            rflags: 0x246,
            ..UserRegisters::default()
        }
    }

    fn injected(rip: u64) -> UserRegisters {
        UserRegisters {
            rip,
            rdi: 42,
            ..UserRegisters::default()
        }
    }

    #[test]
    fn nothing_pending_leaves_registers_alone() {
        let slot = PreemptSlot::new();
        let mut regs = live();
        assert!(!slot.apply(&mut regs));
        assert_eq!(regs, live());
        assert_eq!(slot.take_original(), None);
    }

    #[test]
    fn first_hop_saves_the_original() {
        let slot = PreemptSlot::new();
        slot.install(injected(0x40_1000));
        assert!(slot.is_pending());

        let mut regs = live();
        assert!(slot.apply(&mut regs));
        assert_eq!(regs.rip, 0x40_1000);
        assert_eq!(regs.rdi, 42);
        assert_eq!(regs.cs, 0x33);
        assert_eq!(regs.rflags, 0x246);
        assert!(!slot.is_pending());

        // A second hop keeps the very first state.
        slot.install(injected(0x40_2000));
        assert!(slot.apply(&mut regs));
        assert_eq!(slot.take_original(), Some(live()));
        assert_eq!(slot.take_original(), None);
    }

    #[test]
    fn chaining_clears_a_stale_pending_state() {
        let slot = PreemptSlot::new();
        slot.install(injected(0x40_1000));
        let mut regs = live();
        slot.apply(&mut regs);

        slot.chain(&mut regs, injected(0x40_3000));
        assert_eq!(regs.rip, 0x40_3000);
        assert_eq!(regs.ss, 0x2b);
        assert!(!slot.apply(&mut regs));
        assert_eq!(slot.take_original(), Some(live()));
    }
}
