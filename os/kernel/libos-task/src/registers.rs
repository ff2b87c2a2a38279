/// User-mode register state of a task, as saved on kernel entry.
///
/// Layout follows the hardware frame first (`rip`, `cs`, `rflags`, `rsp`,
/// `ss`), then the general purpose registers in push order.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct UserRegisters {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl UserRegisters {
    /// Take over the segment selectors and flags of `live`.
    ///
    /// Injected states only describe where to run; privilege and flags stay
    /// those the task actually entered the kernel with.
    #[inline]
    pub const fn inherit_frame(&mut self, live: &Self) {
        self.cs = live.cs;
        self.ss = live.ss;
        self.rflags = live.rflags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherit_keeps_target_and_args() {
        let live = UserRegisters {
            cs: 0x33,
            ss: 0x2b,
            rflags: 0x246,
            rip: 0xdead,
            ..UserRegisters::default()
        };
        let mut next = UserRegisters {
            rip: 0x40_1000,
            rdi: 1,
            ..UserRegisters::default()
        };
        next.inherit_frame(&live);
        assert_eq!(next.rip, 0x40_1000);
        assert_eq!(next.rdi, 1);
        assert_eq!((next.cs, next.ss, next.rflags), (0x33, 0x2b, 0x246));
    }
}
