//! The code every injected call returns into.
//!
//! The stub hands the work's return value to the delegated call channel:
//!
//! ```text
//! mov rsi, rax                    ; 48 89 C6
//! mov rdi, NTFY_COMPLETE          ; 48 C7 C7 imm32
//! mov rax, DELEGATED_SYSCALL_NR   ; 48 C7 C0 imm32
//! syscall                         ; 0F 05
//! ```

use libos_info::deferred::{DELEGATED_SYSCALL_NR, attention};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Arch {
    X86_64,
}

impl Arch {
    /// Architecture of the running host.
    #[must_use]
    pub const fn host() -> Self {
        Self::X86_64
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReturnStub {
    pub arch: Arch,
    pub code: &'static [u8],
}

const X86_64_STUB_LEN: usize = 19;

#[allow(clippy::cast_possible_truncation)]
const fn x86_64_stub() -> [u8; X86_64_STUB_LEN] {
    let id = (attention::NTFY_COMPLETE as u32).to_le_bytes();
    let nr = DELEGATED_SYSCALL_NR.to_le_bytes();
    [
        0x48, 0x89, 0xC6, // mov rsi, rax
        0x48, 0xC7, 0xC7, id[0], id[1], id[2], id[3], // mov rdi, imm32
        0x48, 0xC7, 0xC0, nr[0], nr[1], nr[2], nr[3], // mov rax, imm32
        0x0F, 0x05, // syscall
    ]
}

static X86_64_CODE: [u8; X86_64_STUB_LEN] = x86_64_stub();

static STUBS: [ReturnStub; 1] = [ReturnStub {
    arch: Arch::X86_64,
    code: &X86_64_CODE,
}];

/// Stub for `arch`, if one exists.
#[must_use]
pub fn return_stub(arch: Arch) -> Option<&'static ReturnStub> {
    STUBS.iter().find(|stub| stub.arch == arch)
}
