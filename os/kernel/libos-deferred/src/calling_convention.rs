//! How a work item's parameters reach the injected function.
//!
//! Each ABI is a [`ConventionSetup`] object; the engine asks it for the
//! register file and the stack arguments, then pushes the return stub
//! address as the return slot in the convention's word size.

use crate::error::DeferredError;
use crate::stack::{StackPusher, WordSize};
use crate::work::Work;
use libos_sync::SyncOnceCell;
use libos_task::UserRegisters;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CallingConvention {
    /// System V AMD64.
    SysV,
    /// Microsoft x64.
    Win64,
    /// 32-bit cdecl.
    Ia32Cdecl,
    /// 32-bit stdcall. Laid out like cdecl, the callee pops.
    Ia32Stdcall,
}

impl CallingConvention {
    const COUNT: usize = 4;

    const fn index(self) -> usize {
        match self {
            Self::SysV => 0,
            Self::Win64 => 1,
            Self::Ia32Cdecl => 2,
            Self::Ia32Stdcall => 3,
        }
    }
}

pub trait ConventionSetup: Send + Sync {
    /// Width of the return slot.
    fn word_size(&self) -> WordSize;

    /// Argument registers and the entry point.
    fn setup_registers(&self, work: &Work, regs: &mut UserRegisters);

    /// Stack-passed arguments, pushed below the aligned top.
    ///
    /// # Errors
    /// [`DeferredError::StackExhausted`] if the private stack is too small.
    fn setup_stack(&self, work: &Work, stack: &mut dyn StackPusher) -> Result<(), DeferredError>;
}

struct SysV;

impl ConventionSetup for SysV {
    fn word_size(&self) -> WordSize {
        WordSize::Qword
    }

    fn setup_registers(&self, work: &Work, regs: &mut UserRegisters) {
        let [a, b, c, d] = work.parameters;
        regs.rdi = a;
        regs.rsi = b;
        regs.rdx = c;
        regs.rcx = d;
        regs.rip = work.address;
    }

    fn setup_stack(&self, _work: &Work, _stack: &mut dyn StackPusher) -> Result<(), DeferredError> {
        Ok(())
    }
}

/// Bytes of home space a Win64 caller reserves above the return address.
const WIN64_SHADOW_SPACE: usize = 32;

struct Win64;

impl ConventionSetup for Win64 {
    fn word_size(&self) -> WordSize {
        WordSize::Qword
    }

    fn setup_registers(&self, work: &Work, regs: &mut UserRegisters) {
        let [a, b, c, d] = work.parameters;
        regs.rcx = a;
        regs.rdx = b;
        regs.r8 = c;
        regs.r9 = d;
        regs.rip = work.address;
    }

    fn setup_stack(&self, _work: &Work, stack: &mut dyn StackPusher) -> Result<(), DeferredError> {
        stack.skip(WIN64_SHADOW_SPACE)
    }
}

struct Ia32Cdecl;

impl ConventionSetup for Ia32Cdecl {
    fn word_size(&self) -> WordSize {
        WordSize::Dword
    }

    fn setup_registers(&self, work: &Work, regs: &mut UserRegisters) {
        regs.rip = work.address;
    }

    fn setup_stack(&self, work: &Work, stack: &mut dyn StackPusher) -> Result<(), DeferredError> {
        for &parameter in work.parameters.iter().rev() {
            stack.push(parameter, WordSize::Dword)?;
        }
        Ok(())
    }
}

static SYSV: SysV = SysV;
static WIN64: Win64 = Win64;
static IA32_CDECL: Ia32Cdecl = Ia32Cdecl;

type ConventionTable = [&'static dyn ConventionSetup; CallingConvention::COUNT];

/// Convention objects, filled once.
pub struct ConventionRegistry {
    table: SyncOnceCell<ConventionTable>,
}

impl ConventionRegistry {
    /// An empty registry; [`get`](Self::get) fails until [`init`](Self::init).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: SyncOnceCell::new(),
        }
    }

    /// Fill the table. Later calls are no-ops.
    pub fn init(&self) {
        self.table.get_or_init(|| [&SYSV, &WIN64, &IA32_CDECL, &IA32_CDECL]);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.table.get().is_some()
    }

    /// # Errors
    /// [`DeferredError::ConventionsUninitialized`] before [`init`](Self::init).
    pub fn get(&self, cc: CallingConvention) -> Result<&'static dyn ConventionSetup, DeferredError> {
        self.table
            .get()
            .map(|table| table[cc.index()])
            .ok_or(DeferredError::ConventionsUninitialized)
    }
}

impl Default for ConventionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static CONVENTIONS: ConventionRegistry = ConventionRegistry::new();

/// Fill the global convention table. Call once at module init.
pub fn init_calling_conventions() {
    CONVENTIONS.init();
}

/// The global convention object for `cc`.
///
/// # Errors
/// [`DeferredError::ConventionsUninitialized`] before
/// [`init_calling_conventions`].
pub fn calling_convention(cc: CallingConvention) -> Result<&'static dyn ConventionSetup, DeferredError> {
    CONVENTIONS.get(cc)
}
