use crate::return_stub::Arch;
use libos_alloc::PageAllocError;
use libos_info::status::ErrorKind;
use libos_task::Pid;
use libos_vmem::VmemError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DeferredError {
    #[error("calling conventions are not initialized")]
    ConventionsUninitialized,
    #[error("no thread with id {0}")]
    NoSuchThread(Pid),
    #[error("thread {0} has no work in flight")]
    NoWorkInFlight(Pid),
    #[error("private stack exhausted")]
    StackExhausted,
    #[error("address {0:#x} is out of reach of the calling convention")]
    OutOfReach(u64),
    #[error("no return stub for {0:?}")]
    NoReturnStub(Arch),
    #[error("timed out waiting for completion")]
    Timeout,
    #[error("work was discarded before it completed")]
    Discarded,
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Alloc(#[from] PageAllocError),
}

impl DeferredError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConventionsUninitialized | Self::NoWorkInFlight(_) => ErrorKind::IllegalState,
            Self::NoSuchThread(_) | Self::OutOfReach(_) => ErrorKind::IllegalArgument,
            Self::StackExhausted => ErrorKind::OutOfMemory,
            Self::NoReturnStub(_) => ErrorKind::NotImplemented,
            Self::Timeout => ErrorKind::Timeout,
            Self::Discarded => ErrorKind::Discarded,
            Self::Vmem(e) => e.kind(),
            Self::Alloc(e) => e.kind(),
        }
    }
}
