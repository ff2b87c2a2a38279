use crate::addresses::VirtualAddress;
use libos_info::status::ErrorKind;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),
    #[error("range at {start} overlaps an existing mapping")]
    AlreadyMapped { start: VirtualAddress },
    #[error("page {0} is not mapped")]
    NotMapped(usize),
    #[error("page index {index} outside a zone of {pages} pages")]
    PageOutOfRange { index: usize, pages: usize },
    #[error("host primitive failed: {0}")]
    Host(&'static str),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl VmemError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::IllegalArgument(_) => ErrorKind::IllegalArgument,
            Self::AlreadyMapped { .. } => ErrorKind::AlreadyMapped,
            Self::NotMapped(_) => ErrorKind::NotMapped,
            Self::PageOutOfRange { .. } => ErrorKind::PageOutOfRange,
            Self::Host(_) => ErrorKind::Internal,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}
