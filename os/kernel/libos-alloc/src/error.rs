use libos_info::status::ErrorKind;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageAllocError {
    #[error("out of memory allocating {requested} pages")]
    OutOfMemory { requested: usize },
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),
    #[error("page array header is corrupt (magic {magic:#06x})")]
    CorruptHeader { magic: u16 },
}

impl PageAllocError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::IllegalArgument(_) => ErrorKind::IllegalArgument,
            Self::CorruptHeader { .. } => ErrorKind::Internal,
        }
    }
}
