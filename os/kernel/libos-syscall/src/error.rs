use libos_deferred::DeferredError;
use libos_info::status::ErrorKind;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("no callback with id {0}")]
    UnknownCallback(u32),
    #[error("callback id {0:#x} is out of range")]
    CallbackIdOutOfRange(u64),
    #[error("callback {0} has a different calling style")]
    WrongKind(u32),
    #[error("callback name is empty or longer than 255 bytes")]
    BadName,
    #[error("a callback with this name is already registered")]
    DuplicateName,
    #[error("callback ids exhausted")]
    DatabaseFull,
    #[error("buffer of {0} bytes exceeds the delegated call limit")]
    BufferTooLarge(u64),
    #[error("user memory at {0:#x} is not accessible")]
    BadUserAddress(u64),
    #[error(transparent)]
    Deferred(#[from] DeferredError),
}

impl DispatchError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCallback(_)
            | Self::CallbackIdOutOfRange(_)
            | Self::WrongKind(_)
            | Self::BadName
            | Self::BufferTooLarge(_)
            | Self::BadUserAddress(_) => ErrorKind::IllegalArgument,
            Self::DuplicateName => ErrorKind::AlreadyMapped,
            Self::DatabaseFull => ErrorKind::OutOfMemory,
            Self::Deferred(e) => e.kind(),
        }
    }
}
