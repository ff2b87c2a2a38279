//! # Status Codes
//!
//! Every crate error maps onto one [`ErrorKind`]; the kind decides the numeric
//! status returned to callers on the other side of the delegated call
//! boundary. Success is [`STATUS_OK`], failures are negative.

use core::fmt;

/// Successful completion.
pub const STATUS_OK: i64 = 0;

/// Error taxonomy shared by all layers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// An allocation failed at some layer.
    OutOfMemory,
    /// Null/zero handle, bad size, unknown id.
    IllegalArgument,
    /// Zone or slot is already mapped.
    AlreadyMapped,
    /// Zone or slot is not mapped.
    NotMapped,
    /// An underlying host primitive failed.
    Internal,
    /// Surface intentionally left unfinished.
    NotImplemented,
    /// Page index exceeds the zone's page count.
    PageOutOfRange,
    /// A wait ran out of time.
    Timeout,
    /// Queued work was thrown away before it ran.
    Discarded,
    /// Operation is not valid in the current state.
    IllegalState,
}

impl ErrorKind {
    /// Numeric status for this kind.
    #[must_use]
    pub const fn status(self) -> i64 {
        match self {
            Self::OutOfMemory => -1,
            Self::IllegalArgument => -2,
            Self::AlreadyMapped => -3,
            Self::NotMapped => -4,
            Self::Internal => -5,
            Self::NotImplemented => -6,
            Self::PageOutOfRange => -7,
            Self::Timeout => -8,
            Self::Discarded => -9,
            Self::IllegalState => -10,
        }
    }

    /// Status encoded as a register-sized word (two's complement).
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn status_word(self) -> u64 {
        self.status() as u64
    }

    /// Reverse of [`status`](Self::status).
    #[must_use]
    pub const fn from_status(status: i64) -> Option<Self> {
        Some(match status {
            -1 => Self::OutOfMemory,
            -2 => Self::IllegalArgument,
            -3 => Self::AlreadyMapped,
            -4 => Self::NotMapped,
            -5 => Self::Internal,
            -6 => Self::NotImplemented,
            -7 => Self::PageOutOfRange,
            -8 => Self::Timeout,
            -9 => Self::Discarded,
            -10 => Self::IllegalState,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfMemory => "out of memory",
            Self::IllegalArgument => "illegal argument",
            Self::AlreadyMapped => "already mapped",
            Self::NotMapped => "not mapped",
            Self::Internal => "internal error",
            Self::NotImplemented => "not implemented",
            Self::PageOutOfRange => "page out of range",
            Self::Timeout => "timed out",
            Self::Discarded => "discarded",
            Self::IllegalState => "illegal state",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_negative_and_invertible() {
        let kinds = [
            ErrorKind::OutOfMemory,
            ErrorKind::IllegalArgument,
            ErrorKind::AlreadyMapped,
            ErrorKind::NotMapped,
            ErrorKind::Internal,
            ErrorKind::NotImplemented,
            ErrorKind::PageOutOfRange,
            ErrorKind::Timeout,
            ErrorKind::Discarded,
            ErrorKind::IllegalState,
        ];
        for kind in kinds {
            assert!(kind.status() < STATUS_OK);
            assert_eq!(ErrorKind::from_status(kind.status()), Some(kind));
        }
        assert_eq!(ErrorKind::from_status(STATUS_OK), None);
    }

    #[test]
    fn timeout_is_distinct_from_generic_failure() {
        assert_ne!(ErrorKind::Timeout.status(), ErrorKind::Internal.status());
        assert_eq!(ErrorKind::Timeout.status_word(), (-8i64) as u64);
    }
}
