use crate::error::DeferredError;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use libos_vmem::VirtualAddress;

/// Width of one pushed stack slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WordSize {
    Dword,
    Qword,
}

impl WordSize {
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Dword => 4,
            Self::Qword => 8,
        }
    }

    /// Whether code with this word size can address `address`.
    #[inline]
    #[must_use]
    pub const fn reaches(self, address: u64) -> bool {
        match self {
            Self::Dword => address <= u32::MAX as u64,
            Self::Qword => true,
        }
    }
}

/// Where a calling convention lays out its stack arguments.
pub trait StackPusher {
    /// Current stack pointer.
    fn sp(&self) -> u64;

    /// Push the low `width` bytes of `value`, little endian.
    ///
    /// # Errors
    /// [`DeferredError::StackExhausted`] below the stack limit.
    fn push(&mut self, value: u64, width: WordSize) -> Result<(), DeferredError>;

    /// Reserve `bytes` zeroed bytes.
    ///
    /// # Errors
    /// [`DeferredError::StackExhausted`] below the stack limit.
    fn skip(&mut self, bytes: usize) -> Result<(), DeferredError>;
}

/// Builds the top of a user stack in kernel memory.
///
/// Pushes grow the image downward from `top`; the finished image is copied
/// into the stack pages in one write, starting at [`sp`](Self::sp).
pub struct StackBuilder {
    top: u64,
    limit: u64,
    image: VecDeque<u8>,
}

impl StackBuilder {
    /// Empty stack between `limit` (lowest usable byte) and `top`.
    #[must_use]
    pub const fn new(top: VirtualAddress, limit: VirtualAddress) -> Self {
        Self {
            top: top.as_u64(),
            limit: limit.as_u64(),
            image: VecDeque::new(),
        }
    }

    /// Pad with zeros until `sp` is a multiple of `align`.
    ///
    /// # Errors
    /// [`DeferredError::StackExhausted`] below the limit.
    pub fn align_down(&mut self, align: u64) -> Result<(), DeferredError> {
        #[allow(clippy::cast_possible_truncation)]
        let pad = (self.sp() % align) as usize;
        self.skip(pad)
    }

    fn reserve(&self, bytes: usize) -> Result<(), DeferredError> {
        match self.sp().checked_sub(bytes as u64) {
            Some(sp) if sp >= self.limit => Ok(()),
            _ => Err(DeferredError::StackExhausted),
        }
    }

    /// Bytes from `sp` up to `top`.
    #[must_use]
    pub fn image(&self) -> Vec<u8> {
        self.image.iter().copied().collect()
    }

    /// Read back the slot at `address`; for inspection.
    #[must_use]
    pub fn read(&self, address: u64, width: WordSize) -> Option<u64> {
        let offset = usize::try_from(address.checked_sub(self.sp())?).ok()?;
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().take(width.bytes()).enumerate() {
            *b = *self.image.get(offset + i)?;
        }
        Some(u64::from_le_bytes(bytes))
    }
}

impl StackPusher for StackBuilder {
    #[inline]
    fn sp(&self) -> u64 {
        self.top - self.image.len() as u64
    }

    fn push(&mut self, value: u64, width: WordSize) -> Result<(), DeferredError> {
        let n = width.bytes();
        self.reserve(n)?;
        for &b in value.to_le_bytes()[..n].iter().rev() {
            self.image.push_front(b);
        }
        Ok(())
    }

    fn skip(&mut self, bytes: usize) -> Result<(), DeferredError> {
        self.reserve(bytes)?;
        for _ in 0..bytes {
            self.image.push_front(0);
        }
        Ok(())
    }
}
