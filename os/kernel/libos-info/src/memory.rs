//! # Memory Geometry

/// Size of one base page.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Largest buddy order the host allocator hands out in one block.
///
/// Matches the host's `MAX_ORDER - 1` (4 MiB blocks with 4 KiB pages).
pub const MAX_ORDER: u32 = 10;

/// Guard value stored in every encoded page-array header.
pub const PAGE_ARRAY_MAGIC: u16 = 0xA55A;

/// Largest page count a single page array can describe (32-bit count field).
pub const MAX_PAGE_ARRAY_COUNT: u64 = u32::MAX as u64;

/// Physical-address ceiling class for page allocations.
///
/// Selects which host allocation zone pages are drawn from.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum PhysicalLocation {
    /// Very low memory reachable by legacy (ISA) DMA.
    Dma,
    /// Memory below 4 GiB.
    Dma32,
    /// No restriction.
    #[default]
    Normal,
}

/// Number of pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(MAX_ORDER < 64);
};
