use bitfield_struct::bitfield;
use libos_info::memory::PhysicalLocation;

/// Allocation flags passed to the host buddy allocator.
///
/// The layout mirrors the host's `__GFP_*` bits for the zone modifiers and
/// the reclaim/IO bits that make up `GFP_KERNEL`.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct GfpFlags {
    /// `__GFP_DMA`: below 16 MiB.
    pub dma: bool,
    /// `__GFP_HIGHMEM`.
    pub highmem: bool,
    /// `__GFP_DMA32`: below 4 GiB.
    pub dma32: bool,
    /// `__GFP_MOVABLE`.
    pub movable: bool,
    #[bits(2)]
    __: u8,
    /// `__GFP_IO`.
    pub io: bool,
    /// `__GFP_FS`.
    pub fs: bool,
    /// `__GFP_ZERO`.
    pub zero: bool,
    #[bits(1)]
    __: u8,
    /// `__GFP_DIRECT_RECLAIM`.
    pub direct_reclaim: bool,
    /// `__GFP_KSWAPD_RECLAIM`.
    pub kswapd_reclaim: bool,
    #[bits(20)]
    __: u32,
}

impl GfpFlags {
    /// `GFP_KERNEL`.
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new()
            .with_io(true)
            .with_fs(true)
            .with_direct_reclaim(true)
            .with_kswapd_reclaim(true)
    }

    /// Flags for a placement class, optionally zeroing the pages.
    #[must_use]
    pub const fn for_location(location: PhysicalLocation, zero: bool) -> Self {
        let flags = Self::kernel().with_zero(zero);
        match location {
            PhysicalLocation::Dma => flags.with_dma(true),
            PhysicalLocation::Dma32 => flags.with_dma32(true),
            PhysicalLocation::Normal => flags,
        }
    }
}
