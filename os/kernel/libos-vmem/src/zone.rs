use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::error::VmemError;
use crate::fault::FaultHandler;
use crate::page_entry::{PageEntry, PageSource};
use libos_info::memory::PAGE_SIZE;

/// Geometry of a reserved zone.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneInfo {
    pub start: VirtualAddress,
    /// One past the last byte.
    pub end: VirtualAddress,
    /// Length in bytes.
    pub length: u64,
    pub pages: usize,
}

impl ZoneInfo {
    #[must_use]
    pub const fn new(start: VirtualAddress, pages: usize) -> Self {
        Self {
            start,
            end: start.add_pages(pages),
            length: pages as u64 * PAGE_SIZE,
            pages,
        }
    }

    /// Address of page slot `index`.
    ///
    /// # Errors
    /// [`VmemError::PageOutOfRange`] past the last slot.
    pub const fn address_of(&self, index: usize) -> Result<VirtualAddress, VmemError> {
        if index >= self.pages {
            return Err(VmemError::PageOutOfRange {
                index,
                pages: self.pages,
            });
        }
        Ok(self.start.add_pages(index))
    }

    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.start.as_u64() && va.as_u64() < self.end.as_u64()
    }
}

/// Proof that a slot was mapped by [`ZoneContext::insert_at`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MappingHandle {
    pub index: usize,
    pub address: VirtualAddress,
}

/// Reserves zones in one address space.
pub trait AddressSpaceManager {
    type Zone: ZoneContext;

    /// Reserve `pages` slots, at `start` if given.
    ///
    /// # Errors
    /// Zero pages, an overlapping `start`, or host failures.
    fn allocate_zone(
        &self,
        start: Option<VirtualAddress>,
        pages: usize,
    ) -> Result<Self::Zone, VmemError>;
}

/// Private per-zone state of an address-space manager.
///
/// Not internally synchronized; the owning [`MemoryAllocation`](crate::MemoryAllocation)
/// serializes access. Dropping the context releases only the context, never
/// the mapping; call [`free_mapping`](Self::free_mapping) for that.
pub trait ZoneContext {
    fn info(&self) -> ZoneInfo;

    /// Route faults of this zone to `handler` (`None` restores the default).
    ///
    /// # Errors
    /// [`VmemError::NotImplemented`] where the zone takes no faults.
    fn set_fault_handler(&mut self, handler: Option<FaultHandler>) -> Result<(), VmemError>;

    /// Map `entry` into slot `index`. The slot must not hold a live mapping.
    ///
    /// # Errors
    /// Out-of-range index or host failure.
    fn insert_at(&mut self, index: usize, entry: &PageEntry) -> Result<MappingHandle, VmemError>;

    /// Undo an [`insert_at`](Self::insert_at).
    ///
    /// # Errors
    /// Host failure.
    fn remove_at(&mut self, handle: MappingHandle) -> Result<(), VmemError>;

    /// Tear down the reserved range itself. Idempotent.
    fn free_mapping(&mut self);

    /// Physical address backing `source`; the zero address for dummies.
    fn physical_address(&self, source: &PageSource) -> PhysicalAddress;
}
