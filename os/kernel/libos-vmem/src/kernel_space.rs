use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::backend::KernelMm;
use crate::error::VmemError;
use crate::fault::FaultHandler;
use crate::page_entry::{PageEntry, PageSource};
use crate::zone::{AddressSpaceManager, MappingHandle, ZoneContext, ZoneInfo};
use alloc::sync::Arc;
use log::debug;

/// Zones in the kernel's own address space.
#[derive(Clone)]
pub struct KernelAddressSpace {
    mm: Arc<dyn KernelMm>,
}

impl KernelAddressSpace {
    #[must_use]
    pub const fn new(mm: Arc<dyn KernelMm>) -> Self {
        Self { mm }
    }
}

impl AddressSpaceManager for KernelAddressSpace {
    type Zone = KernelZone;

    fn allocate_zone(
        &self,
        start: Option<VirtualAddress>,
        pages: usize,
    ) -> Result<KernelZone, VmemError> {
        if pages == 0 {
            return Err(VmemError::IllegalArgument("zone of zero pages"));
        }
        if let Some(start) = start
            && !start.is_page_aligned()
        {
            return Err(VmemError::IllegalArgument("unaligned zone start"));
        }

        let start = self.mm.reserve_area(start, pages)?;
        let info = ZoneInfo::new(start, pages);
        debug!("kernel zone {}..{} ({pages} pages)", info.start, info.end);

        Ok(KernelZone {
            mm: Arc::clone(&self.mm),
            info,
            reserved: true,
        })
    }
}

/// A reserved kernel VA range.
pub struct KernelZone {
    mm: Arc<dyn KernelMm>,
    info: ZoneInfo,
    reserved: bool,
}

impl ZoneContext for KernelZone {
    fn info(&self) -> ZoneInfo {
        self.info
    }

    fn set_fault_handler(&mut self, _handler: Option<FaultHandler>) -> Result<(), VmemError> {
        Err(VmemError::NotImplemented("fault handlers on kernel zones"))
    }

    fn insert_at(&mut self, index: usize, entry: &PageEntry) -> Result<MappingHandle, VmemError> {
        let address = self.info.address_of(index)?;

        // Dummies still get a PTE so stray kernel accesses fault on the
        // sentinel instead of hitting an unrelated hole.
        let pa = match entry.source {
            PageSource::Dummy => self.mm.sentinel_page(),
            source => self.physical_address(&source),
        };
        self.mm.map_page(address, pa, entry.protection(false))?;

        Ok(MappingHandle { index, address })
    }

    fn remove_at(&mut self, handle: MappingHandle) -> Result<(), VmemError> {
        self.mm.unmap_page_no_flush(handle.address);
        Ok(())
    }

    fn free_mapping(&mut self) {
        if core::mem::take(&mut self.reserved) {
            self.mm.release_area(self.info.start);
        }
    }

    fn physical_address(&self, source: &PageSource) -> PhysicalAddress {
        resolve(&*self.mm, source)
    }
}

impl Drop for KernelZone {
    fn drop(&mut self) {
        debug!("kernel zone context at {} released", self.info.start);
    }
}

pub(crate) fn resolve(mm: &dyn KernelMm, source: &PageSource) -> PhysicalAddress {
    match *source {
        PageSource::Address(pa) => pa,
        PageSource::Pfn(pfn) => pfn.address(),
        PageSource::Page(page) => mm.page_to_phys(page),
        PageSource::Dummy => PhysicalAddress::zero(),
    }
}
