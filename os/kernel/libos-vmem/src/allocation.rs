use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::error::VmemError;
use crate::fault::FaultHandler;
use crate::page_entry::PageEntry;
use crate::zone::{AddressSpaceManager, MappingHandle, ZoneContext, ZoneInfo};
use hashbrown::HashMap;
use log::{debug, error};

struct TrackedEntry {
    entry: PageEntry,
    handle: MappingHandle,
}

/// A zone together with the page entries currently mapped into it.
///
/// Slots are tracked sparsely; most zones are filled lazily. Dropping the
/// allocation unmaps every tracked slot and the zone itself, unless
/// [`force_linger`](Self::force_linger) was called, in which case only the
/// bookkeeping goes away and the mapping stays live.
pub struct MemoryAllocation<Z: ZoneContext> {
    zone: Z,
    info: ZoneInfo,
    entries: HashMap<usize, TrackedEntry>,
    lingering: bool,
}

impl<Z: ZoneContext> MemoryAllocation<Z> {
    /// Reserve a zone of `pages` slots through `manager`.
    ///
    /// # Errors
    /// Whatever the manager reports for the reservation.
    pub fn new<M>(manager: &M, start: Option<VirtualAddress>, pages: usize) -> Result<Self, VmemError>
    where
        M: AddressSpaceManager<Zone = Z>,
    {
        let zone = manager.allocate_zone(start, pages)?;
        let info = zone.info();
        Ok(Self {
            zone,
            info,
            entries: HashMap::new(),
            lingering: false,
        })
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.info.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.info.end
    }

    #[inline]
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.info.length
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.info.pages
    }

    #[inline]
    #[must_use]
    pub const fn info(&self) -> ZoneInfo {
        self.info
    }

    /// Address of slot `index`.
    ///
    /// # Errors
    /// [`VmemError::PageOutOfRange`].
    pub const fn address_of(&self, index: usize) -> Result<VirtualAddress, VmemError> {
        self.info.address_of(index)
    }

    #[must_use]
    pub const fn zone(&self) -> &Z {
        &self.zone
    }

    /// Map `entry` at `index`, replacing whatever was there.
    ///
    /// The old mapping is removed before the new one is installed; the two
    /// never coexist.
    ///
    /// # Errors
    /// Out-of-range index or a failing zone primitive. A failed removal
    /// keeps the old entry tracked; if the insert fails after the old
    /// mapping was removed, the slot is left untracked.
    pub fn page_insert(&mut self, index: usize, entry: PageEntry) -> Result<(), VmemError> {
        self.info.address_of(index)?;

        if let Some(old) = self.entries.get(&index) {
            self.zone.remove_at(old.handle)?;
            self.entries.remove(&index);
        }

        let handle = self.zone.insert_at(index, &entry)?;
        self.entries.insert(index, TrackedEntry { entry, handle });
        Ok(())
    }

    /// Unmap and forget slot `index`.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] for an empty slot, or a failing zone
    /// primitive, in which case the entry stays tracked.
    pub fn page_remove(&mut self, index: usize) -> Result<(), VmemError> {
        self.info.address_of(index)?;
        let handle = self
            .entries
            .get(&index)
            .map(|t| t.handle)
            .ok_or(VmemError::NotMapped(index))?;
        self.zone.remove_at(handle)?;
        self.entries.remove(&index);
        Ok(())
    }

    /// Entry currently mapped at `index`.
    ///
    /// # Errors
    /// [`VmemError::PageOutOfRange`] or [`VmemError::NotMapped`].
    pub fn page_get_mapping(&self, index: usize) -> Result<&PageEntry, VmemError> {
        self.info.address_of(index)?;
        self.entries
            .get(&index)
            .map(|t| &t.entry)
            .ok_or(VmemError::NotMapped(index))
    }

    /// Physical address behind slot `index`; zero for a dummy.
    ///
    /// # Errors
    /// [`VmemError::PageOutOfRange`] or [`VmemError::NotMapped`].
    pub fn page_phys_addr(&self, index: usize) -> Result<PhysicalAddress, VmemError> {
        let entry = self.page_get_mapping(index)?;
        Ok(self.zone.physical_address(&entry.source))
    }

    #[must_use]
    pub fn page_is_present(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    /// Number of tracked slots.
    #[must_use]
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Route faults in this zone to `handler`.
    ///
    /// # Errors
    /// The zone does not take faults.
    pub fn set_fault_handler(&mut self, handler: Option<FaultHandler>) -> Result<(), VmemError> {
        self.zone.set_fault_handler(handler)
    }

    /// Leave the mapping live when this allocation is dropped.
    pub const fn force_linger(&mut self) {
        self.lingering = true;
    }

    #[must_use]
    pub const fn is_lingering(&self) -> bool {
        self.lingering
    }
}

impl<Z: ZoneContext> Drop for MemoryAllocation<Z> {
    fn drop(&mut self) {
        if self.lingering {
            debug!(
                "allocation at {} lingers with {} mapped pages",
                self.info.start,
                self.entries.len()
            );
            self.entries.clear();
            return;
        }

        for (index, tracked) in self.entries.drain() {
            if let Err(e) = self.zone.remove_at(tracked.handle) {
                error!("failed to unmap page {index} at {}: {e}", self.info.start);
            }
        }
        self.zone.free_mapping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::{Pfn, PhysicalAddress};
    use crate::fake::FakeKernel;
    use crate::kernel_space::KernelAddressSpace;
    use crate::page_entry::{CacheType, PageAccess, PageEntryMeta, PageSource};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Insert(usize),
        Remove(usize),
        FreeMapping,
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    struct CountingManager(Log);

    struct CountingZone {
        log: Log,
        info: ZoneInfo,
        live: Vec<bool>,
        fail_next_remove: Cell<bool>,
    }

    impl AddressSpaceManager for CountingManager {
        type Zone = CountingZone;

        fn allocate_zone(
            &self,
            start: Option<VirtualAddress>,
            pages: usize,
        ) -> Result<CountingZone, VmemError> {
            let start = start.unwrap_or(VirtualAddress::new(0x10_0000));
            Ok(CountingZone {
                log: Rc::clone(&self.0),
                info: ZoneInfo::new(start, pages),
                live: vec![false; pages],
                fail_next_remove: Cell::new(false),
            })
        }
    }

    impl ZoneContext for CountingZone {
        fn info(&self) -> ZoneInfo {
            self.info
        }

        fn set_fault_handler(&mut self, _: Option<FaultHandler>) -> Result<(), VmemError> {
            Ok(())
        }

        fn insert_at(&mut self, index: usize, _: &PageEntry) -> Result<MappingHandle, VmemError> {
            assert!(!self.live[index], "two mappings at slot {index}");
            self.live[index] = true;
            self.log.borrow_mut().push(Call::Insert(index));
            Ok(MappingHandle {
                index,
                address: self.info.address_of(index)?,
            })
        }

        fn remove_at(&mut self, handle: MappingHandle) -> Result<(), VmemError> {
            if self.fail_next_remove.replace(false) {
                return Err(VmemError::Host("mprotect failed"));
            }
            assert!(self.live[handle.index]);
            self.live[handle.index] = false;
            self.log.borrow_mut().push(Call::Remove(handle.index));
            Ok(())
        }

        fn free_mapping(&mut self) {
            self.log.borrow_mut().push(Call::FreeMapping);
        }

        fn physical_address(&self, source: &PageSource) -> PhysicalAddress {
            match *source {
                PageSource::Pfn(pfn) => pfn.address(),
                PageSource::Address(pa) => pa,
                PageSource::Page(_) | PageSource::Dummy => PhysicalAddress::zero(),
            }
        }
    }

    fn rw(source: PageSource) -> PageEntry {
        PageEntry::new(source, PageEntryMeta::new(PageAccess::rw(), CacheType::Cache))
    }

    #[test]
    fn replacing_an_entry_removes_the_old_mapping_first() {
        let log = Log::default();
        let mut alloc = MemoryAllocation::new(&CountingManager(Rc::clone(&log)), None, 4).unwrap();

        alloc.page_insert(1, rw(PageSource::Pfn(Pfn::new(10)))).unwrap();
        alloc.page_insert(1, rw(PageSource::Pfn(Pfn::new(11)))).unwrap();

        assert_eq!(
            *log.borrow(),
            [Call::Insert(1), Call::Remove(1), Call::Insert(1)]
        );
        assert_eq!(alloc.mapped_pages(), 1);
        assert_eq!(alloc.page_phys_addr(1).unwrap(), Pfn::new(11).address());
    }

    #[test]
    fn failed_removal_keeps_the_old_entry_tracked() {
        let log = Log::default();
        let mut alloc = MemoryAllocation::new(&CountingManager(Rc::clone(&log)), None, 2).unwrap();
        alloc.page_insert(0, rw(PageSource::Pfn(Pfn::new(10)))).unwrap();

        alloc.zone().fail_next_remove.set(true);
        assert_eq!(
            alloc.page_insert(0, rw(PageSource::Pfn(Pfn::new(11)))),
            Err(VmemError::Host("mprotect failed"))
        );
        assert!(alloc.page_is_present(0));
        assert_eq!(alloc.page_phys_addr(0).unwrap(), Pfn::new(10).address());

        alloc.zone().fail_next_remove.set(true);
        assert!(alloc.page_remove(0).is_err());
        assert!(alloc.page_is_present(0));

        // The retry replaces the one live mapping; the zone asserts there
        // are never two.
        alloc.page_insert(0, rw(PageSource::Pfn(Pfn::new(11)))).unwrap();
        assert_eq!(alloc.page_phys_addr(0).unwrap(), Pfn::new(11).address());
        assert_eq!(
            *log.borrow(),
            [Call::Insert(0), Call::Remove(0), Call::Insert(0)]
        );
    }

    #[test]
    fn presence_follows_inserts_and_teardown() {
        let log = Log::default();
        let mut alloc = MemoryAllocation::new(&CountingManager(Rc::clone(&log)), None, 3).unwrap();

        assert!((0..3).all(|i| !alloc.page_is_present(i)));
        alloc.page_insert(0, rw(PageSource::Pfn(Pfn::new(1)))).unwrap();
        alloc.page_insert(2, PageEntry::dummy()).unwrap();
        assert!(alloc.page_is_present(0));
        assert!(!alloc.page_is_present(1));
        assert!(alloc.page_is_present(2));

        drop(alloc);
        let calls = log.borrow();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Remove(_))).count(), 2);
        assert_eq!(calls.last(), Some(&Call::FreeMapping));
    }

    #[test]
    fn lingering_allocation_keeps_its_mapping() {
        let log = Log::default();
        let mut alloc = MemoryAllocation::new(&CountingManager(Rc::clone(&log)), None, 2).unwrap();
        alloc.page_insert(0, rw(PageSource::Pfn(Pfn::new(5)))).unwrap();
        alloc.force_linger();
        assert!(alloc.is_lingering());
        drop(alloc);

        assert_eq!(*log.borrow(), [Call::Insert(0)]);
    }

    #[test]
    fn index_errors_are_distinct() {
        let log = Log::default();
        let mut alloc = MemoryAllocation::new(&CountingManager(log), None, 2).unwrap();

        assert_eq!(
            alloc.page_phys_addr(2),
            Err(VmemError::PageOutOfRange { index: 2, pages: 2 })
        );
        assert_eq!(alloc.page_phys_addr(1), Err(VmemError::NotMapped(1)));
        assert_eq!(alloc.page_remove(1), Err(VmemError::NotMapped(1)));
        assert!(alloc.page_insert(7, PageEntry::dummy()).is_err());

        alloc.page_insert(1, PageEntry::dummy()).unwrap();
        assert_eq!(alloc.page_phys_addr(1), Ok(PhysicalAddress::zero()));
        alloc.page_remove(1).unwrap();
        assert!(!alloc.page_is_present(1));
    }

    #[test]
    fn kernel_zone_dummy_then_real_page() {
        let host = Arc::new(FakeKernel::new());
        let space = KernelAddressSpace::new(host.clone());
        let mut alloc = MemoryAllocation::new(&space, None, 4).unwrap();

        alloc.page_insert(2, PageEntry::dummy()).unwrap();
        assert_eq!(alloc.page_phys_addr(2), Ok(PhysicalAddress::zero()));
        let va = alloc.address_of(2).unwrap();
        let (pa, prot) = host.kernel_pte(va).unwrap();
        assert_eq!(pa, host.sentinel());
        assert!(!prot.present());

        let pfn = host.alloc_frames(0).unwrap();
        alloc.page_insert(2, rw(PageSource::Pfn(pfn))).unwrap();
        assert_eq!(alloc.page_phys_addr(2), Ok(pfn.address()));
        assert_eq!(host.kernel_pte(va).map(|(pa, _)| pa), Some(pfn.address()));

        let page = FakeKernel::page_handle(pfn);
        alloc.page_insert(3, rw(PageSource::Page(page))).unwrap();
        assert_eq!(alloc.page_phys_addr(3), Ok(pfn.address()));

        drop(alloc);
        assert!(host.kernel_pte(va).is_none());
        assert_eq!(host.kernel_area_count(), 0);
        let counters = host.counters();
        assert_eq!(counters.kernel_unmaps, 3);
        assert_eq!(counters.area_releases, 1);
    }

    #[test]
    fn kernel_zone_rejects_fault_handlers() {
        let host = Arc::new(FakeKernel::new());
        let mut alloc = MemoryAllocation::new(&KernelAddressSpace::new(host), None, 1).unwrap();
        assert!(matches!(
            alloc.set_fault_handler(None),
            Err(VmemError::NotImplemented(_))
        ));
    }

    #[test]
    fn kernel_zone_at_taken_address_fails() {
        let host = Arc::new(FakeKernel::new());
        let space = KernelAddressSpace::new(host);
        let first = MemoryAllocation::new(&space, None, 2).unwrap();
        let again = MemoryAllocation::new(&space, Some(first.start()), 1);
        assert!(matches!(again, Err(VmemError::AlreadyMapped { .. })));
        assert!(matches!(
            MemoryAllocation::new(&space, None, 0),
            Err(VmemError::IllegalArgument(_))
        ));
    }
}
