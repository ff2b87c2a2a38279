use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::backend::{KernelMm, UserMm};
use crate::error::VmemError;
use crate::fault::{FaultHandler, FaultSlot};
use crate::kernel_space::resolve;
use crate::page_entry::{PageEntry, PageSource};
use crate::zone::{AddressSpaceManager, MappingHandle, ZoneContext, ZoneInfo};
use alloc::sync::Arc;
use libos_task::TaskRef;
use log::{debug, warn};

/// Zones inside one task's user address space.
#[derive(Clone)]
pub struct UserAddressSpace {
    kernel: Arc<dyn KernelMm>,
    user: Arc<dyn UserMm>,
    task: TaskRef,
    limit: Option<VirtualAddress>,
}

impl UserAddressSpace {
    #[must_use]
    pub const fn new(kernel: Arc<dyn KernelMm>, user: Arc<dyn UserMm>, task: TaskRef) -> Self {
        Self {
            kernel,
            user,
            task,
            limit: None,
        }
    }

    /// Keep every zone of this space below `limit`.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<VirtualAddress>) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn task(&self) -> &TaskRef {
        &self.task
    }
}

impl AddressSpaceManager for UserAddressSpace {
    type Zone = UserZone;

    fn allocate_zone(
        &self,
        start: Option<VirtualAddress>,
        pages: usize,
    ) -> Result<UserZone, VmemError> {
        if pages == 0 {
            return Err(VmemError::IllegalArgument("zone of zero pages"));
        }

        let task = self.task.ptr();
        let start = match start {
            Some(start) => {
                if !start.is_page_aligned() {
                    return Err(VmemError::IllegalArgument("unaligned zone start"));
                }
                if self.limit.is_some_and(|limit| start.add_pages(pages) > limit) {
                    return Err(VmemError::IllegalArgument("zone ends above the address limit"));
                }
                if self.user.find_intersection(task, start, start.add_pages(pages)) {
                    return Err(VmemError::AlreadyMapped { start });
                }
                start
            }
            None => self.user.get_unmapped_area(task, pages, self.limit)?,
        };

        let slot = Arc::new(FaultSlot::new(start));
        self.user
            .install_special_mapping(task, start, pages, Arc::clone(&slot))?;

        let info = ZoneInfo::new(start, pages);
        debug!(
            "user zone {}..{} in task {} ({pages} pages)",
            info.start,
            info.end,
            self.task.pid()
        );

        Ok(UserZone {
            kernel: Arc::clone(&self.kernel),
            user: Arc::clone(&self.user),
            task: self.task.clone(),
            info,
            slot,
            mapped: true,
        })
    }
}

/// A special mapping in a task's address space.
pub struct UserZone {
    kernel: Arc<dyn KernelMm>,
    user: Arc<dyn UserMm>,
    task: TaskRef,
    info: ZoneInfo,
    slot: Arc<FaultSlot>,
    mapped: bool,
}

impl UserZone {
    #[must_use]
    pub const fn task(&self) -> &TaskRef {
        &self.task
    }

    #[must_use]
    pub fn fault_slot(&self) -> &Arc<FaultSlot> {
        &self.slot
    }
}

impl ZoneContext for UserZone {
    fn info(&self) -> ZoneInfo {
        self.info
    }

    fn set_fault_handler(&mut self, handler: Option<FaultHandler>) -> Result<(), VmemError> {
        self.slot.set_handler(handler);
        Ok(())
    }

    fn insert_at(&mut self, index: usize, entry: &PageEntry) -> Result<MappingHandle, VmemError> {
        let address = self.info.address_of(index)?;
        let task = self.task.ptr();

        // The VMA must allow the final protection before a PTE carrying it
        // may be installed.
        self.user
            .mprotect_fixup(task, address, entry.effective_access())?;
        self.user.zap_page(task, address);

        let prot = entry.protection(true);
        match entry.source {
            PageSource::Address(pa) => self.user.remap_pfn(task, address, pa.pfn(), prot)?,
            PageSource::Pfn(pfn) => self.user.remap_pfn(task, address, pfn, prot)?,
            PageSource::Page(page) => self.user.insert_page(task, address, page, prot)?,
            PageSource::Dummy => {
                let sentinel = self.kernel.sentinel_page().pfn();
                self.user.remap_pfn(task, address, sentinel, prot)?;
            }
        }

        Ok(MappingHandle { index, address })
    }

    fn remove_at(&mut self, handle: MappingHandle) -> Result<(), VmemError> {
        self.insert_at(handle.index, &PageEntry::dummy()).map(|_| ())
    }

    fn free_mapping(&mut self) {
        if !core::mem::take(&mut self.mapped) {
            return;
        }
        if let Err(e) = self
            .user
            .unmap_range(self.task.ptr(), self.info.start, self.info.pages)
        {
            warn!("failed to unmap user zone at {}: {e}", self.info.start);
        }
    }

    fn physical_address(&self, source: &PageSource) -> PhysicalAddress {
        resolve(&*self.kernel, source)
    }
}

impl Drop for UserZone {
    fn drop(&mut self) {
        // A lingering mapping outlives us; its faults fall back to SIGBUS.
        self.slot.clear();
        debug!("user zone context at {} released", self.info.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::MemoryAllocation;
    use crate::fake::FakeKernel;
    use crate::fault::{FaultInfo, FaultStatus};
    use crate::interface::MemoryInterface;
    use crate::page_entry::{CacheType, PageAccess};
    use libos_task::TaskOps;

    fn setup() -> (Arc<FakeKernel>, MemoryInterface, TaskRef) {
        let host = Arc::new(FakeKernel::new());
        host.spawn_task(300, 300);
        let ops: Arc<dyn TaskOps> = host.clone();
        let task = TaskRef::find(&ops, 300).unwrap();
        let memory = MemoryInterface::new(host.clone(), host.clone());
        (host, memory, task)
    }

    #[test]
    fn insert_fixes_protection_before_installing() {
        let (host, memory, task) = setup();
        let space = memory.user_address_space(task);
        let mut alloc = MemoryAllocation::new(&space, None, 2).unwrap();

        let pfn = host.alloc_frames(0).unwrap();
        let entry = memory
            .create_page_entry(PageAccess::rx(), CacheType::Cache)
            .with_source(PageSource::Pfn(pfn));
        alloc.page_insert(0, entry).unwrap();

        let va = alloc.start();
        assert_eq!(host.vma_access(300, va), Some(PageAccess::rx()));
        let (pa, prot) = host.user_pte(300, va).unwrap();
        assert_eq!(pa, pfn.address());
        assert!(prot.present() && prot.user_access() && !prot.writable());

        let counters = host.counters();
        assert_eq!(counters.mprotects, 1);
        assert_eq!(counters.zaps, 1);
        assert_eq!(counters.user_inserts, 1);
    }

    #[test]
    fn remove_swaps_in_the_sentinel() {
        let (host, memory, task) = setup();
        let space = memory.user_address_space(task);
        let mut alloc = MemoryAllocation::new(&space, None, 1).unwrap();
        let pfn = host.alloc_frames(0).unwrap();
        let entry = memory
            .create_page_entry(PageAccess::rw(), CacheType::Cache)
            .with_source(PageSource::Address(pfn.address()));
        alloc.page_insert(0, entry).unwrap();
        alloc.page_remove(0).unwrap();

        let va = alloc.start();
        let (pa, prot) = host.user_pte(300, va).unwrap();
        assert_eq!(pa, host.sentinel());
        assert!(!prot.present() && prot.prot_none());
        assert_eq!(host.vma_access(300, va), Some(PageAccess::none()));
        assert!(host.has_vma(300, va));
    }

    #[test]
    fn explicit_start_must_be_free() {
        let (_host, memory, task) = setup();
        let space = memory.user_address_space(task);
        let first = MemoryAllocation::new(&space, None, 4).unwrap();

        let overlapping = MemoryAllocation::new(&space, Some(first.start().add_pages(3)), 2);
        assert!(matches!(overlapping, Err(VmemError::AlreadyMapped { .. })));

        let free = first.end().add_pages(8);
        let placed = MemoryAllocation::new(&space, Some(free), 2).unwrap();
        assert_eq!(placed.start(), free);
        assert_eq!(placed.length(), 2 * 4096);
    }

    #[test]
    fn limited_spaces_stay_below_their_limit() {
        let (_host, memory, task) = setup();
        let limit = VirtualAddress::new(1 << 32);
        let space = memory.user_address_space(task).with_limit(Some(limit));

        let low = MemoryAllocation::new(&space, None, 4).unwrap();
        assert!(low.end() <= limit);

        let straddling = MemoryAllocation::new(&space, Some(VirtualAddress::new((1 << 32) - 4096)), 2);
        assert!(matches!(straddling, Err(VmemError::IllegalArgument(_))));

        let huge = MemoryAllocation::new(&space, None, 1 << 21);
        assert!(matches!(huge, Err(VmemError::OutOfMemory)));
    }

    #[test]
    fn teardown_unmaps_unless_lingering() {
        let (host, memory, task) = setup();
        let space = memory.user_address_space(task);

        let mut gone = MemoryAllocation::new(&space, None, 1).unwrap();
        gone.page_insert(0, PageEntry::dummy()).unwrap();
        let gone_va = gone.start();
        drop(gone);
        assert!(!host.has_vma(300, gone_va));
        assert!(host.user_pte(300, gone_va).is_none());

        let mut kept = MemoryAllocation::new(&space, None, 1).unwrap();
        let pfn = host.alloc_frames(0).unwrap();
        kept.page_insert(
            0,
            memory
                .create_page_entry(PageAccess::ro(), CacheType::Cache)
                .with_source(PageSource::Pfn(pfn)),
        )
        .unwrap();
        kept.force_linger();
        let kept_va = kept.start();
        drop(kept);
        assert!(host.has_vma(300, kept_va));
        assert_eq!(host.user_pte(300, kept_va).map(|(pa, _)| pa), Some(pfn.address()));
    }

    #[test]
    fn faults_reach_the_handler_until_the_context_is_released() {
        let (host, memory, task) = setup();
        let space = memory.user_address_space(task);
        let mut alloc = MemoryAllocation::new(&space, None, 4).unwrap();
        alloc
            .set_fault_handler(Some(Box::new(|info: &FaultInfo| {
                if info.index == 1 {
                    FaultStatus::NoPage
                } else {
                    FaultStatus::SigSegv
                }
            })))
            .unwrap();

        let va = alloc.start().add_pages(1);
        assert_eq!(host.fault(300, va, false), Some(FaultStatus::NoPage));
        assert_eq!(host.fault(300, alloc.start(), false), Some(FaultStatus::SigSegv));

        alloc.force_linger();
        drop(alloc);
        assert_eq!(host.fault(300, va, false), Some(FaultStatus::SigBus));
    }

    #[test]
    fn zones_hold_a_task_reference() {
        let (host, memory, task) = setup();
        let ptr = task.ptr();
        let space = memory.user_address_space(task);
        let alloc = MemoryAllocation::new(&space, None, 1).unwrap();
        assert_eq!(host.task_refs(ptr), 2);
        drop(alloc);
        drop(space);
        assert_eq!(host.task_refs(ptr), 0);
    }
}
