//! The in-memory host kernel as a buddy allocator.

use crate::allocator::BuddyAllocator;
use crate::gfp::GfpFlags;
use libos_vmem::fake::FakeKernel;
use libos_vmem::{PageHandle, Pfn};

impl BuddyAllocator for FakeKernel {
    fn alloc_pages(&self, _gfp: GfpFlags, order: u32) -> Option<PageHandle> {
        self.alloc_frames(order).map(Self::page_handle)
    }

    fn free_pages(&self, page: PageHandle, order: u32) {
        self.free_frames(Self::handle_pfn(page), order);
    }

    fn page_to_pfn(&self, page: PageHandle) -> Pfn {
        Self::handle_pfn(page)
    }

    fn pfn_to_page(&self, pfn: Pfn) -> PageHandle {
        Self::page_handle(pfn)
    }
}
