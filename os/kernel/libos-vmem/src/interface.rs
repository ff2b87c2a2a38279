use crate::backend::{KernelMm, UserMm};
use crate::kernel_space::KernelAddressSpace;
use crate::page_entry::{CacheType, PageAccess, PageEntry, PageEntryMeta, PageSource};
use crate::user_space::UserAddressSpace;
use alloc::sync::Arc;
use libos_task::TaskRef;

/// Entry point to the memory layer.
#[derive(Clone)]
pub struct MemoryInterface {
    kernel: Arc<dyn KernelMm>,
    user: Arc<dyn UserMm>,
}

impl MemoryInterface {
    #[must_use]
    pub const fn new(kernel: Arc<dyn KernelMm>, user: Arc<dyn UserMm>) -> Self {
        Self { kernel, user }
    }

    #[must_use]
    pub fn kernel_address_space(&self) -> KernelAddressSpace {
        KernelAddressSpace::new(Arc::clone(&self.kernel))
    }

    #[must_use]
    pub fn user_address_space(&self, task: TaskRef) -> UserAddressSpace {
        UserAddressSpace::new(Arc::clone(&self.kernel), Arc::clone(&self.user), task)
    }

    /// A dummy entry carrying `access` and `cache`; give it a frame with
    /// [`PageEntry::with_source`].
    #[must_use]
    pub const fn create_page_entry(&self, access: PageAccess, cache: CacheType) -> PageEntry {
        PageEntry::new(PageSource::Dummy, PageEntryMeta::new(access, cache))
    }

    /// Kernel primitives, for writing through kernel aliases.
    #[must_use]
    pub fn kernel_mm(&self) -> &Arc<dyn KernelMm> {
        &self.kernel
    }
}
