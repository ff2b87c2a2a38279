use crate::error::DeferredError;
use alloc::sync::Arc;
use libos_alloc::{PageAllocator, PageArray};
use libos_info::deferred::EngineConfig;
use libos_vmem::{
    CacheType, KernelMm, KernelZone, MemoryAllocation, MemoryInterface, PageAccess, UserZone,
    VirtualAddress, VmemError, ZoneInfo,
};
use libos_task::TaskRef;
use log::{debug, warn};

/// Stack the injected work runs on.
///
/// The same frames are mapped into a kernel zone, through which the engine
/// writes call frames, and into the target's address space.
pub struct PrivateStack {
    kernel_mm: Arc<dyn KernelMm>,
    allocator: Arc<PageAllocator>,
    kernel_info: ZoneInfo,
    user_info: ZoneInfo,
    // Torn down in field order: user mapping, kernel alias, frames.
    user: Option<MemoryAllocation<UserZone>>,
    kernel: Option<MemoryAllocation<KernelZone>>,
    pages: Option<PageArray>,
}

impl PrivateStack {
    /// Allocate and map a stack for `task`.
    ///
    /// # Errors
    /// Whatever layer failed; everything built so far is released.
    pub fn new(
        memory: &MemoryInterface,
        allocator: &Arc<PageAllocator>,
        task: &TaskRef,
        config: &EngineConfig,
    ) -> Result<Self, DeferredError> {
        let pages = allocator.allocate_pages(
            config.stack_location,
            config.stack_pages,
            false,
            true,
            true,
        )?;

        let mut stack = Self {
            kernel_mm: Arc::clone(memory.kernel_mm()),
            allocator: Arc::clone(allocator),
            kernel_info: ZoneInfo::new(VirtualAddress::default(), 0),
            user_info: ZoneInfo::new(VirtualAddress::default(), 0),
            user: None,
            kernel: None,
            pages: Some(pages),
        };

        if let Some(pages) = &stack.pages {
            let kernel = Self::map_kernel(memory, pages)?;
            stack.kernel_info = kernel.info();
            stack.kernel = Some(kernel);

            let user = Self::map_user(memory, pages, task, config)?;
            stack.user_info = user.info();
            stack.user = Some(user);
        }

        debug!(
            "private stack {}..{} for task {}",
            stack.user_info.start,
            stack.user_info.end,
            task.pid()
        );
        Ok(stack)
    }

    fn map_kernel(
        memory: &MemoryInterface,
        pages: &PageArray,
    ) -> Result<MemoryAllocation<KernelZone>, DeferredError> {
        let mut kernel = MemoryAllocation::new(&memory.kernel_address_space(), None, pages.len())?;
        let rw = memory.create_page_entry(PageAccess::rw(), CacheType::Cache);
        for (index, source) in pages.sources().enumerate() {
            kernel.page_insert(index, rw.with_source(source))?;
        }
        Ok(kernel)
    }

    fn map_user(
        memory: &MemoryInterface,
        pages: &PageArray,
        task: &TaskRef,
        config: &EngineConfig,
    ) -> Result<MemoryAllocation<UserZone>, DeferredError> {
        let space = memory
            .user_address_space(task.clone())
            .with_limit(config.user_limit.map(VirtualAddress::new));
        let mut user = match config.user_stack_hint.map(VirtualAddress::new) {
            // Only the first stack of a process can sit at the hint.
            Some(start) => match MemoryAllocation::new(&space, Some(start), pages.len()) {
                Err(VmemError::AlreadyMapped { .. }) => {
                    MemoryAllocation::new(&space, None, pages.len())?
                }
                other => other?,
            },
            None => MemoryAllocation::new(&space, None, pages.len())?,
        };
        let rw = memory.create_page_entry(PageAccess::rw(), CacheType::Cache);
        for (index, source) in pages.sources().enumerate() {
            user.page_insert(index, rw.with_source(source))?;
        }
        Ok(user)
    }

    /// One past the highest usable user address.
    #[must_use]
    pub const fn user_top(&self) -> VirtualAddress {
        self.user_info.end
    }

    /// Lowest usable user address.
    #[must_use]
    pub const fn user_bottom(&self) -> VirtualAddress {
        self.user_info.start
    }

    #[must_use]
    pub const fn kernel_base(&self) -> VirtualAddress {
        self.kernel_info.start
    }

    /// Copy `bytes` to the user address `at` through the kernel alias.
    ///
    /// # Errors
    /// [`VmemError::IllegalArgument`] if the range leaves the stack.
    pub fn write(&self, at: u64, bytes: &[u8]) -> Result<(), DeferredError> {
        let start = self.user_info.start.as_u64();
        let end = self.user_info.end.as_u64();
        let offset = at
            .checked_sub(start)
            .filter(|_| at.saturating_add(bytes.len() as u64) <= end)
            .ok_or(VmemError::IllegalArgument("write outside the private stack"))?;
        self.kernel_mm
            .write_bytes(self.kernel_info.start + offset, bytes)?;
        Ok(())
    }
}

impl Drop for PrivateStack {
    fn drop(&mut self) {
        drop(self.user.take());
        drop(self.kernel.take());
        if let Some(pages) = self.pages.take()
            && let Err(e) = self.allocator.free_pages(pages)
        {
            warn!("private stack frames not released: {e}");
        }
    }
}
