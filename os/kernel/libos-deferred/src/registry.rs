use crate::error::DeferredError;
use crate::preempt::PreemptSlot;
use crate::private_stack::PrivateStack;
use crate::return_stub::ReturnStub;
use crate::work::WorkHandler;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use libos_alloc::{PageAllocator, PageArray};
use libos_info::deferred::{EngineConfig, RETURN_STUB_PAGES};
use libos_info::memory::PhysicalLocation;
use libos_task::{Pid, TaskRef};
use libos_vmem::{
    CacheType, MemoryAllocation, MemoryInterface, PageAccess, UserZone, VirtualAddress,
};
use log::{debug, warn};

/// The return stub page of one process.
///
/// The user mapping lingers: it stays in the process after this record is
/// gone. The frame is released with the record.
pub(crate) struct StubMapping {
    address: VirtualAddress,
    allocator: Arc<PageAllocator>,
    _user: MemoryAllocation<UserZone>,
    pages: Option<PageArray>,
}

impl StubMapping {
    pub(crate) fn create(
        memory: &MemoryInterface,
        allocator: &Arc<PageAllocator>,
        task: &TaskRef,
        config: &EngineConfig,
        stub: &ReturnStub,
    ) -> Result<Self, DeferredError> {
        let pages =
            allocator.allocate_pages(PhysicalLocation::Normal, RETURN_STUB_PAGES, false, true, true)?;
        match Self::map(memory, &pages, task, config, stub) {
            Ok(user) => Ok(Self {
                address: user.start(),
                allocator: Arc::clone(allocator),
                _user: user,
                pages: Some(pages),
            }),
            Err(e) => {
                if let Err(free) = allocator.free_pages(pages) {
                    warn!("return stub frame not released: {free}");
                }
                Err(e)
            }
        }
    }

    fn map(
        memory: &MemoryInterface,
        pages: &PageArray,
        task: &TaskRef,
        config: &EngineConfig,
        stub: &ReturnStub,
    ) -> Result<MemoryAllocation<UserZone>, DeferredError> {
        // Write the code through a short-lived kernel alias.
        {
            let mut alias =
                MemoryAllocation::new(&memory.kernel_address_space(), None, pages.len())?;
            let rw = memory.create_page_entry(PageAccess::rw(), CacheType::Cache);
            for (index, source) in pages.sources().enumerate() {
                alias.page_insert(index, rw.with_source(source))?;
            }
            memory.kernel_mm().write_bytes(alias.start(), stub.code)?;
        }

        let space = memory
            .user_address_space(task.clone())
            .with_limit(config.user_limit.map(VirtualAddress::new));
        let hint = config.return_stub_hint.map(VirtualAddress::new);
        let mut user = MemoryAllocation::new(&space, hint, pages.len())?;
        let rx = memory.create_page_entry(PageAccess::rx(), CacheType::Cache);
        for (index, source) in pages.sources().enumerate() {
            user.page_insert(index, rx.with_source(source))?;
        }
        user.force_linger();
        debug!("return stub at {} in process {}", user.start(), task.tgid());
        Ok(user)
    }

    pub(crate) const fn address(&self) -> VirtualAddress {
        self.address
    }

    /// Give up the record but keep the frame, for teardown while the
    /// process may still run through the stub.
    pub(crate) fn leak(mut self) {
        if let Some(pages) = self.pages.take() {
            let _ = pages.into_raw();
        }
    }
}

impl Drop for StubMapping {
    fn drop(&mut self) {
        if let Some(pages) = self.pages.take()
            && let Err(e) = self.allocator.free_pages(pages)
        {
            warn!("return stub frame not released: {e}");
        }
    }
}

pub(crate) struct ThreadState {
    pub task: TaskRef,
    pub stack: PrivateStack,
    pub queue: VecDeque<Arc<WorkHandler>>,
    pub preempt: PreemptSlot,
}

impl ThreadState {
    pub(crate) fn new(task: TaskRef, stack: PrivateStack) -> Self {
        Self {
            task,
            stack,
            queue: VecDeque::new(),
            preempt: PreemptSlot::new(),
        }
    }

    /// Everything still queued, with the record torn down.
    pub(crate) fn into_queue(self) -> VecDeque<Arc<WorkHandler>> {
        let Self { queue, .. } = self;
        queue
    }
}

pub(crate) struct ProcessState {
    pub stub: StubMapping,
    pub threads: HashMap<Pid, ThreadState>,
}

impl ProcessState {
    pub(crate) fn new(stub: StubMapping) -> Self {
        Self {
            stub,
            threads: HashMap::new(),
        }
    }

    /// Tear down every thread record, returning their queued work.
    pub(crate) fn drain(&mut self) -> Vec<Arc<WorkHandler>> {
        self.threads
            .drain()
            .flat_map(|(_, thread)| thread.into_queue())
            .collect()
    }
}

/// Process id → process record.
#[derive(Default)]
pub(crate) struct ProcessRegistry {
    pub processes: HashMap<Pid, ProcessState>,
}

impl ProcessRegistry {
    pub(crate) fn thread(&self, tgid: Pid, tid: Pid) -> Option<&ThreadState> {
        self.processes.get(&tgid)?.threads.get(&tid)
    }
}
