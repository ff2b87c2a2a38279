//! In-memory host kernel.
//!
//! Models exactly what the core needs from the host: page frames backed by
//! byte buffers, kernel VM areas and their PTEs, per-process VMAs and user
//! PTEs, and a task table with reference counts. Every primitive bumps a
//! counter in [`Counters`] so tests can check call sequences.

#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use crate::addresses::{PageHandle, Pfn, PhysicalAddress, VirtualAddress};
use crate::backend::{KernelMm, UserMm};
use crate::error::VmemError;
use crate::fault::{FaultSlot, FaultStatus};
use crate::page_entry::PageAccess;
use crate::protection::PageProtection;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use libos_info::memory::PAGE_SIZE;
use libos_sync::SpinLock;
use libos_task::{ExitHook, Pid, TaskOps, TaskPtr};

const FIRST_PFN: u64 = 0x1000;
const VMEMMAP_BASE: usize = 0xffff_ea00_0000_0000;
const STRUCT_PAGE_SIZE: usize = 64;
const KERNEL_AREA_BASE: u64 = 0xffff_c900_0000_0000;
const USER_AREA_BASE: u64 = 0x0000_7f00_0000_0000;
const LOW_USER_AREA_BASE: u64 = 0x4000_0000;
const FIRST_TASK: usize = 0xffff_8880_0000_0000;

/// Primitive call counts.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Counters {
    pub area_reserves: usize,
    pub area_releases: usize,
    pub kernel_maps: usize,
    pub kernel_unmaps: usize,
    pub special_mappings: usize,
    pub user_unmaps: usize,
    pub mprotects: usize,
    pub zaps: usize,
    pub user_inserts: usize,
    pub frame_allocs: usize,
    pub frame_frees: usize,
    pub bad_frees: usize,
}

#[derive(Debug, Copy, Clone)]
struct Pte {
    pfn: Pfn,
    prot: PageProtection,
}

struct Vma {
    start: u64,
    end: u64,
    slot: Arc<FaultSlot>,
}

struct FakeTask {
    pid: Pid,
    tgid: Pid,
    refs: i64,
    alive: bool,
    running: bool,
    wakeups: usize,
}

struct State {
    frames: BTreeMap<u64, Vec<u8>>,
    next_pfn: u64,
    sentinel: Pfn,
    alloc_budget: Option<usize>,

    kernel_areas: BTreeMap<u64, usize>,
    next_kernel_va: u64,
    kernel_ptes: BTreeMap<u64, Pte>,

    tasks: BTreeMap<usize, FakeTask>,
    next_task: usize,
    current: TaskPtr,

    vmas: BTreeMap<Pid, Vec<Vma>>,
    next_user_va: BTreeMap<Pid, u64>,
    next_low_va: BTreeMap<Pid, u64>,
    user_ptes: BTreeMap<(Pid, u64), Pte>,
    vma_access: BTreeMap<(Pid, u64), PageAccess>,

    counters: Counters,
}

impl State {
    fn tgid_of(&self, task: TaskPtr) -> Option<Pid> {
        self.tasks.get(&task.as_usize()).map(|t| t.tgid)
    }

    fn in_vma(&self, tgid: Pid, va: u64) -> bool {
        self.vmas
            .get(&tgid)
            .is_some_and(|vmas| vmas.iter().any(|v| va >= v.start && va < v.end))
    }

    fn in_kernel_area(&self, va: u64) -> bool {
        self.kernel_areas
            .range(..=va)
            .next_back()
            .is_some_and(|(&start, &pages)| va < start + pages as u64 * PAGE_SIZE)
    }

    fn take_frame(&mut self, pages: u64) -> Option<Pfn> {
        if let Some(budget) = self.alloc_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        let first = self.next_pfn;
        self.next_pfn += pages;
        for pfn in first..first + pages {
            self.frames.insert(pfn, vec![0; PAGE_SIZE as usize]);
        }
        Some(Pfn::new(first))
    }

    fn read_through(&self, ptes: impl Fn(u64) -> Option<Pte>, va: u64, len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = va;
        let end = va + len as u64;
        while cursor < end {
            let page = cursor & !(PAGE_SIZE - 1);
            let pte = ptes(page)?;
            if !pte.prot.present() {
                return None;
            }
            let frame = self.frames.get(&pte.pfn.as_u64())?;
            let from = (cursor - page) as usize;
            let to = (end.min(page + PAGE_SIZE) - page) as usize;
            out.extend_from_slice(&frame[from..to]);
            cursor = page + to as u64;
        }
        Some(out)
    }
}

/// The fake host.
pub struct FakeKernel {
    state: SpinLock<State>,
    exit_hooks: SpinLock<Vec<ExitHook>>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    #[must_use]
    pub fn new() -> Self {
        let mut frames = BTreeMap::new();
        frames.insert(FIRST_PFN, vec![0; PAGE_SIZE as usize]);
        Self {
            state: SpinLock::new(State {
                frames,
                next_pfn: FIRST_PFN + 1,
                sentinel: Pfn::new(FIRST_PFN),
                alloc_budget: None,
                kernel_areas: BTreeMap::new(),
                next_kernel_va: KERNEL_AREA_BASE,
                kernel_ptes: BTreeMap::new(),
                tasks: BTreeMap::new(),
                next_task: FIRST_TASK,
                current: TaskPtr::new(0),
                vmas: BTreeMap::new(),
                next_user_va: BTreeMap::new(),
                next_low_va: BTreeMap::new(),
                user_ptes: BTreeMap::new(),
                vma_access: BTreeMap::new(),
                counters: Counters::default(),
            }),
            exit_hooks: SpinLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.state.lock().counters
    }

    // ---- frames ----

    /// Allocate `1 << order` zeroed, physically contiguous frames.
    pub fn alloc_frames(&self, order: u32) -> Option<Pfn> {
        let mut state = self.state.lock();
        let pfn = state.take_frame(1 << order)?;
        state.counters.frame_allocs += 1;
        Some(pfn)
    }

    pub fn free_frames(&self, pfn: Pfn, order: u32) {
        let mut state = self.state.lock();
        let mut ok = true;
        for n in 0..1u64 << order {
            ok &= state.frames.remove(&(pfn.as_u64() + n)).is_some();
        }
        if ok {
            state.counters.frame_frees += 1;
        } else {
            state.counters.bad_frees += 1;
        }
    }

    /// Let only `n` more frame allocations succeed.
    pub fn fail_allocations_after(&self, n: usize) {
        self.state.lock().alloc_budget = Some(n);
    }

    /// Frames currently allocated, the sentinel excluded.
    #[must_use]
    pub fn live_frames(&self) -> usize {
        self.state.lock().frames.len() - 1
    }

    #[must_use]
    pub const fn page_handle(pfn: Pfn) -> PageHandle {
        PageHandle::new(VMEMMAP_BASE + pfn.as_u64() as usize * STRUCT_PAGE_SIZE)
    }

    #[must_use]
    pub const fn handle_pfn(page: PageHandle) -> Pfn {
        Pfn::new(((page.as_usize() - VMEMMAP_BASE) / STRUCT_PAGE_SIZE) as u64)
    }

    #[must_use]
    pub fn frame_bytes(&self, pfn: Pfn) -> Option<Vec<u8>> {
        self.state.lock().frames.get(&pfn.as_u64()).cloned()
    }

    // ---- tasks ----

    /// Create a live thread. The first thread of a group is its leader.
    pub fn spawn_task(&self, pid: Pid, tgid: Pid) -> TaskPtr {
        let mut state = self.state.lock();
        let ptr = TaskPtr::new(state.next_task);
        state.next_task += 0x1000;
        state.tasks.insert(
            ptr.as_usize(),
            FakeTask {
                pid,
                tgid,
                refs: 0,
                alive: true,
                running: false,
                wakeups: 0,
            },
        );
        ptr
    }

    /// The thread exits; its id becomes free for reuse.
    pub fn kill_task(&self, task: TaskPtr) {
        if let Some(t) = self.state.lock().tasks.get_mut(&task.as_usize()) {
            t.alive = false;
        }
    }

    /// Every thread of `tgid` exits and the exit hooks run.
    pub fn exit_process(&self, tgid: Pid) {
        {
            let mut state = self.state.lock();
            for t in state.tasks.values_mut().filter(|t| t.tgid == tgid) {
                t.alive = false;
            }
        }
        let hooks = self.exit_hooks.lock();
        for hook in hooks.iter() {
            hook(tgid);
        }
    }

    pub fn set_current(&self, task: TaskPtr) {
        self.state.lock().current = task;
    }

    pub fn set_running(&self, task: TaskPtr, running: bool) {
        if let Some(t) = self.state.lock().tasks.get_mut(&task.as_usize()) {
            t.running = running;
        }
    }

    #[must_use]
    pub fn task_refs(&self, task: TaskPtr) -> i64 {
        self.state
            .lock()
            .tasks
            .get(&task.as_usize())
            .map_or(0, |t| t.refs)
    }

    #[must_use]
    pub fn wakeups(&self, task: TaskPtr) -> usize {
        self.state
            .lock()
            .tasks
            .get(&task.as_usize())
            .map_or(0, |t| t.wakeups)
    }

    // ---- inspection ----

    #[must_use]
    pub fn kernel_pte(&self, va: VirtualAddress) -> Option<(PhysicalAddress, PageProtection)> {
        self.state
            .lock()
            .kernel_ptes
            .get(&va.as_u64())
            .map(|p| (p.pfn.address(), p.prot))
    }

    #[must_use]
    pub fn user_pte(&self, tgid: Pid, va: VirtualAddress) -> Option<(PhysicalAddress, PageProtection)> {
        self.state
            .lock()
            .user_ptes
            .get(&(tgid, va.as_u64()))
            .map(|p| (p.pfn.address(), p.prot))
    }

    /// Protection the VMA allows at `va` after the last fixup.
    #[must_use]
    pub fn vma_access(&self, tgid: Pid, va: VirtualAddress) -> Option<PageAccess> {
        self.state
            .lock()
            .vma_access
            .get(&(tgid, va.as_u64()))
            .copied()
    }

    #[must_use]
    pub fn has_vma(&self, tgid: Pid, va: VirtualAddress) -> bool {
        self.state.lock().in_vma(tgid, va.as_u64())
    }

    #[must_use]
    pub fn kernel_area_count(&self) -> usize {
        self.state.lock().kernel_areas.len()
    }

    #[must_use]
    pub fn sentinel(&self) -> PhysicalAddress {
        self.state.lock().sentinel.address()
    }

    /// Read through the kernel page tables.
    #[must_use]
    pub fn read_kernel(&self, va: VirtualAddress, len: usize) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.read_through(|page| state.kernel_ptes.get(&page).copied(), va.as_u64(), len)
    }

    /// Read through the user page tables of `tgid`.
    #[must_use]
    pub fn read_user(&self, tgid: Pid, va: VirtualAddress, len: usize) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.read_through(
            |page| state.user_ptes.get(&(tgid, page)).copied(),
            va.as_u64(),
            len,
        )
    }

    /// Simulate a user fault in `tgid` at `va`.
    pub fn fault(&self, tgid: Pid, va: VirtualAddress, write: bool) -> Option<FaultStatus> {
        let slot = {
            let state = self.state.lock();
            let vmas = state.vmas.get(&tgid)?;
            let vma = vmas
                .iter()
                .find(|v| va.as_u64() >= v.start && va.as_u64() < v.end)?;
            Arc::clone(&vma.slot)
        };
        Some(slot.handle_fault(va, write))
    }
}

impl KernelMm for FakeKernel {
    fn reserve_area(
        &self,
        start: Option<VirtualAddress>,
        pages: usize,
    ) -> Result<VirtualAddress, VmemError> {
        let mut state = self.state.lock();
        let len = pages as u64 * PAGE_SIZE;
        let start = match start {
            Some(start) => {
                let s = start.as_u64();
                let clash = state
                    .kernel_areas
                    .iter()
                    .any(|(&a, &p)| s < a + p as u64 * PAGE_SIZE && a < s + len);
                if clash {
                    return Err(VmemError::AlreadyMapped { start });
                }
                start
            }
            None => {
                let va = state.next_kernel_va;
                // One guard page between areas.
                state.next_kernel_va += len + PAGE_SIZE;
                VirtualAddress::new(va)
            }
        };
        state.kernel_areas.insert(start.as_u64(), pages);
        state.counters.area_reserves += 1;
        Ok(start)
    }

    fn release_area(&self, start: VirtualAddress) {
        let mut state = self.state.lock();
        if let Some(pages) = state.kernel_areas.remove(&start.as_u64()) {
            let end = start.as_u64() + pages as u64 * PAGE_SIZE;
            state.kernel_ptes.retain(|&va, _| va < start.as_u64() || va >= end);
            state.counters.area_releases += 1;
        }
    }

    fn map_page(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        prot: PageProtection,
    ) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        if !state.in_kernel_area(va.as_u64()) {
            return Err(VmemError::Host("no vm area"));
        }
        if state.kernel_ptes.contains_key(&va.as_u64()) {
            return Err(VmemError::Host("pte already present"));
        }
        state.kernel_ptes.insert(va.as_u64(), Pte { pfn: pa.pfn(), prot });
        state.counters.kernel_maps += 1;
        Ok(())
    }

    fn unmap_page_no_flush(&self, va: VirtualAddress) {
        let mut state = self.state.lock();
        state.kernel_ptes.remove(&va.as_u64());
        state.counters.kernel_unmaps += 1;
    }

    fn page_to_phys(&self, page: PageHandle) -> PhysicalAddress {
        Self::handle_pfn(page).address()
    }

    fn sentinel_page(&self) -> PhysicalAddress {
        self.sentinel()
    }

    fn write_bytes(&self, va: VirtualAddress, bytes: &[u8]) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        let mut cursor = va.as_u64();
        let mut rest = bytes;
        while !rest.is_empty() {
            let page = cursor & !(PAGE_SIZE - 1);
            let pte = state
                .kernel_ptes
                .get(&page)
                .copied()
                .filter(|p| p.prot.present() && p.prot.writable())
                .ok_or(VmemError::Host("write through unmapped kernel address"))?;
            let frame = state
                .frames
                .get_mut(&pte.pfn.as_u64())
                .ok_or(VmemError::Host("pte points at a freed frame"))?;
            let from = (cursor - page) as usize;
            let n = rest.len().min(PAGE_SIZE as usize - from);
            frame[from..from + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            cursor += n as u64;
        }
        Ok(())
    }
}

impl UserMm for FakeKernel {
    fn find_intersection(&self, task: TaskPtr, start: VirtualAddress, end: VirtualAddress) -> bool {
        let state = self.state.lock();
        let Some(tgid) = state.tgid_of(task) else {
            return false;
        };
        state.vmas.get(&tgid).is_some_and(|vmas| {
            vmas.iter()
                .any(|v| start.as_u64() < v.end && v.start < end.as_u64())
        })
    }

    fn get_unmapped_area(
        &self,
        task: TaskPtr,
        pages: usize,
        limit: Option<VirtualAddress>,
    ) -> Result<VirtualAddress, VmemError> {
        let mut state = self.state.lock();
        let tgid = state.tgid_of(task).ok_or(VmemError::Host("no such task"))?;
        let len = pages as u64 * PAGE_SIZE;
        let cursor = match limit {
            Some(limit) => {
                let cursor = state.next_low_va.entry(tgid).or_insert(LOW_USER_AREA_BASE);
                if *cursor + len > limit.as_u64() {
                    return Err(VmemError::OutOfMemory);
                }
                cursor
            }
            None => state.next_user_va.entry(tgid).or_insert(USER_AREA_BASE),
        };
        let va = *cursor;
        *cursor += len + PAGE_SIZE;
        Ok(VirtualAddress::new(va))
    }

    fn install_special_mapping(
        &self,
        task: TaskPtr,
        start: VirtualAddress,
        pages: usize,
        slot: Arc<FaultSlot>,
    ) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        let tgid = state.tgid_of(task).ok_or(VmemError::Host("no such task"))?;
        let (s, e) = (start.as_u64(), start.as_u64() + pages as u64 * PAGE_SIZE);
        let vmas = state.vmas.entry(tgid).or_default();
        if vmas.iter().any(|v| s < v.end && v.start < e) {
            return Err(VmemError::AlreadyMapped { start });
        }
        vmas.push(Vma {
            start: s,
            end: e,
            slot,
        });
        state.counters.special_mappings += 1;
        Ok(())
    }

    fn unmap_range(&self, task: TaskPtr, start: VirtualAddress, pages: usize) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        let tgid = state.tgid_of(task).ok_or(VmemError::Host("no such task"))?;
        let (s, e) = (start.as_u64(), start.as_u64() + pages as u64 * PAGE_SIZE);
        if let Some(vmas) = state.vmas.get_mut(&tgid) {
            vmas.retain(|v| v.end <= s || v.start >= e);
        }
        state
            .user_ptes
            .retain(|&(t, va), _| t != tgid || va < s || va >= e);
        state
            .vma_access
            .retain(|&(t, va), _| t != tgid || va < s || va >= e);
        state.counters.user_unmaps += 1;
        Ok(())
    }

    fn mprotect_fixup(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        access: PageAccess,
    ) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        let tgid = state.tgid_of(task).ok_or(VmemError::Host("no such task"))?;
        if !state.in_vma(tgid, va.as_u64()) {
            return Err(VmemError::Host("mprotect outside of any vma"));
        }
        state.vma_access.insert((tgid, va.as_u64()), access);
        state.counters.mprotects += 1;
        Ok(())
    }

    fn zap_page(&self, task: TaskPtr, va: VirtualAddress) {
        let mut state = self.state.lock();
        if let Some(tgid) = state.tgid_of(task) {
            state.user_ptes.remove(&(tgid, va.as_u64()));
        }
        state.counters.zaps += 1;
    }

    fn insert_page(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        page: PageHandle,
        prot: PageProtection,
    ) -> Result<(), VmemError> {
        self.remap_pfn(task, va, Self::handle_pfn(page), prot)
    }

    fn remap_pfn(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        pfn: Pfn,
        prot: PageProtection,
    ) -> Result<(), VmemError> {
        let mut state = self.state.lock();
        let tgid = state.tgid_of(task).ok_or(VmemError::Host("no such task"))?;
        if !state.in_vma(tgid, va.as_u64()) {
            return Err(VmemError::Host("pte outside of any vma"));
        }
        if state.user_ptes.contains_key(&(tgid, va.as_u64())) {
            return Err(VmemError::Host("pte already present"));
        }
        state.user_ptes.insert((tgid, va.as_u64()), Pte { pfn, prot });
        state.counters.user_inserts += 1;
        Ok(())
    }
}

impl TaskOps for FakeKernel {
    fn get_task(&self, task: TaskPtr) {
        if let Some(t) = self.state.lock().tasks.get_mut(&task.as_usize()) {
            t.refs += 1;
        }
    }

    fn put_task(&self, task: TaskPtr) {
        if let Some(t) = self.state.lock().tasks.get_mut(&task.as_usize()) {
            t.refs -= 1;
        }
    }

    fn pid(&self, task: TaskPtr) -> Pid {
        self.state
            .lock()
            .tasks
            .get(&task.as_usize())
            .map_or(-1, |t| t.pid)
    }

    fn tgid(&self, task: TaskPtr) -> Pid {
        self.state.lock().tgid_of(task).unwrap_or(-1)
    }

    fn current(&self) -> TaskPtr {
        self.state.lock().current
    }

    fn find_task(&self, tid: Pid) -> Option<TaskPtr> {
        let mut state = self.state.lock();
        let (&ptr, task) = state
            .tasks
            .iter_mut()
            .find(|(_, t)| t.alive && t.pid == tid)?;
        task.refs += 1;
        Some(TaskPtr::new(ptr))
    }

    fn is_running(&self, task: TaskPtr) -> bool {
        self.state
            .lock()
            .tasks
            .get(&task.as_usize())
            .is_some_and(|t| t.running)
    }

    fn wake_up(&self, task: TaskPtr) {
        if let Some(t) = self.state.lock().tasks.get_mut(&task.as_usize()) {
            t.wakeups += 1;
        }
    }

    fn add_exit_hook(&self, hook: ExitHook) {
        self.exit_hooks.lock().push(hook);
    }
}
