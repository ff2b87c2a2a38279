//! Host memory-management primitives.
//!
//! These are the resolved kernel symbols the zones are built on. Every call
//! is a thin forward into the host; the zone types decide the order.

use crate::addresses::{PageHandle, Pfn, PhysicalAddress, VirtualAddress};
use crate::error::VmemError;
use crate::fault::FaultSlot;
use crate::page_entry::PageAccess;
use crate::protection::PageProtection;
use alloc::sync::Arc;
use libos_task::TaskPtr;

/// Kernel address space primitives (`get_vm_area`, `ioremap_page_range`, ...).
pub trait KernelMm: Send + Sync {
    /// Reserve `pages` page slots of kernel VA, optionally at a fixed address.
    ///
    /// # Errors
    /// [`VmemError::AlreadyMapped`] if `start` collides with an existing area,
    /// [`VmemError::OutOfMemory`] if no range is available.
    fn reserve_area(&self, start: Option<VirtualAddress>, pages: usize)
    -> Result<VirtualAddress, VmemError>;

    /// Give back an area obtained from [`reserve_area`](Self::reserve_area), unmapping what is left in it.
    fn release_area(&self, start: VirtualAddress);

    /// Map one page at `va`.
    ///
    /// # Errors
    /// The host could not install the PTE, or one is already present.
    fn map_page(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        prot: PageProtection,
    ) -> Result<(), VmemError>;

    /// Clear the PTE at `va` without a TLB flush.
    fn unmap_page_no_flush(&self, va: VirtualAddress);

    fn page_to_phys(&self, page: PageHandle) -> PhysicalAddress;

    /// Kernel-owned page used to back dummy slots.
    fn sentinel_page(&self) -> PhysicalAddress;

    /// Store `bytes` through an existing kernel mapping.
    ///
    /// # Errors
    /// Part of the range is not mapped.
    fn write_bytes(&self, va: VirtualAddress, bytes: &[u8]) -> Result<(), VmemError>;
}

/// User address space primitives of one task's `mm`.
pub trait UserMm: Send + Sync {
    /// Whether any VMA of `task` intersects `[start, end)`.
    fn find_intersection(&self, task: TaskPtr, start: VirtualAddress, end: VirtualAddress) -> bool;

    /// Find a free range of `pages` pages ending at or below `limit`.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no such range is free.
    fn get_unmapped_area(
        &self,
        task: TaskPtr,
        pages: usize,
        limit: Option<VirtualAddress>,
    ) -> Result<VirtualAddress, VmemError>;

    /// Install a special mapping whose faults are routed to `slot`.
    ///
    /// # Errors
    /// The VMA could not be created.
    fn install_special_mapping(
        &self,
        task: TaskPtr,
        start: VirtualAddress,
        pages: usize,
        slot: Arc<FaultSlot>,
    ) -> Result<(), VmemError>;

    /// `vm_munmap` of the whole range.
    ///
    /// # Errors
    /// The host refused to unmap.
    fn unmap_range(&self, task: TaskPtr, start: VirtualAddress, pages: usize)
    -> Result<(), VmemError>;

    /// Split or merge the VMA so the page at `va` allows exactly `access`.
    ///
    /// # Errors
    /// The mprotect-equivalent fixup failed.
    fn mprotect_fixup(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        access: PageAccess,
    ) -> Result<(), VmemError>;

    /// Drop whatever PTE is at `va`.
    fn zap_page(&self, task: TaskPtr, va: VirtualAddress);

    /// `vm_insert_page`.
    ///
    /// # Errors
    /// The host could not install the page.
    fn insert_page(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        page: PageHandle,
        prot: PageProtection,
    ) -> Result<(), VmemError>;

    /// `remap_pfn_range` for one page.
    ///
    /// # Errors
    /// The host could not install the PTE.
    fn remap_pfn(
        &self,
        task: TaskPtr,
        va: VirtualAddress,
        pfn: Pfn,
        prot: PageProtection,
    ) -> Result<(), VmemError>;
}
