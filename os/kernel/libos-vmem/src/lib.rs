//! # Zones, Page Entries and Memory Allocations
//!
//! Virtual-memory plumbing for injecting pages into kernel and user address
//! spaces.
//!
//! ## Overview
//!
//! | Layer | Type | Role |
//! |-------|------|------|
//! | Host | [`KernelMm`], [`UserMm`] | Resolved kernel primitives (VA reservation, PTE install, VMA surgery). |
//! | Manager | [`KernelAddressSpace`], [`UserAddressSpace`] | Reserve a [zone](ZoneContext) of N page slots. |
//! | Zone | [`KernelZone`], [`UserZone`] | `insert_at`/`remove_at` one page slot. Not thread-safe. |
//! | Descriptor | [`MemoryAllocation`] | Tracks which [`PageEntry`] occupies each slot, unmaps on drop unless lingering. |
//! | Entry point | [`MemoryInterface`] | Hands out managers and page entries. |
//!
//! A slot, once claimed, is never left as a hole: removing a page swaps in
//! the host's sentinel page with no access rights.
//!
//! ## Typical Usage
//!
//! ```ignore
//! let memory = MemoryInterface::new(kernel_mm, user_mm);
//! let mut alloc = MemoryAllocation::new(&memory.kernel_address_space(), None, 4)?;
//! let entry = memory
//!     .create_page_entry(PageAccess::rw(), CacheType::Cache)
//!     .with_source(PageSource::Pfn(pfn));
//! alloc.page_insert(2, entry)?;
//! assert_eq!(alloc.page_phys_addr(2)?, pfn.address());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod addresses;
mod allocation;
mod backend;
mod error;
mod fault;
mod interface;
mod kernel_space;
mod page_entry;
mod protection;
mod user_space;
mod zone;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use addresses::{PageHandle, Pfn, PhysicalAddress, VirtualAddress};
pub use allocation::MemoryAllocation;
pub use backend::{KernelMm, UserMm};
pub use error::VmemError;
pub use fault::{FaultHandler, FaultInfo, FaultSlot, FaultStatus};
pub use interface::MemoryInterface;
pub use kernel_space::{KernelAddressSpace, KernelZone};
pub use page_entry::{CacheType, PageAccess, PageEntry, PageEntryMeta, PageSource};
pub use protection::PageProtection;
pub use user_space::{UserAddressSpace, UserZone};
pub use zone::{AddressSpaceManager, MappingHandle, ZoneContext, ZoneInfo};
