//! # Page Allocator
//!
//! Raw page frames from the host buddy allocator, returned as a
//! [`PageArray`] of PFNs or page handles.
//!
//! ## Overview
//!
//! * Contiguous requests become one `2^order` block; the array then holds
//!   every page of that block, which may be more than was asked for.
//! * Non-contiguous requests are satisfied page by page; a failure part way
//!   through returns everything already obtained.
//! * Each array carries a hidden [`PageArrayHeader`] in the slot right in
//!   front of the first visible entry. [`PageAllocator::free_pages`] trusts
//!   nothing but that header and refuses an array whose magic is wrong.
//!
//! ```ignore
//! let pages = allocator.allocate_pages(PhysicalLocation::Normal, 4, false, true, true)?;
//! for entry in pages.sources() { /* map it */ }
//! allocator.free_pages(pages)?;
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod allocator;
mod error;
mod gfp;
mod page_array;

#[cfg(any(test, feature = "testing"))]
mod testing;

pub use allocator::{AssertHook, BuddyAllocator, PageAllocator, default_assert_hook};
pub use error::PageAllocError;
pub use gfp::GfpFlags;
pub use page_array::{PageArray, PageArrayHeader};
