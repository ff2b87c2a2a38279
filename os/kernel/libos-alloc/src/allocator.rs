use crate::error::PageAllocError;
use crate::gfp::GfpFlags;
use crate::page_array::{PageArray, PageArrayHeader};
use alloc::sync::Arc;
use alloc::vec::Vec;
use libos_info::memory::{MAX_ORDER, MAX_PAGE_ARRAY_COUNT, PhysicalLocation};
use libos_vmem::{PageHandle, Pfn};
use log::{error, warn};

/// The host buddy allocator (`alloc_pages`, `__free_pages`, ...).
pub trait BuddyAllocator: Send + Sync {
    fn alloc_pages(&self, gfp: GfpFlags, order: u32) -> Option<PageHandle>;

    fn free_pages(&self, page: PageHandle, order: u32);

    fn page_to_pfn(&self, page: PageHandle) -> Pfn;

    fn pfn_to_page(&self, pfn: Pfn) -> PageHandle;
}

/// Receives unrecoverable invariant violations.
pub type AssertHook = fn(&str);

/// Aborts the module.
pub fn default_assert_hook(message: &str) {
    panic!("{message}");
}

pub struct PageAllocator {
    buddy: Arc<dyn BuddyAllocator>,
    assert_hook: AssertHook,
}

impl PageAllocator {
    #[must_use]
    pub fn new(buddy: Arc<dyn BuddyAllocator>) -> Self {
        Self {
            buddy,
            assert_hook: default_assert_hook,
        }
    }

    #[must_use]
    pub fn with_assert_hook(mut self, hook: AssertHook) -> Self {
        self.assert_hook = hook;
        self
    }

    /// Allocate `count` pages.
    ///
    /// With `contiguous`, one block of `2^order >= count` pages is taken and
    /// every page of it is returned. With `want_pfns` the entries are PFNs,
    /// otherwise page handles.
    ///
    /// # Errors
    /// * [`PageAllocError::IllegalArgument`] for a zero count or a block
    ///   beyond [`MAX_ORDER`].
    /// * [`PageAllocError::OutOfMemory`] if the host ran dry; nothing is
    ///   left allocated in that case.
    pub fn allocate_pages(
        &self,
        location: PhysicalLocation,
        count: usize,
        contiguous: bool,
        want_pfns: bool,
        zero: bool,
    ) -> Result<PageArray, PageAllocError> {
        if count == 0 {
            return Err(PageAllocError::IllegalArgument("zero pages requested"));
        }
        let header_count = u32::try_from(count)
            .ok()
            .filter(|&c| u64::from(c) <= MAX_PAGE_ARRAY_COUNT)
            .ok_or(PageAllocError::IllegalArgument("page count too large"))?;

        let gfp = GfpFlags::for_location(location, zero);
        if contiguous {
            self.allocate_block(gfp, count, header_count, want_pfns)
        } else {
            self.allocate_scattered(gfp, count, header_count, want_pfns)
        }
    }

    fn allocate_block(
        &self,
        gfp: GfpFlags,
        count: usize,
        header_count: u32,
        want_pfns: bool,
    ) -> Result<PageArray, PageAllocError> {
        let order = count.next_power_of_two().trailing_zeros();
        if order > MAX_ORDER {
            return Err(PageAllocError::IllegalArgument("contiguous block beyond max order"));
        }

        let pages = 1usize << order;
        if pages > count {
            warn!("contiguous request for {count} pages rounded up to {pages} (order {order})");
        }

        let first = self
            .buddy
            .alloc_pages(gfp, order)
            .ok_or(PageAllocError::OutOfMemory { requested: count })?;
        let first = self.buddy.page_to_pfn(first);

        let entries: Vec<u64> = (0..pages as u64)
            .map(|i| self.encode_entry(first.offset(i), want_pfns))
            .collect();

        #[allow(clippy::cast_possible_truncation)]
        let header = PageArrayHeader::encode(header_count, order as u8, true, want_pfns);
        Ok(PageArray::new(header, &entries))
    }

    fn allocate_scattered(
        &self,
        gfp: GfpFlags,
        count: usize,
        header_count: u32,
        want_pfns: bool,
    ) -> Result<PageArray, PageAllocError> {
        let mut obtained: Vec<PageHandle> = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(page) = self.buddy.alloc_pages(gfp, 0) else {
                for page in obtained {
                    self.buddy.free_pages(page, 0);
                }
                return Err(PageAllocError::OutOfMemory { requested: count });
            };
            obtained.push(page);
        }

        let entries: Vec<u64> = obtained
            .iter()
            .map(|&page| {
                if want_pfns {
                    self.buddy.page_to_pfn(page).as_u64()
                } else {
                    page.as_usize() as u64
                }
            })
            .collect();

        let header = PageArrayHeader::encode(header_count, 0, false, want_pfns);
        Ok(PageArray::new(header, &entries))
    }

    fn encode_entry(&self, pfn: Pfn, want_pfns: bool) -> u64 {
        if want_pfns {
            pfn.as_u64()
        } else {
            self.buddy.pfn_to_page(pfn).as_usize() as u64
        }
    }

    fn decode_entry(&self, raw: u64, pfns: bool) -> PageHandle {
        if pfns {
            self.buddy.pfn_to_page(Pfn::new(raw))
        } else {
            #[allow(clippy::cast_possible_truncation)]
            PageHandle::new(raw as usize)
        }
    }

    /// Return every page of `array` to the host.
    ///
    /// # Errors
    /// [`PageAllocError::CorruptHeader`] after the assert hook fired; the
    /// pages are not touched.
    pub fn free_pages(&self, array: PageArray) -> Result<(), PageAllocError> {
        let header = array.header();
        if !header.is_valid() {
            error!(
                "refusing to free page array with magic {:#06x}",
                header.magic()
            );
            (self.assert_hook)("page array magic corrupted");
            return Err(PageAllocError::CorruptHeader {
                magic: header.magic(),
            });
        }

        if header.contiguous() {
            if let Some(&first) = array.entries().first() {
                let page = self.decode_entry(first, header.pfns());
                self.buddy.free_pages(page, u32::from(header.order()));
            }
        } else {
            for &raw in array.entries() {
                self.buddy.free_pages(self.decode_entry(raw, header.pfns()), 0);
            }
        }
        Ok(())
    }
}
