use alloc::boxed::Box;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::ptr::NonNull;
use libos_info::memory::PAGE_ARRAY_MAGIC;
use libos_vmem::{PageHandle, Pfn, PageSource};

/// Hidden header stored in the slot before the first visible entry.
///
/// | Bits   | Field        |
/// |--------|--------------|
/// | 0..32  | `count`      |
/// | 32..38 | `order`      |
/// | 38     | `contiguous` |
/// | 39     | `pfns`       |
/// | 40..48 | reserved     |
/// | 48..64 | `magic`      |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageArrayHeader {
    /// Pages the caller asked for.
    #[bits(32)]
    pub count: u32,
    /// Buddy order of the block; only meaningful when `contiguous`.
    #[bits(6)]
    pub order: u8,
    pub contiguous: bool,
    /// Entries are PFNs rather than page handles.
    pub pfns: bool,
    #[bits(8)]
    __: u8,
    #[bits(16)]
    pub magic: u16,
}

impl PageArrayHeader {
    #[must_use]
    pub const fn encode(count: u32, order: u8, contiguous: bool, pfns: bool) -> Self {
        Self::new()
            .with_count(count)
            .with_order(order)
            .with_contiguous(contiguous)
            .with_pfns(pfns)
            .with_magic(PAGE_ARRAY_MAGIC)
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.magic() == PAGE_ARRAY_MAGIC
    }

    /// Visible entries behind this header.
    #[inline]
    #[must_use]
    pub const fn entries(self) -> usize {
        if self.contiguous() {
            1 << self.order()
        } else {
            self.count() as usize
        }
    }
}

/// Allocated pages, one `u64` entry each (a PFN or a page handle).
///
/// Dropping the array releases only its bookkeeping; the pages go back
/// through [`PageAllocator::free_pages`](crate::PageAllocator::free_pages).
pub struct PageArray {
    slots: Box<[u64]>,
}

impl PageArray {
    pub(crate) fn new(header: PageArrayHeader, entries: &[u64]) -> Self {
        let mut slots = Vec::with_capacity(entries.len() + 1);
        slots.push(header.into_bits());
        slots.extend_from_slice(entries);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    #[must_use]
    pub fn header(&self) -> PageArrayHeader {
        PageArrayHeader::from_bits(self.slots[0])
    }

    /// Visible entries.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[u64] {
        &self.slots[1..]
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pages the caller asked for, which may be fewer than [`len`](Self::len).
    #[inline]
    #[must_use]
    pub fn requested(&self) -> usize {
        self.header().count() as usize
    }

    /// Entry `index` as a mappable page source.
    #[must_use]
    pub fn source(&self, index: usize) -> Option<PageSource> {
        let raw = *self.entries().get(index)?;
        Some(if self.header().pfns() {
            PageSource::Pfn(Pfn::new(raw))
        } else {
            #[allow(clippy::cast_possible_truncation)]
            PageSource::Page(PageHandle::new(raw as usize))
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = PageSource> + '_ {
        (0..self.len()).filter_map(|i| self.source(i))
    }

    /// Hand the array out as a pointer to its first visible entry.
    #[must_use]
    pub fn into_raw(self) -> NonNull<u64> {
        let base = Box::into_raw(self.slots).cast::<u64>();
        // SAFETY: the slice always holds the header plus at least one entry.
        unsafe { NonNull::new_unchecked(base.add(1)) }
    }

    /// Take back an array given out by [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// `first` must come from [`into_raw`](Self::into_raw) and must not be
    /// reclaimed twice. The header's size fields must be intact; only the
    /// magic may have been damaged.
    #[must_use]
    pub unsafe fn from_raw(first: NonNull<u64>) -> Self {
        unsafe {
            let base = first.as_ptr().sub(1);
            let header = PageArrayHeader::from_bits(*base);
            let slice = core::ptr::slice_from_raw_parts_mut(base, header.entries() + 1);
            Self {
                slots: Box::from_raw(slice),
            }
        }
    }
}

impl core::fmt::Debug for PageArray {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageArray")
            .field("header", &self.header())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        for count in [1u32, 2, 17, 1 << 20] {
            for (contiguous, pfns) in [(false, false), (true, true), (true, false)] {
                #[allow(clippy::cast_possible_truncation)]
                let order = count.next_power_of_two().trailing_zeros() as u8;
                let h = PageArrayHeader::encode(count, order, contiguous, pfns);
                let back = PageArrayHeader::from_bits(h.into_bits());
                assert_eq!(back.count(), count);
                assert_eq!(back.order(), order);
                assert_eq!(back.contiguous(), contiguous);
                assert_eq!(back.pfns(), pfns);
                assert_eq!(back.magic(), PAGE_ARRAY_MAGIC);
                assert!(back.is_valid());
            }
        }
    }

    #[test]
    fn raw_pointer_points_past_the_header() {
        let array = PageArray::new(PageArrayHeader::encode(3, 0, false, true), &[7, 8, 9]);
        let raw = array.into_raw();
        unsafe {
            assert_eq!(*raw.as_ptr(), 7);
            assert_eq!(*raw.as_ptr().add(2), 9);
            assert!(PageArrayHeader::from_bits(*raw.as_ptr().sub(1)).is_valid());
        }
        let back = unsafe { PageArray::from_raw(raw) };
        assert_eq!(back.entries(), &[7, 8, 9]);
        assert_eq!(back.source(1), Some(PageSource::Pfn(Pfn::new(8))));
        assert_eq!(back.source(3), None);
    }

    #[test]
    fn contiguous_header_covers_whole_block() {
        let h = PageArrayHeader::encode(5, 3, true, true);
        assert_eq!(h.entries(), 8);
        assert_eq!(PageArrayHeader::encode(5, 3, false, true).entries(), 5);
    }
}
