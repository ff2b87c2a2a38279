use crate::addresses::{PageHandle, Pfn, PhysicalAddress};
use crate::protection::PageProtection;
use bitfield_struct::bitfield;

/// Access rights requested for a page slot.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PageAccess {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    #[bits(5)]
    __: u8,
}

impl PageAccess {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new()
    }

    #[inline]
    #[must_use]
    pub const fn ro() -> Self {
        Self::new().with_read(true)
    }

    #[inline]
    #[must_use]
    pub const fn rw() -> Self {
        Self::new().with_read(true).with_write(true)
    }

    #[inline]
    #[must_use]
    pub const fn rx() -> Self {
        Self::new().with_read(true).with_execute(true)
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        !self.read() && !self.write() && !self.execute()
    }
}

/// Memory type of a mapping.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CacheType {
    /// Write-back.
    #[default]
    Cache,
    WriteCombine,
    /// Uncached.
    NoCache,
    WriteThrough,
    WriteProtected,
}

/// Access rights plus memory type.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PageEntryMeta {
    pub access: PageAccess,
    pub cache: CacheType,
}

impl PageEntryMeta {
    #[must_use]
    pub const fn new(access: PageAccess, cache: CacheType) -> Self {
        Self { access, cache }
    }

    #[must_use]
    pub const fn no_access() -> Self {
        Self::new(PageAccess::none(), CacheType::Cache)
    }

    /// Resolve into x86-64 leaf PTE bits.
    ///
    /// Memory types go through the host PAT layout: WB = none, WC = PWT,
    /// UC = PCD|PWT, WP = PAT|PWT, WT = PAT|PCD|PWT.
    /// No access at all yields a not-present `PROT_NONE` entry.
    #[must_use]
    pub const fn protection(&self, user: bool) -> PageProtection {
        if self.access.is_none() {
            return PageProtection::new().with_prot_none(true);
        }

        let base = PageProtection::new()
            .with_present(true)
            .with_writable(self.access.write())
            .with_user_access(user)
            .with_no_execute(!self.access.execute());

        match self.cache {
            CacheType::Cache => base,
            CacheType::WriteCombine => base.with_write_through(true),
            CacheType::NoCache => base.with_write_through(true).with_cache_disabled(true),
            CacheType::WriteProtected => base.with_pat(true).with_write_through(true),
            CacheType::WriteThrough => base
                .with_pat(true)
                .with_cache_disabled(true)
                .with_write_through(true),
        }
    }
}

/// Where the frame behind a slot comes from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageSource {
    Address(PhysicalAddress),
    Pfn(Pfn),
    Page(PageHandle),
    /// The host's no-access sentinel page.
    Dummy,
}

/// One physical page source together with how to map it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageEntry {
    pub source: PageSource,
    pub meta: PageEntryMeta,
}

impl PageEntry {
    #[must_use]
    pub const fn new(source: PageSource, meta: PageEntryMeta) -> Self {
        Self { source, meta }
    }

    #[must_use]
    pub const fn dummy() -> Self {
        Self::new(PageSource::Dummy, PageEntryMeta::no_access())
    }

    #[must_use]
    pub const fn with_source(self, source: PageSource) -> Self {
        Self { source, ..self }
    }

    #[inline]
    #[must_use]
    pub const fn is_dummy(&self) -> bool {
        matches!(self.source, PageSource::Dummy)
    }

    /// Effective access: dummies never grant any.
    #[inline]
    #[must_use]
    pub const fn effective_access(&self) -> PageAccess {
        match self.source {
            PageSource::Dummy => PageAccess::none(),
            PageSource::Address(_) | PageSource::Pfn(_) | PageSource::Page(_) => self.meta.access,
        }
    }

    /// PTE bits this entry is installed with.
    #[must_use]
    pub const fn protection(&self, user: bool) -> PageProtection {
        match self.source {
            PageSource::Dummy => PageEntryMeta::no_access().protection(user),
            PageSource::Address(_) | PageSource::Pfn(_) | PageSource::Page(_) => {
                self.meta.protection(user)
            }
        }
    }
}
