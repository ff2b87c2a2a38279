use bitfield_struct::bitfield;

/// Leaf PTE bits handed to the host mapping primitives.
///
/// | Bits  | Name      | Meaning |
/// |-------|-----------|---------|
/// | 0     | `P`       | Present |
/// | 1     | `RW`      | Writable |
/// | 2     | `US`      | User accessible |
/// | 3     | `PWT`     | PAT index bit 0 |
/// | 4     | `PCD`     | PAT index bit 1 |
/// | 5     | `A`       | Accessed |
/// | 6     | `D`       | Dirty |
/// | 7     | `PAT`     | PAT index bit 2 (4 KiB leaves) |
/// | 8     | `G` / `PROT_NONE` | Global when present; the host's `PROT_NONE` marker when not |
/// | 63    | `NX`      | Execute disable |
///
/// The frame address is never part of this value; the host supplies it.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageProtection {
    pub present: bool,
    pub writable: bool,
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub pat: bool,
    /// Shares bit 8 with `G`; only meaningful while `present` is clear.
    pub prot_none: bool,
    #[bits(54)]
    __: u64,
    pub no_execute: bool,
}

impl PageProtection {
    /// Whether a user access is permitted at all.
    #[inline]
    #[must_use]
    pub const fn is_accessible(self) -> bool {
        self.present()
    }
}
