use crate::addresses::VirtualAddress;
use alloc::boxed::Box;
use alloc::sync::Arc;
use libos_info::memory::PAGE_SIZE;
use libos_sync::SpinLock;
use log::warn;

/// Result codes a fault handler hands back to the host VM.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultStatus {
    Oom = 0x1,
    SigBus = 0x2,
    SigSegv = 0x40,
    /// Handled; the handler installed a page.
    NoPage = 0x100,
}

impl FaultStatus {
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// A fault inside a user zone.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FaultInfo {
    pub address: VirtualAddress,
    /// Page slot within the zone.
    pub index: usize,
    pub write: bool,
}

pub type FaultHandler = Box<dyn Fn(&FaultInfo) -> FaultStatus + Send + Sync>;

/// The capability a user zone registers with its special mapping.
///
/// The host calls [`handle_fault`](Self::handle_fault) for every fault in
/// the mapping, including after the owning zone is gone.
pub struct FaultSlot {
    start: VirtualAddress,
    handler: SpinLock<Option<Arc<FaultHandler>>>,
}

impl FaultSlot {
    #[must_use]
    pub const fn new(start: VirtualAddress) -> Self {
        Self {
            start,
            handler: SpinLock::new(None),
        }
    }

    pub fn set_handler(&self, handler: Option<FaultHandler>) {
        *self.handler.lock() = handler.map(Arc::new);
    }

    pub fn clear(&self) {
        self.handler.lock().take();
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Dispatch a fault at `address`.
    pub fn handle_fault(&self, address: VirtualAddress, write: bool) -> FaultStatus {
        let handler = self.handler.lock().clone();
        let Some(handler) = handler else {
            warn!("unhandled fault at {address} (write: {write}), no handler registered");
            return FaultStatus::SigBus;
        };

        #[allow(clippy::cast_possible_truncation)]
        let index = (address.as_u64().saturating_sub(self.start.as_u64()) / PAGE_SIZE) as usize;
        handler(&FaultInfo {
            address,
            index,
            write,
        })
    }
}
